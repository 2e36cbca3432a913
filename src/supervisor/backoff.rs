//! Reconnect timing.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff parameters for supervisor-driven reconnects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Wait before the first retry after a drop
    pub base_delay_ms: u64,
    /// Multiplier applied per consecutive failure (values below 1 are treated as 1)
    pub factor: f64,
    /// Upper bound on any single wait
    pub max_delay_ms: u64,
    /// Consecutive retries before the cooldown kicks in; 0 disables the cap
    pub max_attempts: u32,
    pub cooldown_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            factor: 2.0,
            max_delay_ms: 30_000,
            max_attempts: 5,
            cooldown_ms: 30_000,
        }
    }
}

impl ReconnectPolicy {
    /// `min(base × factor^failures, cap)`
    pub fn delay_for(&self, failures: u32) -> Duration {
        let factor = if self.factor.is_finite() {
            self.factor.max(1.0)
        } else {
            1.0
        };
        let exponent = i32::try_from(failures).unwrap_or(i32::MAX);
        let raw_ms = self.base_delay_ms as f64 * factor.powi(exponent);
        let capped_ms = raw_ms.min(self.max_delay_ms as f64);
        Duration::from_secs_f64(capped_ms / 1_000.0)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Consecutive-failure bookkeeping on top of a [`ReconnectPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    failures: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Delay the next scheduled retry would use.
    pub fn current_delay(&self) -> Duration {
        if self.cap_reached() {
            self.policy.cooldown()
        } else {
            self.policy.delay_for(self.failures)
        }
    }

    /// Consumes one retry slot and returns how long to wait for it.
    ///
    /// The exponent is the number of retries that already failed: the wait
    /// scheduled after a drop or a failed explicit connect is `base`, and
    /// each failed retry multiplies the next one by `factor`. Once
    /// `max_attempts` retries have been used the cooldown is returned instead
    /// and the counter starts over.
    pub fn next_delay(&mut self) -> Duration {
        if self.cap_reached() {
            self.failures = 0;
            return self.policy.cooldown();
        }
        let delay = self.policy.delay_for(self.failures);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    fn cap_reached(&self) -> bool {
        self.policy.max_attempts > 0 && self.failures >= self.policy.max_attempts
    }
}
