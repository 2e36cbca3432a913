//! Application-level liveness beacon.
//!
//! Not a protocol ping: downstream consumers watch the heartbeat topic to
//! see that a dashboard session is up. One beacon runs per live session and
//! dies with it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::mqtt::transport::Link;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatPayload {
    pub client_id: String,
    pub timestamp: i64,
}

impl HeartbeatPayload {
    pub fn now(client_id: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

pub struct Heartbeat {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Heartbeat {
    /// Starts beating on `topic` every `period`, first beat one period from now.
    ///
    /// A zero period disables the beacon.
    pub fn start<L: Link>(
        link: Arc<L>,
        topic: String,
        client_id: String,
        period: Duration,
    ) -> Option<Self> {
        if period.is_zero() {
            debug!("Heartbeat disabled");
            return None;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let payload = HeartbeatPayload::now(&client_id);
                        match serde_json::to_vec(&payload) {
                            Ok(bytes) => {
                                if !link.publish(&topic, bytes, false) {
                                    warn!("Heartbeat publish on {} rejected", topic);
                                }
                            }
                            Err(e) => warn!("Failed to encode heartbeat: {}", e),
                        }
                    }
                }
            }
            debug!("Heartbeat for {} stopped", client_id);
        });

        Some(Self { cancel, task })
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
