//! Outbound device commands.
//!
//! Thin, typed layer over [`ConnectionSupervisor::publish`]. Relay commands
//! are transient; irrigation configurations are retained so the device picks
//! up the latest plan after it reboots.

use std::fmt;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::irrigation::IrrigationConfig;
use crate::mqtt::topics::Channel;
use crate::mqtt::transport::Connector;
use crate::session::SessionProvider;
use crate::supervisor::ConnectionSupervisor;

/// Relay channels wired on the field controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relay {
    Valve1 = 1,
    Valve2 = 2,
    Valve3 = 3,
    Valve4 = 4,
    Valve5 = 5,
    Pump = 6,
}

impl Relay {
    pub const ALL: [Relay; 6] = [
        Relay::Valve1,
        Relay::Valve2,
        Relay::Valve3,
        Relay::Valve4,
        Relay::Valve5,
        Relay::Pump,
    ];

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|relay| relay.index() == index)
    }
}

impl fmt::Display for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Relay::Pump => f.write_str("pump"),
            valve => write!(f, "valve{}", valve.index()),
        }
    }
}

/// `{"relay<N>":"on"|"off"}`
pub fn relay_payload(index: u8, on: bool) -> Value {
    let mut body = Map::new();
    body.insert(
        format!("relay{index}"),
        Value::String(if on { "on" } else { "off" }.to_string()),
    );
    Value::Object(body)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEnvelope<'a> {
    pub configs: &'a [IrrigationConfig],
    /// Epoch milliseconds at send time
    pub timestamp: i64,
    pub total_configs: usize,
}

impl<'a> BatchEnvelope<'a> {
    pub fn new(configs: &'a [IrrigationConfig]) -> Self {
        Self {
            configs,
            timestamp: Utc::now().timestamp_millis(),
            total_configs: configs.len(),
        }
    }
}

pub struct CommandPublisher<C: Connector, A: SessionProvider> {
    supervisor: ConnectionSupervisor<C, A>,
}

impl<C: Connector, A: SessionProvider> CommandPublisher<C, A> {
    pub fn new(supervisor: ConnectionSupervisor<C, A>) -> Self {
        Self { supervisor }
    }

    /// Switches relay `index` (1-based). Indices are not range-checked; the
    /// device ignores unknown relays.
    pub fn publish_relay_command(&self, index: u8, on: bool) -> bool {
        debug!("Relay {} -> {}", index, if on { "on" } else { "off" });
        self.supervisor
            .publish_json(Channel::Control, &relay_payload(index, on), false)
    }

    pub fn switch(&self, relay: Relay, on: bool) -> bool {
        self.publish_relay_command(relay.index(), on)
    }

    pub fn send_irrigation_config(&self, config: &IrrigationConfig) -> bool {
        info!(
            "Sending irrigation config {} for {}",
            config.config_id, config.land_name
        );
        let sent = self
            .supervisor
            .publish_json(Channel::IrrigationConfig, config, true);
        if !sent {
            warn!("Irrigation config for {} was not sent", config.land_name);
        }
        sent
    }

    /// Sends every configuration in one retained message.
    pub fn send_batch(&self, configs: &[IrrigationConfig]) -> bool {
        if configs.is_empty() {
            info!("No configured lands, nothing to send");
            return false;
        }

        let envelope = BatchEnvelope::new(configs);
        let sent = self
            .supervisor
            .publish_json(Channel::IrrigationConfig, &envelope, true);
        if sent {
            let names: Vec<&str> = configs.iter().map(|c| c.land_name.as_str()).collect();
            info!(
                "Sent {} irrigation configs in one batch: {}",
                configs.len(),
                names.join(", ")
            );
        } else {
            warn!("Batch irrigation config was not sent");
        }
        sent
    }
}
