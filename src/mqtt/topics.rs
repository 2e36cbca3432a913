//! Logical channels and their wire topics.
//!
//! Every topic the dashboard talks on lives under one fixed prefix. The rest
//! of the crate only ever names a [`Channel`]; the wire string is produced
//! here and nowhere else. Renaming a suffix is a wire-protocol break for the
//! device firmware.

use std::fmt;

pub const DEFAULT_TOPIC_PREFIX: &str = "silagung";

const CHANNEL_COUNT: usize = 7;

/// The fixed set of application channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Telemetry stream from the field device.
    Sensor,
    /// Relay commands to the device.
    Control,
    /// Application-level liveness beacon, nested under `control`.
    Heartbeat,
    System,
    Config,
    /// Retained irrigation configuration for the device.
    IrrigationConfig,
    /// Last-will target announcing an abrupt disconnect.
    Warning,
}

impl Channel {
    pub const ALL: [Channel; CHANNEL_COUNT] = [
        Channel::Sensor,
        Channel::Control,
        Channel::Heartbeat,
        Channel::System,
        Channel::Config,
        Channel::IrrigationConfig,
        Channel::Warning,
    ];

    fn suffix(self) -> &'static str {
        match self {
            Channel::Sensor => "sensor",
            Channel::Control => "control",
            Channel::Heartbeat => "control/heartbeat",
            Channel::System => "system",
            Channel::Config => "config",
            Channel::IrrigationConfig => "irrigation/config",
            Channel::Warning => "status/warning",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Channel::Sensor => "sensor",
            Channel::Control => "control",
            Channel::Heartbeat => "heartbeat",
            Channel::System => "system",
            Channel::Config => "config",
            Channel::IrrigationConfig => "irrigationConfig",
            Channel::Warning => "warning",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Immutable channel ↔ wire topic table, built once per process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicRegistry {
    prefix: String,
    wire: [String; CHANNEL_COUNT],
}

impl TopicRegistry {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let prefix = prefix.trim_end_matches('/').to_string();
        let wire = Channel::ALL.map(|channel| format!("{}/{}", prefix, channel.suffix()));
        Self { prefix, wire }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn wire(&self, channel: Channel) -> &str {
        // ALL is in declaration order
        &self.wire[channel as usize]
    }

    /// Maps a wire topic back to its channel. Wildcards are not expanded.
    pub fn resolve(&self, topic: &str) -> Option<Channel> {
        Channel::ALL
            .iter()
            .zip(self.wire.iter())
            .find(|(_, wire)| wire.as_str() == topic)
            .map(|(channel, _)| *channel)
    }
}

impl Default for TopicRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_PREFIX)
    }
}
