use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::topics::{TopicRegistry, DEFAULT_TOPIC_PREFIX};
use super::transport::Endpoint;

/// Broker endpoint and session parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    /// WebSocket path on the broker, usually `/mqtt`
    pub path: String,
    pub username: String,
    pub password: String,
    pub keep_alive_secs: u64,
    pub connect_timeout_ms: u64,
    pub clean_session: bool,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8884,
            path: "/mqtt".to_string(),
            username: String::new(),
            password: String::new(),
            keep_alive_secs: 30,
            connect_timeout_ms: 10_000,
            clean_session: true,
        }
    }
}

impl BrokerSettings {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            port: self.port,
            path: self.path.clone(),
        }
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicSettings {
    pub prefix: String,
}

impl Default for TopicSettings {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_TOPIC_PREFIX.to_string(),
        }
    }
}

impl TopicSettings {
    pub fn registry(&self) -> TopicRegistry {
        TopicRegistry::new(self.prefix.clone())
    }
}
