//! Application configuration.
//!
//! One TOML file, every section optional. A missing file is not an error:
//! the link then runs on defaults, which lets a fresh install start up and
//! log where it looked.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::mqtt::config::{BrokerSettings, TopicSettings};
use crate::supervisor::backoff::ReconnectPolicy;
use crate::supervisor::SupervisorSettings;

const CONFIG_DIR: &str = ".config/fertigation-link";
const CONFIG_FILE: &str = "config.toml";

/// Overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "FERTIGATION_LINK_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatSettings {
    /// 0 disables the heartbeat
    pub interval_secs: u64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub broker: BrokerSettings,
    pub topics: TopicSettings,
    pub reconnect: ReconnectPolicy,
    pub heartbeat: HeartbeatSettings,
}

impl AppConfig {
    /// Loads from [`CONFIG_PATH_ENV`] if set, else from the default location.
    pub async fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_path()).await
    }

    pub async fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        if !exists {
            warn!(
                "Config file {} does not exist, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let config = Self::parse(path, &content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(path: &Path, content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn supervisor_settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            broker: self.broker.clone(),
            topics: self.topics.registry(),
            reconnect: self.reconnect.clone(),
            heartbeat_interval: Duration::from_secs(self.heartbeat.interval_secs),
        }
    }
}

pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }
    let mut path = get_home_dir();
    path.push(CONFIG_DIR);
    path.push(CONFIG_FILE);
    path
}

fn get_home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| {
        warn!("Could not determine home directory, using current directory");
        PathBuf::from(".")
    })
}
