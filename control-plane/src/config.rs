use config_sync::config::{BootstrapConfig, DurableStoreConfig, ReplicationConfig};
use serde::Deserialize;
use std::fs::File;

#[derive(Deserialize, Debug, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 9000,
        }
    }
}

#[derive(Deserialize, Debug, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Deserialize, Debug, PartialEq)]
pub struct LoggingConfig {
    pub sentry_dsn: String,
}

#[derive(Deserialize, Debug)]
pub struct Config {
    #[serde(default)]
    pub admin_listener: Listener,
    pub durable_store: DurableStoreConfig,
    #[serde(default)]
    pub replication: ReplicationConfig,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config: Config = serde_yaml::from_reader(file)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.admin_listener.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "admin_listener.port must not be 0".into(),
            ));
        }
        if self.bootstrap.attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "bootstrap.attempts must be at least 1".into(),
            ));
        }
        if self.replication.channel.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "replication.channel must not be empty".into(),
            ));
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}
