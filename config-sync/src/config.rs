use crate::manager::RetryPolicy;
use serde::Deserialize;
use std::time::Duration;

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum DurableStoreType {
    Filesystem { path: String },
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct DurableStoreConfig {
    #[serde(flatten)]
    pub r#type: DurableStoreType,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct ReplicationConfig {
    #[serde(default = "default_channel")]
    pub channel: String,
}

fn default_channel() -> String {
    "config_changes".into()
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        ReplicationConfig {
            channel: default_channel(),
        }
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct BootstrapConfig {
    pub attempts: u32,
    pub delay_secs: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        BootstrapConfig {
            attempts: policy.attempts,
            delay_secs: policy.delay.as_secs(),
        }
    }
}

impl BootstrapConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.attempts,
            delay: Duration::from_secs(self.delay_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_durable_store_config() {
        let config: DurableStoreConfig =
            serde_yaml::from_str("type: filesystem\npath: /var/lib/control-plane/dataset.json")
                .unwrap();
        assert_eq!(
            config.r#type,
            DurableStoreType::Filesystem {
                path: "/var/lib/control-plane/dataset.json".into()
            }
        );

        assert!(serde_yaml::from_str::<DurableStoreConfig>("type: postgres").is_err());
    }

    #[test]
    fn test_bootstrap_defaults() {
        let config: BootstrapConfig = serde_yaml::from_str("delay_secs: 1").unwrap();
        assert_eq!(
            config.retry_policy(),
            RetryPolicy {
                attempts: 40,
                delay: Duration::from_secs(1),
            }
        );
        assert_eq!(ReplicationConfig::default().channel, "config_changes");
    }
}
