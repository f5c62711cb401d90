pub mod action;
pub mod actions_map;
pub mod builder;
pub mod config;
pub mod events;
pub mod factory;
pub mod manager;
pub mod metrics_defs;
pub mod replica;
pub mod replication;
pub mod snapshot;
pub mod store;
pub mod translator;
pub mod types;

#[cfg(test)]
mod testutils;

use config::{DurableStoreConfig, DurableStoreType};
use std::sync::Arc;
use store::{DurableStore, FilesystemStore};

pub use manager::{BootstrapError, RetryPolicy, SnapshotCacheManager};
pub use replication::{ReplicationError, ReplicationListener};

/// Returns the durable store for the configured backend.
pub fn get_store(config: &DurableStoreConfig) -> Arc<dyn DurableStore> {
    match &config.r#type {
        DurableStoreType::Filesystem { path } => Arc::new(FilesystemStore::new(path)),
    }
}
