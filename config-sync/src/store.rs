//! Contract of the durable store the replica is synchronized from.

use crate::replica::Replica;
use crate::types::{ConfigVersion, Dataset, Row, RowKey};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

#[derive(Clone, Debug, PartialEq)]
pub enum StoreEvent {
    /// The subscription was (re)established. Anything delivered before this
    /// may have been missed.
    Connected,
    /// JSON encoded change notification, delivered at least once.
    Notification(String),
}

pub type Subscription = mpsc::Receiver<StoreEvent>;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("could not decode dataset: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Loads every replicated table.
    async fn load_all(&self) -> Result<Dataset, StoreError>;

    /// Point lookup of the authoritative row for `key`.
    async fn load_row(&self, key: &RowKey) -> Result<Option<Row>, StoreError>;

    /// Subscribes to change notifications published on `channel`.
    async fn listen(&self, channel: &str) -> Result<Subscription, StoreError>;

    /// Persists a config version. A stored version is never lowered.
    async fn store_config_version(&self, version: &ConfigVersion) -> Result<(), StoreError>;
}

/// Reads the dataset from a JSON file. The file is re-read on every load;
/// the subscription reports a single connect and no notifications.
pub struct FilesystemStore {
    path: PathBuf,
    // Keeps subscriptions open for the lifetime of the store.
    subscribers: Mutex<Vec<mpsc::Sender<StoreEvent>>>,
    // Serializes read-modify-write cycles on the file
    write_lock: tokio::sync::Mutex<()>,
}

impl FilesystemStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        FilesystemStore {
            path: path.as_ref().to_path_buf(),
            subscribers: Mutex::new(Vec::new()),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    async fn store(&self, dataset: &Dataset) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(dataset)?;
        tokio::fs::write(&self.path, data).await?;
        Ok(())
    }
}

#[async_trait]
impl DurableStore for FilesystemStore {
    async fn load_all(&self) -> Result<Dataset, StoreError> {
        let data = tokio::fs::read(&self.path).await?;
        let dataset: Dataset = serde_json::from_slice(&data)?;
        tracing::debug!(path = ?self.path, "Loaded dataset from file");
        Ok(dataset)
    }

    async fn load_row(&self, key: &RowKey) -> Result<Option<Row>, StoreError> {
        let dataset = self.load_all().await?;
        Ok(Replica::from_dataset(dataset).get(key))
    }

    async fn listen(&self, channel: &str) -> Result<Subscription, StoreError> {
        let (tx, rx) = mpsc::channel(1);
        tx.try_send(StoreEvent::Connected)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        self.subscribers.lock().push(tx);
        tracing::info!(channel, path = ?self.path, "Subscribed to filesystem store");
        Ok(rx)
    }

    async fn store_config_version(&self, version: &ConfigVersion) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut dataset = self.load_all().await?;

        let existing = dataset
            .config_versions
            .iter_mut()
            .find(|v| v.gateway == version.gateway && v.kind == version.kind);
        match existing {
            Some(existing) if existing.version >= version.version => return Ok(()),
            Some(existing) => existing.version = version.version,
            None => dataset.config_versions.push(version.clone()),
        }

        self.store(&dataset).await?;
        tracing::debug!(
            gateway = %version.gateway,
            kind = %version.kind,
            version = version.version,
            "Stored config version"
        );
        Ok(())
    }
}
