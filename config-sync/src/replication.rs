use crate::events::{ChangeEvent, EventPublisher, PartialReloadEvent};
use crate::metrics_defs::{
    POST_PROCESSING_PANICS, REPLICATION_DROPPED, REPLICATION_NOTIFICATIONS,
    REPLICATION_RESYNC_DURATION,
};
use crate::replica::Replica;
use crate::store::{DurableStore, StoreError, StoreEvent, Subscription};
use crate::types::{ChangeRecord, ConfigVersion, Operation, ResourceKind, Row, RowKey, Table};
use serde::Deserialize;
use serde_json::{Map, Value};
use shared::{counter, histogram};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::{AbortHandle, JoinHandle};

pub const CONFIG_VERSIONS_TOPIC: &str = "config_versions";

#[derive(thiserror::Error, Debug)]
pub enum ReplicationError {
    #[error("could not reload the replica: {0}")]
    Resync(#[source] StoreError),
    #[error("could not decode notification: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("could not apply notification for {table}: {reason}")]
    Apply { table: Table, reason: String },
    #[error("durable store error: {0}")]
    Store(#[source] StoreError),
}

// Only `entity` is required up front. The remaining fields are read once the
// table is known, so notifications for other tables may have any shape.
#[derive(Deserialize, Debug)]
struct Notification {
    entity: String,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl Notification {
    fn is_delete(&self) -> Result<bool, String> {
        let operation = field(&self.fields, "operation")?;
        Ok(operation.eq_ignore_ascii_case("DELETE"))
    }
}

type KeyFn = fn(&Map<String, Value>) -> Result<RowKey, String>;

/// How notifications for one table are resolved to a row key.
struct TableMapping {
    table: Table,
    key: KeyFn,
}

fn field(fields: &Map<String, Value>, name: &str) -> Result<String, String> {
    match fields.get(name) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(format!("field {name} is not a string: {other}")),
        None => Err(format!("missing key field {name}")),
    }
}

fn table_mappings() -> HashMap<&'static str, TableMapping> {
    let mappings: [(Table, KeyFn); 7] = [
        (Table::Gateways, |f| Ok(RowKey::Gateway(field(f, "name")?))),
        (Table::Clusters, |f| Ok(RowKey::Cluster(field(f, "name")?))),
        (Table::ClusterGateways, |f| {
            Ok(RowKey::ClusterBinding {
                cluster: field(f, "cluster")?,
                gateway: field(f, "gateway")?,
            })
        }),
        (Table::Listeners, |f| {
            Ok(RowKey::Listener {
                gateway: field(f, "gateway")?,
                name: field(f, "name")?,
            })
        }),
        (Table::RouteConfigs, |f| {
            Ok(RowKey::RouteConfig {
                gateway: field(f, "gateway")?,
                name: field(f, "name")?,
            })
        }),
        (Table::Runtimes, |f| {
            Ok(RowKey::Runtime {
                gateway: field(f, "gateway")?,
                name: field(f, "name")?,
            })
        }),
        (Table::ConfigVersions, |f| {
            let kind: ResourceKind = field(f, "kind")?
                .parse()
                .map_err(|e| format!("{e}"))?;
            Ok(RowKey::ConfigVersion {
                gateway: field(f, "gateway")?,
                kind,
            })
        }),
    ];

    mappings
        .into_iter()
        .map(|(table, key)| (table.as_str(), TableMapping { table, key }))
        .collect()
}

struct ListenerInner {
    store: Arc<dyn DurableStore>,
    replica: Arc<Replica>,
    publisher: Arc<dyn EventPublisher>,
    channel: String,
    mappings: HashMap<&'static str, TableMapping>,
    // Serializes resyncs and notification handling.
    lock: Mutex<()>,
    versions: broadcast::Sender<ConfigVersion>,
    synced: watch::Sender<bool>,
}

/// Keeps the replica in sync with the durable store by applying change
/// notifications as they arrive.
pub struct ReplicationListener {
    inner: Arc<ListenerInner>,
    worker: parking_lot::Mutex<Option<AbortHandle>>,
}

impl ReplicationListener {
    pub fn new(
        store: Arc<dyn DurableStore>,
        replica: Arc<Replica>,
        publisher: Arc<dyn EventPublisher>,
        channel: impl Into<String>,
    ) -> Self {
        let (versions, _) = broadcast::channel(64);
        let (synced, _) = watch::channel(false);

        ReplicationListener {
            inner: Arc::new(ListenerInner {
                store,
                replica,
                publisher,
                channel: channel.into(),
                mappings: table_mappings(),
                lock: Mutex::new(()),
                versions,
                synced,
            }),
            worker: parking_lot::Mutex::new(None),
        }
    }

    /// Subscribes to the store and spawns the worker. The returned handle
    /// resolves with the error that stopped the worker, or `Ok` when the
    /// subscription ended.
    pub async fn start(
        &self,
    ) -> Result<JoinHandle<Result<(), ReplicationError>>, ReplicationError> {
        let subscription = self
            .inner
            .store
            .listen(&self.inner.channel)
            .await
            .map_err(ReplicationError::Store)?;
        tracing::info!(
            channel = %self.inner.channel,
            "Listening for replication notifications"
        );

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let result = inner.run(subscription).await;
            if let Err(err) = &result {
                tracing::error!(error = %err, "Replication worker stopped");
            }
            result
        });

        if let Some(previous) = self.worker.lock().replace(handle.abort_handle()) {
            previous.abort();
        }
        Ok(handle)
    }

    /// Stops the worker, which releases the subscription.
    pub fn close(&self) {
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
            tracing::info!("Replication listener closed");
        }
    }

    /// Reloads every table from the store.
    pub async fn resync(&self) -> Result<(), ReplicationError> {
        self.inner.clone().resync().await
    }

    /// Applies a single JSON notification.
    pub async fn handle_notification(&self, payload: &str) -> Result<(), ReplicationError> {
        self.inner.clone().handle_notification(payload).await
    }

    /// Resolves once the replica has been loaded at least once.
    pub async fn wait_synced(&self) {
        let mut synced = self.inner.synced.subscribe();
        // The sender lives as long as `self`
        let _ = synced.wait_for(|synced| *synced).await;
    }

    pub fn is_synced(&self) -> bool {
        *self.inner.synced.borrow()
    }

    /// Config versions as they are replicated.
    pub fn subscribe_versions(&self) -> broadcast::Receiver<ConfigVersion> {
        self.inner.versions.subscribe()
    }
}

impl Drop for ReplicationListener {
    fn drop(&mut self) {
        self.close();
    }
}

impl ListenerInner {
    async fn run(self: Arc<Self>, mut subscription: Subscription) -> Result<(), ReplicationError> {
        while let Some(event) = subscription.recv().await {
            match event {
                // Missed notifications are covered by the reload
                StoreEvent::Connected => self.clone().resync().await?,
                StoreEvent::Notification(payload) => {
                    self.clone().handle_notification(&payload).await?
                }
            }
        }

        tracing::info!(channel = %self.channel, "Replication subscription ended");
        Ok(())
    }

    /// Reloads every table. On a reconnect, config versions that moved while
    /// the subscription was down are published like replicated ones.
    async fn resync(self: Arc<Self>) -> Result<(), ReplicationError> {
        let _guard = self.lock.lock().await;
        let start = Instant::now();
        let reconnect = *self.synced.borrow();

        let dataset = self
            .store
            .load_all()
            .await
            .map_err(ReplicationError::Resync)?;
        let changed = self.replica.replace_all(dataset);

        histogram!(REPLICATION_RESYNC_DURATION).record(start.elapsed().as_secs_f64());
        self.synced.send_replace(true);
        tracing::info!(
            elapsed = ?start.elapsed(),
            changed_versions = changed.len(),
            "Replica resynced from durable store"
        );

        if reconnect && !changed.is_empty() {
            self.clone().spawn_post_processing(changed);
        }
        Ok(())
    }

    async fn handle_notification(self: Arc<Self>, payload: &str) -> Result<(), ReplicationError> {
        counter!(REPLICATION_NOTIFICATIONS).increment(1);
        let notification: Notification = serde_json::from_str(payload)?;

        let Some(mapping) = self.mappings.get(notification.entity.as_str()) else {
            counter!(REPLICATION_DROPPED).increment(1);
            tracing::warn!(
                entity = %notification.entity,
                "Dropping notification for unknown table"
            );
            return Ok(());
        };
        let table = mapping.table;
        let apply_error = |reason: String| ReplicationError::Apply { table, reason };
        let is_delete = notification.is_delete().map_err(apply_error)?;
        let key = (mapping.key)(&notification.fields).map_err(apply_error)?;

        let change = {
            let _guard = self.lock.lock().await;
            if is_delete {
                self.replica.delete(&key)
            } else {
                self.reload(key).await?
            }
        };

        match change {
            Some(ChangeRecord {
                operation: Operation::Upsert,
                row: Row::ConfigVersion(version),
                ..
            }) => self.spawn_post_processing(vec![version]),
            Some(_) => {}
            None => tracing::debug!(%table, "Notification did not change the replica"),
        }
        Ok(())
    }

    async fn reload(&self, key: RowKey) -> Result<Option<ChangeRecord>, ReplicationError> {
        let row = self
            .store
            .load_row(&key)
            .await
            .map_err(ReplicationError::Store)?;

        match row {
            Some(row) if row.table() != key.table() => Err(ReplicationError::Apply {
                table: key.table(),
                reason: format!("store returned a row of {}", row.table()),
            }),
            Some(row) => Ok(Some(self.replica.upsert(row))),
            None => {
                // Deleted again before it could be loaded
                tracing::debug!(?key, "Row no longer exists in the durable store");
                Ok(None)
            }
        }
    }

    fn spawn_post_processing(self: Arc<Self>, versions: Vec<ConfigVersion>) {
        let handle = tokio::spawn(async move { self.post_process(versions) });

        tokio::spawn(async move {
            if let Err(e) = handle.await
                && e.is_panic()
            {
                counter!(POST_PROCESSING_PANICS).increment(1);
                tracing::error!("Post-processing task panicked: {}", e);
            }
        });
    }

    fn post_process(&self, versions: Vec<ConfigVersion>) {
        for version in &versions {
            // No watchers is fine
            let _ = self.versions.send(version.clone());
        }
        self.publisher.publish(
            CONFIG_VERSIONS_TOPIC,
            ChangeEvent::PartialReload(PartialReloadEvent { versions }),
        );
    }
}
