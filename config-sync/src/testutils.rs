use crate::action::{ActionError, UpdateAction};
use crate::builder::{BuildError, ResourceBuilder};
use crate::events::{ChangeEvent, EventPublisher};
use crate::replica::Replica;
use crate::snapshot::{Resource, Snapshot};
use crate::store::{DurableStore, StoreError, StoreEvent, Subscription};
use crate::types::{
    Cluster, ClusterBinding, ConfigVersion, Dataset, Gateway, Listener, ResourceKind,
    RouteConfig, Row, RowKey, Runtime,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc as std_mpsc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Two gateways. svcA is bound to both, everything else to one of them.
pub fn sample_dataset() -> Dataset {
    Dataset {
        gateways: vec![
            Gateway {
                name: "internal".into(),
            },
            Gateway {
                name: "public".into(),
            },
        ],
        clusters: vec![
            Cluster {
                name: "svcA".into(),
                spec: json!({"connect_timeout_ms": 250}),
                gateways: None,
            },
            Cluster {
                name: "svcB".into(),
                spec: json!({}),
                gateways: None,
            },
        ],
        cluster_gateways: vec![
            ClusterBinding {
                cluster: "svcA".into(),
                gateway: "internal".into(),
            },
            ClusterBinding {
                cluster: "svcA".into(),
                gateway: "public".into(),
            },
            ClusterBinding {
                cluster: "svcB".into(),
                gateway: "public".into(),
            },
        ],
        listeners: vec![Listener {
            name: "http".into(),
            gateway: "public".into(),
            spec: json!({"port": 80}),
        }],
        route_configs: vec![RouteConfig {
            name: "default".into(),
            gateway: "public".into(),
            spec: json!({"virtual_hosts": []}),
        }],
        runtimes: vec![Runtime {
            name: "flags".into(),
            gateway: "internal".into(),
            spec: json!({"overload.enabled": true}),
        }],
        config_versions: vec![ConfigVersion {
            gateway: "public".into(),
            kind: ResourceKind::Cluster,
            version: 3,
        }],
    }
}

/// Always fails with a build error.
#[derive(Debug)]
pub struct FailingAction;

impl UpdateAction for FailingAction {
    fn perform(&self, _snapshot: &Snapshot) -> Result<Snapshot, ActionError> {
        Err(ActionError::Build {
            kind: ResourceKind::Cluster,
            name: "broken".into(),
            source: BuildError::InvalidSpec {
                kind: ResourceKind::Cluster,
                name: "broken".into(),
                reason: "always fails".into(),
            },
        })
    }
}

/// Signals when it starts and blocks until released.
#[derive(Debug)]
pub struct SlowAction {
    started: std_mpsc::Sender<()>,
    release: Mutex<std_mpsc::Receiver<()>>,
}

impl SlowAction {
    pub fn new(started: std_mpsc::Sender<()>, release: std_mpsc::Receiver<()>) -> Self {
        SlowAction {
            started,
            release: Mutex::new(release),
        }
    }
}

impl UpdateAction for SlowAction {
    fn perform(&self, snapshot: &Snapshot) -> Result<Snapshot, ActionError> {
        let _ = self.started.send(());
        let _ = self.release.lock().recv();
        Ok(snapshot.clone())
    }
}

/// Fails the first `failures` builds, then renders empty resources.
pub struct FlakyBuilder {
    failures: u32,
    calls: AtomicU32,
}

impl FlakyBuilder {
    pub fn new(failures: u32) -> Self {
        FlakyBuilder {
            failures,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn attempt(&self, kind: ResourceKind, name: &str) -> Result<Resource, BuildError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            return Err(BuildError::InvalidSpec {
                kind,
                name: name.to_string(),
                reason: format!("build {call} fails"),
            });
        }
        Ok(Resource::new(name, json!({})))
    }
}

impl ResourceBuilder for FlakyBuilder {
    fn register_gateway(&self, _gateway: &Gateway) {}

    fn build_listener(&self, _gateway: &str, listener: &Listener) -> Result<Resource, BuildError> {
        self.attempt(ResourceKind::Listener, &listener.name)
    }

    fn build_cluster(&self, _gateway: &str, cluster: &Cluster) -> Result<Resource, BuildError> {
        self.attempt(ResourceKind::Cluster, &cluster.name)
    }

    fn build_route_config(
        &self,
        _gateway: &str,
        route: &RouteConfig,
    ) -> Result<Resource, BuildError> {
        self.attempt(ResourceKind::RouteConfig, &route.name)
    }

    fn build_runtime(&self, _gateway: &str, runtime: &Runtime) -> Result<Resource, BuildError> {
        self.attempt(ResourceKind::Runtime, &runtime.name)
    }
}

/// Durable store backed by a replica. Events are pushed by the test.
pub struct MemoryStore {
    tables: Replica,
    subscriber: Mutex<Option<mpsc::Sender<StoreEvent>>>,
    read_only: AtomicBool,
}

impl MemoryStore {
    pub fn new(dataset: Dataset) -> Self {
        MemoryStore {
            tables: Replica::from_dataset(dataset),
            subscriber: Mutex::new(None),
            read_only: AtomicBool::new(false),
        }
    }

    /// Makes every later write through the store trait fail.
    pub fn set_read_only(&self) {
        self.read_only.store(true, Ordering::SeqCst);
    }

    /// Commits a row without notifying.
    pub fn write(&self, row: Row) {
        self.tables.upsert(row);
    }

    pub async fn connect(&self) {
        self.send(StoreEvent::Connected).await;
    }

    pub async fn notify(&self, payload: &str) {
        self.send(StoreEvent::Notification(payload.to_string()))
            .await;
    }

    async fn send(&self, event: StoreEvent) {
        let tx = self.subscriber.lock().clone();
        if let Some(tx) = tx {
            tx.send(event).await.unwrap();
        }
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn load_all(&self) -> Result<Dataset, StoreError> {
        Ok(self.tables.dataset())
    }

    async fn load_row(&self, key: &RowKey) -> Result<Option<Row>, StoreError> {
        Ok(self.tables.get(key))
    }

    async fn listen(&self, _channel: &str) -> Result<Subscription, StoreError> {
        let (tx, rx) = mpsc::channel(16);
        *self.subscriber.lock() = Some(tx);
        Ok(rx)
    }

    async fn store_config_version(&self, version: &ConfigVersion) -> Result<(), StoreError> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store is read-only".into()));
        }
        self.tables.upsert(Row::ConfigVersion(version.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<(String, ChangeEvent)>>,
}

impl RecordingPublisher {
    /// Waits until at least `count` events were published.
    pub async fn wait_for(&self, count: usize) -> Vec<(String, ChangeEvent)> {
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                {
                    let events = self.events.lock();
                    if events.len() >= count {
                        return events.clone();
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap()
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, topic: &str, event: ChangeEvent) {
        self.events.lock().push((topic.to_string(), event));
    }
}

pub struct PanickingPublisher;

impl EventPublisher for PanickingPublisher {
    fn publish(&self, topic: &str, _event: ChangeEvent) {
        panic!("publishing to {topic} failed");
    }
}
