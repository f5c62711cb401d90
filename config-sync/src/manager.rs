use crate::action::{ActionError, CompositeAction, UpdateAction, UpsertAction};
use crate::builder::ResourceBuilder;
use crate::events::{
    ChangeEvent, GatewayChangeEvent, MultiGatewayChangeEvent, PartialReloadEvent,
};
use crate::metrics_defs::{
    BOOTSTRAP_ATTEMPTS, GATEWAYS, SNAPSHOT_PARTIAL_UPDATES, SNAPSHOT_UPDATE_FAILURES,
    SNAPSHOT_UPDATES,
};
use crate::replica::Replica;
use crate::snapshot::Snapshot;
use crate::store::{DurableStore, StoreError};
use crate::translator::{ChangeTranslator, TranslateError};
use crate::types::{Cluster, ConfigVersion, GatewayName, ResourceKind};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use shared::{counter, gauge};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(thiserror::Error, Debug)]
pub enum ManagerError {
    #[error("snapshot update for gateway {gateway} failed: {source}")]
    Action {
        gateway: GatewayName,
        #[source]
        source: ActionError,
    },
    #[error("could not translate change event: {0}")]
    Translate(#[from] TranslateError),
    #[error("snapshot updates failed for gateways: {}", .0.join(", "))]
    UpdatesFailed(Vec<GatewayName>),
}

#[derive(thiserror::Error, Debug)]
pub enum BootstrapError {
    #[error("could not bootstrap gateway {gateway}: {source}")]
    Update {
        gateway: GatewayName,
        #[source]
        source: ActionError,
    },
    #[error("could not store config version of gateway {gateway}: {source}")]
    Store {
        gateway: GatewayName,
        #[source]
        source: StoreError,
    },
    #[error("bootstrap failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<BootstrapError>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 40,
            delay: Duration::from_secs(5),
        }
    }
}

struct GatewaySlot {
    // Held for the whole read-modify-publish cycle
    update_lock: Mutex<()>,
    current: RwLock<Arc<Snapshot>>,
}

impl GatewaySlot {
    fn new() -> Self {
        GatewaySlot {
            update_lock: Mutex::new(()),
            current: RwLock::new(Arc::new(Snapshot::empty())),
        }
    }
}

/// Owns one snapshot per gateway and serializes updates per gateway.
/// Updates to different gateways never wait on each other.
pub struct SnapshotCacheManager {
    slots: DashMap<GatewayName, Arc<GatewaySlot>>,
    store: Arc<dyn DurableStore>,
    replica: Arc<Replica>,
    builder: Arc<dyn ResourceBuilder>,
    translator: Arc<dyn ChangeTranslator>,
    // Set once the initial bootstrap succeeded. Used by the readiness probe.
    ready: AtomicBool,
}

impl SnapshotCacheManager {
    pub fn new(
        store: Arc<dyn DurableStore>,
        replica: Arc<Replica>,
        builder: Arc<dyn ResourceBuilder>,
        translator: Arc<dyn ChangeTranslator>,
    ) -> Self {
        SnapshotCacheManager {
            slots: DashMap::new(),
            store,
            replica,
            builder,
            translator,
            ready: AtomicBool::new(false),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    /// Current snapshot of a gateway, if it was ever accessed.
    pub fn snapshot(&self, gateway: &str) -> Option<Arc<Snapshot>> {
        let slot = self.slots.get(gateway)?.clone();
        let snapshot = slot.current.read().clone();
        Some(snapshot)
    }

    pub fn gateways(&self) -> Vec<GatewayName> {
        let mut gateways: Vec<_> = self.slots.iter().map(|e| e.key().clone()).collect();
        gateways.sort();
        gateways
    }

    /// Bucket versions of every gateway snapshot.
    pub fn status(&self) -> BTreeMap<GatewayName, BTreeMap<&'static str, String>> {
        self.gateways()
            .into_iter()
            .filter_map(|gateway| {
                let versions = self.snapshot(&gateway)?.versions();
                Some((gateway, versions))
            })
            .collect()
    }

    fn slot(&self, gateway: &str) -> Arc<GatewaySlot> {
        if let Some(slot) = self.slots.get(gateway) {
            return slot.clone();
        }
        // The map guard must be dropped before the slot is locked
        let slot = self
            .slots
            .entry(gateway.to_string())
            .or_insert_with(|| Arc::new(GatewaySlot::new()))
            .clone();
        gauge!(GATEWAYS).set(self.slots.len() as f64);
        slot
    }

    /// Applies `action` to the gateway's current snapshot and publishes the
    /// result. On a partial failure the advanced snapshot is still published
    /// and the error is returned; on any other error the previous snapshot
    /// stays current.
    pub fn update_snapshot(
        &self,
        gateway: &str,
        action: &dyn UpdateAction,
    ) -> Result<Arc<Snapshot>, ActionError> {
        let slot = self.slot(gateway);
        let _guard = slot.update_lock.lock();

        let current = slot.current.read().clone();
        match action.perform(&current) {
            Ok(next) => {
                let next = Arc::new(next);
                *slot.current.write() = next.clone();
                counter!(SNAPSHOT_UPDATES).increment(1);
                Ok(next)
            }
            Err(ActionError::PartialFailure {
                snapshot,
                failures,
                total,
            }) => {
                *slot.current.write() = Arc::new((*snapshot).clone());
                counter!(SNAPSHOT_PARTIAL_UPDATES).increment(1);
                tracing::warn!(
                    gateway,
                    failures,
                    total,
                    "Published partially updated snapshot"
                );
                Err(ActionError::PartialFailure {
                    snapshot,
                    failures,
                    total,
                })
            }
            Err(err) => {
                counter!(SNAPSHOT_UPDATE_FAILURES).increment(1);
                Err(err)
            }
        }
    }

    pub fn handle_change_event(&self, event: &GatewayChangeEvent) -> Result<(), ManagerError> {
        let action = self.translator.parse_change_event(event)?;
        self.update_snapshot(&event.gateway, action.as_ref())
            .map_err(|source| {
                tracing::error!(
                    gateway = %event.gateway,
                    error = %source,
                    "Snapshot update failed"
                );
                ManagerError::Action {
                    gateway: event.gateway.clone(),
                    source,
                }
            })?;
        Ok(())
    }

    pub fn handle_multiple_change_event(
        &self,
        event: &MultiGatewayChangeEvent,
    ) -> Result<(), ManagerError> {
        let actions = self.translator.parse_multiple_change_event(event)?;
        self.update_gateways(actions)
    }

    pub fn handle_partial_reload_event(
        &self,
        event: &PartialReloadEvent,
    ) -> Result<(), ManagerError> {
        let actions = self.translator.parse_partial_reload_event(event)?;
        self.update_gateways(actions)
    }

    pub fn handle_event(&self, event: &ChangeEvent) -> Result<(), ManagerError> {
        match event {
            ChangeEvent::Gateway(e) => self.handle_change_event(e),
            ChangeEvent::MultiGateway(e) => self.handle_multiple_change_event(e),
            ChangeEvent::PartialReload(e) => self.handle_partial_reload_event(e),
        }
    }

    /// Applies one update per cluster and gateway the cluster is bound to,
    /// grouped into a single update per gateway. Every gateway is attempted.
    pub fn bulk_update_clusters<F>(
        &self,
        version: u64,
        clusters: &[Cluster],
        action_provider: F,
    ) -> Result<(), ManagerError>
    where
        F: Fn(&str, &Cluster, u64) -> Box<dyn UpdateAction>,
    {
        let mut per_gateway: BTreeMap<GatewayName, CompositeAction> = BTreeMap::new();
        for cluster in clusters {
            let gateways = match &cluster.gateways {
                Some(gateways) => gateways.clone(),
                None => self.replica.gateways_for_cluster(&cluster.name),
            };
            for gateway in gateways {
                let action = action_provider(&gateway, cluster, version);
                per_gateway.entry(gateway).or_default().push(action);
            }
        }

        self.update_gateways(per_gateway.into_iter().map(|(gateway, composite)| {
            let action: Box<dyn UpdateAction> = Box::new(composite);
            (gateway, action)
        }))
    }

    fn update_gateways<I>(&self, actions: I) -> Result<(), ManagerError>
    where
        I: IntoIterator<Item = (GatewayName, Box<dyn UpdateAction>)>,
    {
        let mut failed = Vec::new();
        for (gateway, action) in actions {
            if let Err(err) = self.update_snapshot(&gateway, action.as_ref()) {
                tracing::error!(gateway, error = %err, "Snapshot update failed");
                failed.push(gateway);
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            failed.sort();
            Err(ManagerError::UpdatesFailed(failed))
        }
    }

    /// Returns the config version of `kind` for a gateway. A missing version
    /// is created at 1 and written to the durable store before it is used.
    async fn bootstrap_version(
        &self,
        gateway: &str,
        kind: ResourceKind,
    ) -> Result<u64, BootstrapError> {
        if let Some(version) = self.replica.config_version(gateway, kind) {
            return Ok(version);
        }

        let created = ConfigVersion {
            gateway: gateway.to_string(),
            kind,
            version: 1,
        };
        self.store
            .store_config_version(&created)
            .await
            .map_err(|source| BootstrapError::Store {
                gateway: gateway.to_string(),
                source,
            })?;
        tracing::debug!(gateway, %kind, "Created config version");

        // A replicated version may have arrived in the meantime
        Ok(self
            .replica
            .load_or_create_config_version(gateway, kind)
            .version)
    }

    /// Builds the snapshot of every known gateway from the replica.
    pub async fn init_config(&self) -> Result<(), BootstrapError> {
        for gateway in self.replica.gateways() {
            self.builder.register_gateway(&gateway);

            let mut composite = CompositeAction::default();
            for kind in ResourceKind::BUILT {
                let version = self.bootstrap_version(&gateway.name, kind).await?;
                for entity in self.replica.entities_for(&gateway.name, kind) {
                    composite.push(Box::new(UpsertAction::deferred(
                        &gateway.name,
                        entity,
                        version,
                        self.builder.clone(),
                    )));
                }
            }

            let resources = composite.len();
            self.update_snapshot(&gateway.name, &composite)
                .map_err(|source| BootstrapError::Update {
                    gateway: gateway.name.clone(),
                    source,
                })?;
            tracing::info!(
                gateway = %gateway.name,
                resources,
                "Bootstrapped gateway snapshot"
            );
        }

        self.ready.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Runs [`Self::init_config`] until it succeeds, waiting a fixed delay
    /// between attempts. Running out of attempts is not recoverable.
    pub async fn init_config_with_retry(
        &self,
        policy: &RetryPolicy,
    ) -> Result<(), BootstrapError> {
        let attempts = policy.attempts.max(1);
        let mut attempt = 1;

        loop {
            counter!(BOOTSTRAP_ATTEMPTS).increment(1);
            match self.init_config().await {
                Ok(()) => {
                    tracing::info!(attempt, "Snapshot cache bootstrapped");
                    return Ok(());
                }
                Err(err) if attempt >= attempts => {
                    return Err(BootstrapError::Exhausted {
                        attempts,
                        last: Box::new(err),
                    });
                }
                Err(err) => {
                    tracing::error!(
                        attempt,
                        attempts,
                        error = %err,
                        "Bootstrap attempt failed, retrying"
                    );
                }
            }

            attempt += 1;
            tokio::time::sleep(policy.delay).await;
        }
    }

    /// Applies published change events until the channel closes.
    pub fn spawn_event_consumer(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<ChangeEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let Err(err) = self.handle_event(&event) {
                    tracing::error!(error = %err, "Failed to apply change event");
                }
            }
            tracing::debug!("Change event channel closed");
        })
    }
}
