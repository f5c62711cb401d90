//! In-memory replica of the durable store.

use crate::types::{
    ChangeRecord, Cluster, ClusterBinding, ConfigVersion, Dataset, Entity, Gateway, GatewayName,
    Listener, Operation, ResourceKind, RouteConfig, Row, RowKey, Runtime,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};

fn scoped(gateway: &str, name: &str) -> (String, String) {
    (gateway.to_string(), name.to_string())
}

#[derive(Default)]
struct Tables {
    gateways: BTreeMap<String, Gateway>,
    clusters: BTreeMap<String, Cluster>,
    // (cluster, gateway)
    cluster_gateways: BTreeSet<(String, String)>,
    // Keyed by (gateway, name)
    listeners: BTreeMap<(String, String), Listener>,
    route_configs: BTreeMap<(String, String), RouteConfig>,
    runtimes: BTreeMap<(String, String), Runtime>,
    config_versions: BTreeMap<(String, ResourceKind), u64>,
}

impl Tables {
    fn from_dataset(dataset: Dataset) -> Self {
        let mut tables = Tables::default();
        for gateway in dataset.gateways {
            tables.gateways.insert(gateway.name.clone(), gateway);
        }
        for mut cluster in dataset.clusters {
            // Bindings are kept in their own table
            for gateway in cluster.gateways.take().unwrap_or_default() {
                tables
                    .cluster_gateways
                    .insert((cluster.name.clone(), gateway));
            }
            tables.clusters.insert(cluster.name.clone(), cluster);
        }
        for binding in dataset.cluster_gateways {
            tables
                .cluster_gateways
                .insert((binding.cluster, binding.gateway));
        }
        for listener in dataset.listeners {
            tables
                .listeners
                .insert(scoped(&listener.gateway, &listener.name), listener);
        }
        for route in dataset.route_configs {
            tables
                .route_configs
                .insert(scoped(&route.gateway, &route.name), route);
        }
        for runtime in dataset.runtimes {
            tables
                .runtimes
                .insert(scoped(&runtime.gateway, &runtime.name), runtime);
        }
        for version in dataset.config_versions {
            let entry = tables
                .config_versions
                .entry((version.gateway, version.kind))
                .or_default();
            *entry = (*entry).max(version.version);
        }
        tables
    }

    fn gateways_for_cluster(&self, cluster: &str) -> Vec<GatewayName> {
        self.cluster_gateways
            .iter()
            .filter(|(c, _)| c == cluster)
            .map(|(_, gateway)| gateway.clone())
            .collect()
    }

    fn affected_gateways(&self, row: &Row) -> Vec<GatewayName> {
        match row {
            Row::Gateway(g) => vec![g.name.clone()],
            Row::Cluster(c) => self.gateways_for_cluster(&c.name),
            Row::ClusterBinding(b) => vec![b.gateway.clone()],
            Row::Listener(l) => vec![l.gateway.clone()],
            Row::RouteConfig(r) => vec![r.gateway.clone()],
            Row::Runtime(r) => vec![r.gateway.clone()],
            Row::ConfigVersion(v) => vec![v.gateway.clone()],
        }
    }

    fn get(&self, key: &RowKey) -> Option<Row> {
        match key {
            RowKey::Gateway(name) => self.gateways.get(name).cloned().map(Row::Gateway),
            RowKey::Cluster(name) => self.clusters.get(name).cloned().map(Row::Cluster),
            RowKey::ClusterBinding { cluster, gateway } => self
                .cluster_gateways
                .contains(&(cluster.clone(), gateway.clone()))
                .then(|| {
                    Row::ClusterBinding(ClusterBinding {
                        cluster: cluster.clone(),
                        gateway: gateway.clone(),
                    })
                }),
            RowKey::Listener { gateway, name } => self
                .listeners
                .get(&scoped(gateway, name))
                .cloned()
                .map(Row::Listener),
            RowKey::RouteConfig { gateway, name } => self
                .route_configs
                .get(&scoped(gateway, name))
                .cloned()
                .map(Row::RouteConfig),
            RowKey::Runtime { gateway, name } => self
                .runtimes
                .get(&scoped(gateway, name))
                .cloned()
                .map(Row::Runtime),
            RowKey::ConfigVersion { gateway, kind } => self
                .config_versions
                .get(&(gateway.clone(), *kind))
                .map(|version| {
                    Row::ConfigVersion(ConfigVersion {
                        gateway: gateway.clone(),
                        kind: *kind,
                        version: *version,
                    })
                }),
        }
    }

    fn remove(&mut self, key: &RowKey) -> bool {
        match key {
            RowKey::Gateway(name) => self.gateways.remove(name).is_some(),
            RowKey::Cluster(name) => self.clusters.remove(name).is_some(),
            RowKey::ClusterBinding { cluster, gateway } => self
                .cluster_gateways
                .remove(&(cluster.clone(), gateway.clone())),
            RowKey::Listener { gateway, name } => {
                self.listeners.remove(&scoped(gateway, name)).is_some()
            }
            RowKey::RouteConfig { gateway, name } => {
                self.route_configs.remove(&scoped(gateway, name)).is_some()
            }
            RowKey::Runtime { gateway, name } => {
                self.runtimes.remove(&scoped(gateway, name)).is_some()
            }
            RowKey::ConfigVersion { gateway, kind } => self
                .config_versions
                .remove(&(gateway.clone(), *kind))
                .is_some(),
        }
    }
}

/// The replicated tables, guarded by a single lock. Write operations return
/// the changed row so that callers can derive change events from them.
#[derive(Default)]
pub struct Replica {
    tables: RwLock<Tables>,
}

impl Replica {
    pub fn new() -> Self {
        Replica::default()
    }

    pub fn from_dataset(dataset: Dataset) -> Self {
        Replica {
            tables: RwLock::new(Tables::from_dataset(dataset)),
        }
    }

    /// Replaces the contents of every table. Config versions never move
    /// backwards, so a version only known locally survives the reload.
    /// Returns the config versions that are new or higher than before.
    pub fn replace_all(&self, dataset: Dataset) -> Vec<ConfigVersion> {
        let mut next = Tables::from_dataset(dataset);
        let mut tables = self.tables.write();

        let mut changed = Vec::new();
        for ((gateway, kind), version) in next.config_versions.iter_mut() {
            match tables.config_versions.get(&(gateway.clone(), *kind)) {
                Some(previous) if *previous >= *version => *version = *previous,
                _ => changed.push(ConfigVersion {
                    gateway: gateway.clone(),
                    kind: *kind,
                    version: *version,
                }),
            }
        }
        for (key, previous) in &tables.config_versions {
            next.config_versions.entry(key.clone()).or_insert(*previous);
        }

        *tables = next;
        changed
    }

    pub fn upsert(&self, row: Row) -> ChangeRecord {
        let mut tables = self.tables.write();
        let row = match row {
            Row::Gateway(g) => {
                tables.gateways.insert(g.name.clone(), g.clone());
                Row::Gateway(g)
            }
            Row::Cluster(mut c) => {
                for gateway in c.gateways.take().unwrap_or_default() {
                    tables.cluster_gateways.insert((c.name.clone(), gateway));
                }
                tables.clusters.insert(c.name.clone(), c.clone());
                Row::Cluster(c)
            }
            Row::ClusterBinding(b) => {
                tables
                    .cluster_gateways
                    .insert((b.cluster.clone(), b.gateway.clone()));
                Row::ClusterBinding(b)
            }
            Row::Listener(l) => {
                tables
                    .listeners
                    .insert(scoped(&l.gateway, &l.name), l.clone());
                Row::Listener(l)
            }
            Row::RouteConfig(r) => {
                tables
                    .route_configs
                    .insert(scoped(&r.gateway, &r.name), r.clone());
                Row::RouteConfig(r)
            }
            Row::Runtime(r) => {
                tables.runtimes.insert(scoped(&r.gateway, &r.name), r.clone());
                Row::Runtime(r)
            }
            Row::ConfigVersion(mut v) => {
                // Versions never move backwards, even on redelivery
                let current = tables
                    .config_versions
                    .entry((v.gateway.clone(), v.kind))
                    .or_default();
                *current = (*current).max(v.version);
                v.version = *current;
                Row::ConfigVersion(v)
            }
        };

        ChangeRecord {
            operation: Operation::Upsert,
            gateways: tables.affected_gateways(&row),
            row,
        }
    }

    /// Deletes a row by key. Returns `None` when the row was not present.
    pub fn delete(&self, key: &RowKey) -> Option<ChangeRecord> {
        let mut tables = self.tables.write();
        let row = tables.get(key)?;
        let gateways = tables.affected_gateways(&row);
        tables.remove(key);

        Some(ChangeRecord {
            operation: Operation::Delete,
            row,
            gateways,
        })
    }

    pub fn get(&self, key: &RowKey) -> Option<Row> {
        self.tables.read().get(key)
    }

    pub fn gateways(&self) -> Vec<Gateway> {
        self.tables.read().gateways.values().cloned().collect()
    }

    pub fn cluster(&self, name: &str) -> Option<Cluster> {
        self.tables.read().clusters.get(name).cloned()
    }

    pub fn gateways_for_cluster(&self, cluster: &str) -> Vec<GatewayName> {
        self.tables.read().gateways_for_cluster(cluster)
    }

    pub fn listeners_for(&self, gateway: &str) -> Vec<Listener> {
        let tables = self.tables.read();
        tables
            .listeners
            .iter()
            .filter(|((g, _), _)| g == gateway)
            .map(|(_, l)| l.clone())
            .collect()
    }

    /// Clusters bound to the gateway, with their bindings attached.
    pub fn clusters_for(&self, gateway: &str) -> Vec<Cluster> {
        let tables = self.tables.read();
        tables
            .cluster_gateways
            .iter()
            .filter(|(_, g)| g == gateway)
            .filter_map(|(cluster, _)| tables.clusters.get(cluster))
            .map(|cluster| Cluster {
                gateways: Some(tables.gateways_for_cluster(&cluster.name)),
                ..cluster.clone()
            })
            .collect()
    }

    pub fn route_configs_for(&self, gateway: &str) -> Vec<RouteConfig> {
        let tables = self.tables.read();
        tables
            .route_configs
            .iter()
            .filter(|((g, _), _)| g == gateway)
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn runtimes_for(&self, gateway: &str) -> Vec<Runtime> {
        let tables = self.tables.read();
        tables
            .runtimes
            .iter()
            .filter(|((g, _), _)| g == gateway)
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// All entities of one kind bound to a gateway. Kinds that are not
    /// built from entities yield nothing.
    pub fn entities_for(&self, gateway: &str, kind: ResourceKind) -> Vec<Entity> {
        match kind {
            ResourceKind::Listener => self
                .listeners_for(gateway)
                .into_iter()
                .map(Entity::Listener)
                .collect(),
            ResourceKind::Cluster => self
                .clusters_for(gateway)
                .into_iter()
                .map(Entity::Cluster)
                .collect(),
            ResourceKind::RouteConfig => self
                .route_configs_for(gateway)
                .into_iter()
                .map(Entity::RouteConfig)
                .collect(),
            ResourceKind::Runtime => self
                .runtimes_for(gateway)
                .into_iter()
                .map(Entity::Runtime)
                .collect(),
            ResourceKind::Endpoint | ResourceKind::Secret => Vec::new(),
        }
    }

    pub fn config_version(&self, gateway: &str, kind: ResourceKind) -> Option<u64> {
        self.tables
            .read()
            .config_versions
            .get(&(gateway.to_string(), kind))
            .copied()
    }

    /// Returns the current version, creating it at 1 if absent.
    pub fn load_or_create_config_version(
        &self,
        gateway: &str,
        kind: ResourceKind,
    ) -> ConfigVersion {
        let mut tables = self.tables.write();
        let version = *tables
            .config_versions
            .entry((gateway.to_string(), kind))
            .or_insert(1);

        ConfigVersion {
            gateway: gateway.to_string(),
            kind,
            version,
        }
    }

    pub fn bump_config_version(&self, gateway: &str, kind: ResourceKind) -> ConfigVersion {
        let mut tables = self.tables.write();
        let version = tables
            .config_versions
            .entry((gateway.to_string(), kind))
            .and_modify(|v| *v += 1)
            .or_insert(1);

        ConfigVersion {
            gateway: gateway.to_string(),
            kind,
            version: *version,
        }
    }

    pub fn dataset(&self) -> Dataset {
        let tables = self.tables.read();
        Dataset {
            gateways: tables.gateways.values().cloned().collect(),
            clusters: tables.clusters.values().cloned().collect(),
            cluster_gateways: tables
                .cluster_gateways
                .iter()
                .map(|(cluster, gateway)| ClusterBinding {
                    cluster: cluster.clone(),
                    gateway: gateway.clone(),
                })
                .collect(),
            listeners: tables.listeners.values().cloned().collect(),
            route_configs: tables.route_configs.values().cloned().collect(),
            runtimes: tables.runtimes.values().cloned().collect(),
            config_versions: tables
                .config_versions
                .iter()
                .map(|((gateway, kind), version)| ConfigVersion {
                    gateway: gateway.clone(),
                    kind: *kind,
                    version: *version,
                })
                .collect(),
        }
    }
}
