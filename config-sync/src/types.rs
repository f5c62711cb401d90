use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type GatewayName = String;

/// Categories of proxy configuration held in a gateway snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Cluster,
    Listener,
    RouteConfig,
    Runtime,
    Endpoint,
    Secret,
}

impl ResourceKind {
    pub const COUNT: usize = 6;

    pub const ALL: [ResourceKind; Self::COUNT] = [
        ResourceKind::Cluster,
        ResourceKind::Listener,
        ResourceKind::RouteConfig,
        ResourceKind::Runtime,
        ResourceKind::Endpoint,
        ResourceKind::Secret,
    ];

    /// Kinds that are built from replica entities.
    pub const BUILT: [ResourceKind; 4] = [
        ResourceKind::Listener,
        ResourceKind::Cluster,
        ResourceKind::RouteConfig,
        ResourceKind::Runtime,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Cluster => "cluster",
            ResourceKind::Listener => "listener",
            ResourceKind::RouteConfig => "route_config",
            ResourceKind::Runtime => "runtime",
            ResourceKind::Endpoint => "endpoint",
            ResourceKind::Secret => "secret",
        }
    }

    pub(crate) const fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = TableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| TableError::UnknownResourceKind(s.to_string()))
    }
}

/// Tables of the durable store mirrored by the replica.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    Gateways,
    Clusters,
    ClusterGateways,
    Listeners,
    RouteConfigs,
    Runtimes,
    ConfigVersions,
}

impl Table {
    pub const ALL: [Table; 7] = [
        Table::Gateways,
        Table::Clusters,
        Table::ClusterGateways,
        Table::Listeners,
        Table::RouteConfigs,
        Table::Runtimes,
        Table::ConfigVersions,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Table::Gateways => "gateways",
            Table::Clusters => "clusters",
            Table::ClusterGateways => "cluster_gateways",
            Table::Listeners => "listeners",
            Table::RouteConfigs => "route_configs",
            Table::Runtimes => "runtimes",
            Table::ConfigVersions => "config_versions",
        }
    }

    /// The snapshot bucket rows of this table are rendered into, if any.
    pub const fn resource_kind(&self) -> Option<ResourceKind> {
        match self {
            Table::Clusters => Some(ResourceKind::Cluster),
            Table::Listeners => Some(ResourceKind::Listener),
            Table::RouteConfigs => Some(ResourceKind::RouteConfig),
            Table::Runtimes => Some(ResourceKind::Runtime),
            Table::Gateways | Table::ClusterGateways | Table::ConfigVersions => None,
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Table {
    type Err = TableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Table::ALL
            .into_iter()
            .find(|table| table.as_str() == s)
            .ok_or_else(|| TableError::UnknownTable(s.to_string()))
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum TableError {
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("unknown resource kind: {0}")]
    UnknownResourceKind(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Gateway {
    pub name: GatewayName,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,
    #[serde(default)]
    pub spec: serde_json::Value,
    // Gateways the cluster is bound to, when already resolved by the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateways: Option<Vec<GatewayName>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterBinding {
    pub cluster: String,
    pub gateway: GatewayName,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Listener {
    pub name: String,
    pub gateway: GatewayName,
    #[serde(default)]
    pub spec: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub name: String,
    pub gateway: GatewayName,
    #[serde(default)]
    pub spec: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Runtime {
    pub name: String,
    pub gateway: GatewayName,
    #[serde(default)]
    pub spec: serde_json::Value,
}

/// Monotonic counter scoped to a (gateway, resource kind) pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigVersion {
    pub gateway: GatewayName,
    pub kind: ResourceKind,
    pub version: u64,
}

/// A domain entity that is rendered into a snapshot resource.
#[derive(Clone, Debug, PartialEq)]
pub enum Entity {
    Listener(Listener),
    Cluster(Cluster),
    RouteConfig(RouteConfig),
    Runtime(Runtime),
}

impl Entity {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Entity::Listener(_) => ResourceKind::Listener,
            Entity::Cluster(_) => ResourceKind::Cluster,
            Entity::RouteConfig(_) => ResourceKind::RouteConfig,
            Entity::Runtime(_) => ResourceKind::Runtime,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Entity::Listener(l) => &l.name,
            Entity::Cluster(c) => &c.name,
            Entity::RouteConfig(r) => &r.name,
            Entity::Runtime(r) => &r.name,
        }
    }
}

/// One row of any replicated table.
#[derive(Clone, Debug, PartialEq)]
pub enum Row {
    Gateway(Gateway),
    Cluster(Cluster),
    ClusterBinding(ClusterBinding),
    Listener(Listener),
    RouteConfig(RouteConfig),
    Runtime(Runtime),
    ConfigVersion(ConfigVersion),
}

impl Row {
    pub fn table(&self) -> Table {
        match self {
            Row::Gateway(_) => Table::Gateways,
            Row::Cluster(_) => Table::Clusters,
            Row::ClusterBinding(_) => Table::ClusterGateways,
            Row::Listener(_) => Table::Listeners,
            Row::RouteConfig(_) => Table::RouteConfigs,
            Row::Runtime(_) => Table::Runtimes,
            Row::ConfigVersion(_) => Table::ConfigVersions,
        }
    }

    pub fn key(&self) -> RowKey {
        match self {
            Row::Gateway(g) => RowKey::Gateway(g.name.clone()),
            Row::Cluster(c) => RowKey::Cluster(c.name.clone()),
            Row::ClusterBinding(b) => RowKey::ClusterBinding {
                cluster: b.cluster.clone(),
                gateway: b.gateway.clone(),
            },
            Row::Listener(l) => RowKey::Listener {
                gateway: l.gateway.clone(),
                name: l.name.clone(),
            },
            Row::RouteConfig(r) => RowKey::RouteConfig {
                gateway: r.gateway.clone(),
                name: r.name.clone(),
            },
            Row::Runtime(r) => RowKey::Runtime {
                gateway: r.gateway.clone(),
                name: r.name.clone(),
            },
            Row::ConfigVersion(v) => RowKey::ConfigVersion {
                gateway: v.gateway.clone(),
                kind: v.kind,
            },
        }
    }

    pub fn into_entity(self) -> Option<Entity> {
        match self {
            Row::Cluster(c) => Some(Entity::Cluster(c)),
            Row::Listener(l) => Some(Entity::Listener(l)),
            Row::RouteConfig(r) => Some(Entity::RouteConfig(r)),
            Row::Runtime(r) => Some(Entity::Runtime(r)),
            Row::Gateway(_) | Row::ClusterBinding(_) | Row::ConfigVersion(_) => None,
        }
    }
}

/// Primary key of a replicated row. Listeners, route configs and runtimes
/// are named per gateway.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RowKey {
    Gateway(GatewayName),
    Cluster(String),
    ClusterBinding { cluster: String, gateway: GatewayName },
    Listener { gateway: GatewayName, name: String },
    RouteConfig { gateway: GatewayName, name: String },
    Runtime { gateway: GatewayName, name: String },
    ConfigVersion { gateway: GatewayName, kind: ResourceKind },
}

impl RowKey {
    pub fn table(&self) -> Table {
        match self {
            RowKey::Gateway(_) => Table::Gateways,
            RowKey::Cluster(_) => Table::Clusters,
            RowKey::ClusterBinding { .. } => Table::ClusterGateways,
            RowKey::Listener { .. } => Table::Listeners,
            RowKey::RouteConfig { .. } => Table::RouteConfigs,
            RowKey::Runtime { .. } => Table::Runtimes,
            RowKey::ConfigVersion { .. } => Table::ConfigVersions,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Upsert,
    Delete,
}

/// A changed row together with the gateways whose snapshots it affects.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeRecord {
    pub operation: Operation,
    pub row: Row,
    pub gateways: Vec<GatewayName>,
}

/// Full contents of the replicated tables.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dataset {
    pub gateways: Vec<Gateway>,
    pub clusters: Vec<Cluster>,
    pub cluster_gateways: Vec<ClusterBinding>,
    pub listeners: Vec<Listener>,
    pub route_configs: Vec<RouteConfig>,
    pub runtimes: Vec<Runtime>,
    pub config_versions: Vec<ConfigVersion>,
}
