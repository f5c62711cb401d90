use crate::snapshot::Resource;
use crate::types::{Cluster, Entity, Gateway, Listener, ResourceKind, RouteConfig, Runtime};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    #[error("invalid {kind} spec for {name}: {reason}")]
    InvalidSpec {
        kind: ResourceKind,
        name: String,
        reason: String,
    },
}

/// Translates domain entities into wire resources. Implementations must be
/// free of side effects apart from gateway registration.
pub trait ResourceBuilder: Send + Sync {
    fn register_gateway(&self, gateway: &Gateway);

    fn build_listener(&self, gateway: &str, listener: &Listener) -> Result<Resource, BuildError>;

    fn build_cluster(&self, gateway: &str, cluster: &Cluster) -> Result<Resource, BuildError>;

    fn build_route_config(&self, gateway: &str, route: &RouteConfig)
    -> Result<Resource, BuildError>;

    fn build_runtime(&self, gateway: &str, runtime: &Runtime) -> Result<Resource, BuildError>;

    fn build(&self, gateway: &str, entity: &Entity) -> Result<Resource, BuildError> {
        match entity {
            Entity::Listener(l) => self.build_listener(gateway, l),
            Entity::Cluster(c) => self.build_cluster(gateway, c),
            Entity::RouteConfig(r) => self.build_route_config(gateway, r),
            Entity::Runtime(r) => self.build_runtime(gateway, r),
        }
    }
}

/// Renders an entity's spec object as the resource body, tagged with the
/// entity name and the gateway it was built for.
#[derive(Default)]
pub struct JsonResourceBuilder {
    gateways: RwLock<BTreeSet<String>>,
}

impl JsonResourceBuilder {
    pub fn new() -> Self {
        JsonResourceBuilder::default()
    }

    #[cfg(test)]
    pub(crate) fn registered_gateways(&self) -> Vec<String> {
        self.gateways.read().iter().cloned().collect()
    }

    fn render(
        &self,
        kind: ResourceKind,
        gateway: &str,
        name: &str,
        spec: &Value,
    ) -> Result<Resource, BuildError> {
        let mut body = match spec {
            Value::Object(fields) => fields.clone(),
            Value::Null => Map::new(),
            other => {
                return Err(BuildError::InvalidSpec {
                    kind,
                    name: name.to_string(),
                    reason: format!("expected an object, got {other}"),
                });
            }
        };
        body.insert("name".into(), Value::String(name.to_string()));
        body.insert("gateway".into(), Value::String(gateway.to_string()));

        Ok(Resource::new(name, Value::Object(body)))
    }
}

impl ResourceBuilder for JsonResourceBuilder {
    fn register_gateway(&self, gateway: &Gateway) {
        if self.gateways.write().insert(gateway.name.clone()) {
            tracing::debug!(gateway = %gateway.name, "Registered gateway with resource builder");
        }
    }

    fn build_listener(&self, gateway: &str, listener: &Listener) -> Result<Resource, BuildError> {
        self.render(ResourceKind::Listener, gateway, &listener.name, &listener.spec)
    }

    fn build_cluster(&self, gateway: &str, cluster: &Cluster) -> Result<Resource, BuildError> {
        self.render(ResourceKind::Cluster, gateway, &cluster.name, &cluster.spec)
    }

    fn build_route_config(
        &self,
        gateway: &str,
        route: &RouteConfig,
    ) -> Result<Resource, BuildError> {
        self.render(ResourceKind::RouteConfig, gateway, &route.name, &route.spec)
    }

    fn build_runtime(&self, gateway: &str, runtime: &Runtime) -> Result<Resource, BuildError> {
        self.render(ResourceKind::Runtime, gateway, &runtime.name, &runtime.spec)
    }
}
