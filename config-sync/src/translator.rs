use crate::action::{CompositeAction, ReloadAction, UpdateAction};
use crate::actions_map::ActionsMap;
use crate::events::{GatewayChangeEvent, MultiGatewayChangeEvent, PartialReloadEvent};
use crate::factory::{ActionFactory, FactoryError};
use crate::replica::Replica;
use crate::types::{ChangeRecord, GatewayName, ResourceKind};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum TranslateError {
    #[error("could not create action: {0}")]
    Factory(#[from] FactoryError),
}

pub type GatewayActions = HashMap<GatewayName, Box<dyn UpdateAction>>;

// Config versions bumped while translating one event
type BumpedVersions = HashMap<(GatewayName, ResourceKind), u64>;

/// Turns change events into update actions.
pub trait ChangeTranslator: Send + Sync {
    fn parse_change_event(
        &self,
        event: &GatewayChangeEvent,
    ) -> Result<Box<dyn UpdateAction>, TranslateError>;

    fn parse_multiple_change_event(
        &self,
        event: &MultiGatewayChangeEvent,
    ) -> Result<GatewayActions, TranslateError>;

    fn parse_partial_reload_event(
        &self,
        event: &PartialReloadEvent,
    ) -> Result<GatewayActions, TranslateError>;
}

/// Translates events against the current contents of the replica.
pub struct ReplicaTranslator {
    replica: Arc<Replica>,
    factory: ActionFactory,
}

impl ReplicaTranslator {
    pub fn new(replica: Arc<Replica>, factory: ActionFactory) -> Self {
        ReplicaTranslator { replica, factory }
    }

    /// Every (gateway, kind) touched by an event moves to a new config
    /// version exactly once, however many records of the event touch it.
    fn add_record(
        &self,
        actions: &mut ActionsMap,
        bumped: &mut BumpedVersions,
        gateway: &str,
        record: &ChangeRecord,
    ) -> Result<(), TranslateError> {
        // Gateways, bindings and versions do not map to resources
        let Some(kind) = record.row.table().resource_kind() else {
            return Ok(());
        };
        let version = *bumped
            .entry((gateway.to_string(), kind))
            .or_insert_with(|| self.replica.bump_config_version(gateway, kind).version);
        let update = self
            .factory
            .granular_update(gateway, record.operation, &record.row, version)?;
        actions.add(update);
        Ok(())
    }
}

impl ChangeTranslator for ReplicaTranslator {
    fn parse_change_event(
        &self,
        event: &GatewayChangeEvent,
    ) -> Result<Box<dyn UpdateAction>, TranslateError> {
        let mut actions = ActionsMap::new();
        let mut bumped = BumpedVersions::new();
        for record in &event.changes {
            self.add_record(&mut actions, &mut bumped, &event.gateway, record)?;
        }
        Ok(Box::new(actions.composite_action()))
    }

    fn parse_multiple_change_event(
        &self,
        event: &MultiGatewayChangeEvent,
    ) -> Result<GatewayActions, TranslateError> {
        let mut per_gateway: BTreeMap<&str, ActionsMap> = BTreeMap::new();
        let mut bumped = BumpedVersions::new();
        for record in &event.changes {
            for gateway in &record.gateways {
                let actions = per_gateway.entry(gateway.as_str()).or_default();
                self.add_record(actions, &mut bumped, gateway, record)?;
            }
        }

        Ok(per_gateway
            .into_iter()
            .map(|(gateway, actions)| {
                let action: Box<dyn UpdateAction> = Box::new(actions.composite_action());
                (gateway.to_string(), action)
            })
            .collect())
    }

    fn parse_partial_reload_event(
        &self,
        event: &PartialReloadEvent,
    ) -> Result<GatewayActions, TranslateError> {
        let mut per_gateway: BTreeMap<&str, CompositeAction> = BTreeMap::new();
        for version in &event.versions {
            let mut upserts = CompositeAction::default();
            for entity in self.replica.entities_for(&version.gateway, version.kind) {
                upserts.push(Box::new(self.factory.upsert(
                    &version.gateway,
                    entity,
                    version.version,
                )));
            }
            per_gateway
                .entry(version.gateway.as_str())
                .or_default()
                .push(Box::new(ReloadAction::new(
                    version.kind,
                    version.version,
                    upserts,
                )));
        }

        Ok(per_gateway
            .into_iter()
            .map(|(gateway, composite)| {
                let action: Box<dyn UpdateAction> = Box::new(composite);
                (gateway.to_string(), action)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::UpsertAction;
    use crate::builder::JsonResourceBuilder;
    use crate::snapshot::{Resource, Snapshot};
    use crate::testutils::sample_dataset;
    use crate::types::{ConfigVersion, Gateway, Operation, ResourceKind, Row, RowKey};

    fn translator() -> (Arc<Replica>, ReplicaTranslator) {
        let replica = Arc::new(Replica::from_dataset(sample_dataset()));
        let factory = ActionFactory::new(Arc::new(JsonResourceBuilder::new()));
        (replica.clone(), ReplicaTranslator::new(replica, factory))
    }

    #[test]
    fn test_gateway_event() {
        let (replica, translator) = translator();
        let deleted = replica
            .delete(&RowKey::Listener {
                gateway: "public".into(),
                name: "http".into(),
            })
            .unwrap();
        let gateway_row = replica.upsert(Row::Gateway(Gateway {
            name: "public".into(),
        }));

        let action = translator
            .parse_change_event(&GatewayChangeEvent {
                gateway: "public".into(),
                changes: vec![deleted, gateway_row],
            })
            .unwrap();

        let base = http_snapshot();
        let next = action.perform(&base).unwrap();
        assert!(!next.bucket(ResourceKind::Listener).contains("http"));
        // The listener version was created by the event
        assert_eq!(
            replica.config_version("public", ResourceKind::Listener),
            Some(1)
        );
    }

    #[test]
    fn test_versions_bumped_once_per_event() {
        let (replica, translator) = translator();
        let first = replica.upsert(Row::Cluster(crate::types::Cluster {
            name: "svcA".into(),
            spec: serde_json::json!({"lb": "ring_hash"}),
            gateways: None,
        }));
        let second = replica.delete(&RowKey::Cluster("svcB".into())).unwrap();

        let actions = translator
            .parse_multiple_change_event(&MultiGatewayChangeEvent {
                changes: vec![first, second],
            })
            .unwrap();

        // Two records touch public clusters, one bump
        assert_eq!(
            replica.config_version("public", ResourceKind::Cluster),
            Some(4)
        );
        assert_eq!(
            replica.config_version("internal", ResourceKind::Cluster),
            Some(1)
        );
        let snapshot = actions["public"].perform(&Snapshot::empty()).unwrap();
        assert!(
            snapshot
                .bucket(ResourceKind::Cluster)
                .version()
                .starts_with("4-")
        );
    }

    #[test]
    fn test_multiple_gateway_event() {
        let (replica, translator) = translator();
        let record = replica.delete(&RowKey::Cluster("svcA".into())).unwrap();
        assert_eq!(record.operation, Operation::Delete);

        let actions = translator
            .parse_multiple_change_event(&MultiGatewayChangeEvent {
                changes: vec![record],
            })
            .unwrap();

        let mut gateways: Vec<_> = actions.keys().cloned().collect();
        gateways.sort();
        assert_eq!(gateways, vec!["internal", "public"]);
    }

    #[test]
    fn test_partial_reload_event() {
        let (_replica, translator) = translator();
        let actions = translator
            .parse_partial_reload_event(&PartialReloadEvent {
                versions: vec![ConfigVersion {
                    gateway: "public".into(),
                    kind: ResourceKind::Cluster,
                    version: 9,
                }],
            })
            .unwrap();

        let snapshot = actions["public"].perform(&Snapshot::empty()).unwrap();
        let bucket = snapshot.bucket(ResourceKind::Cluster);
        assert_eq!(bucket.len(), 2);
        assert!(bucket.contains("svcA"));
        assert!(bucket.contains("svcB"));
        assert!(bucket.version().starts_with("9-"));
    }

    // Snapshot that already serves the "http" listener
    fn http_snapshot() -> Snapshot {
        UpsertAction::new(
            ResourceKind::Listener,
            "http",
            1,
            Resource::new("http", serde_json::json!({})),
        )
        .perform(&Snapshot::empty())
        .unwrap()
    }
}
