use crate::action::{DeleteAction, UpsertAction};
use crate::actions_map::GranularUpdate;
use crate::builder::ResourceBuilder;
use crate::types::{Entity, Operation, Row, Table};
use std::sync::Arc;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum FactoryError {
    #[error("rows of {0} are not rendered into snapshot resources")]
    NotAResource(Table),
}

/// Produces the concrete update action for a changed row.
#[derive(Clone)]
pub struct ActionFactory {
    builder: Arc<dyn ResourceBuilder>,
}

impl ActionFactory {
    pub fn new(builder: Arc<dyn ResourceBuilder>) -> Self {
        ActionFactory { builder }
    }

    pub fn granular_update(
        &self,
        gateway: &str,
        operation: Operation,
        row: &Row,
        version: u64,
    ) -> Result<GranularUpdate, FactoryError> {
        let entity = row
            .clone()
            .into_entity()
            .ok_or(FactoryError::NotAResource(row.table()))?;
        let kind = entity.kind();
        let entity_id = entity.name().to_string();

        let update = match operation {
            Operation::Delete => GranularUpdate {
                kind,
                action: Box::new(DeleteAction::new(kind, entity_id.clone(), version)),
                entity_id,
                is_delete: true,
            },
            Operation::Upsert => GranularUpdate {
                kind,
                entity_id,
                is_delete: false,
                action: Box::new(self.upsert(gateway, entity, version)),
            },
        };

        Ok(update)
    }

    pub fn upsert(&self, gateway: &str, entity: Entity, version: u64) -> UpsertAction {
        UpsertAction::deferred(gateway, entity, version, self.builder.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::UpdateAction;
    use crate::builder::JsonResourceBuilder;
    use crate::snapshot::Snapshot;
    use crate::types::{Cluster, Gateway, Listener, ResourceKind};
    use serde_json::json;

    fn factory() -> ActionFactory {
        ActionFactory::new(Arc::new(JsonResourceBuilder::new()))
    }

    #[test]
    fn test_listener_upsert() {
        let row = Row::Listener(Listener {
            name: "http".into(),
            gateway: "public".into(),
            spec: json!({"port": 80}),
        });

        let update = factory()
            .granular_update("public", Operation::Upsert, &row, 4)
            .unwrap();
        assert_eq!(update.kind, ResourceKind::Listener);
        assert_eq!(update.entity_id, "http");
        assert!(!update.is_delete);

        let snapshot = update.action.perform(&Snapshot::empty()).unwrap();
        let bucket = snapshot.bucket(ResourceKind::Listener);
        assert_eq!(bucket.get("http").unwrap().body["port"], 80);
        assert!(bucket.version().starts_with("4-"));
    }

    #[test]
    fn test_cluster_delete() {
        let row = Row::Cluster(Cluster {
            name: "svcA".into(),
            spec: json!({}),
            gateways: None,
        });

        let update = factory()
            .granular_update("public", Operation::Delete, &row, 2)
            .unwrap();
        assert!(update.is_delete);
        assert_eq!(update.kind, ResourceKind::Cluster);
        assert_eq!(update.entity_id, "svcA");
    }

    #[test]
    fn test_rejected_rows() {
        let gateway = Row::Gateway(Gateway {
            name: "public".into(),
        });
        assert_eq!(
            factory()
                .granular_update("public", Operation::Upsert, &gateway, 1)
                .unwrap_err(),
            FactoryError::NotAResource(Table::Gateways)
        );


        let version = Row::ConfigVersion(crate::types::ConfigVersion {
            gateway: "public".into(),
            kind: ResourceKind::Cluster,
            version: 2,
        });
        assert_eq!(
            factory()
                .granular_update("public", Operation::Delete, &version, 1)
                .unwrap_err(),
            FactoryError::NotAResource(Table::ConfigVersions)
        );
    }
}
