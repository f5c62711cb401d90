//! Update actions: pure transformations from one snapshot to the next.

use crate::builder::{BuildError, ResourceBuilder};
use crate::metrics_defs::ACTION_FAILURES;
use crate::snapshot::{Bucket, Resource, Snapshot, version_token};
use crate::types::{Entity, ResourceKind};
use shared::counter;
use std::fmt;
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum ActionError {
    #[error("could not build {kind} {name}: {source}")]
    Build {
        kind: ResourceKind,
        name: String,
        #[source]
        source: BuildError,
    },

    /// Some sub-actions of a composite failed. `snapshot` holds the result of
    /// every sub-action that succeeded.
    #[error("{failures} of {total} actions failed")]
    PartialFailure {
        snapshot: Box<Snapshot>,
        failures: usize,
        total: usize,
    },
}

pub trait UpdateAction: Send + Sync + fmt::Debug {
    fn perform(&self, snapshot: &Snapshot) -> Result<Snapshot, ActionError>;
}

#[derive(Clone)]
enum Payload {
    Ready(Arc<Resource>),
    // Built when the action is performed so that a builder failure only
    // affects this action.
    Deferred {
        gateway: String,
        entity: Entity,
        builder: Arc<dyn ResourceBuilder>,
    },
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Ready(resource) => f.debug_tuple("Ready").field(resource).finish(),
            Payload::Deferred {
                gateway, entity, ..
            } => f
                .debug_struct("Deferred")
                .field("gateway", gateway)
                .field("entity", entity)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct UpsertAction {
    kind: ResourceKind,
    name: String,
    version: u64,
    payload: Payload,
}

impl UpsertAction {
    pub fn new<N: Into<String>>(
        kind: ResourceKind,
        name: N,
        version: u64,
        resource: Resource,
    ) -> Self {
        UpsertAction {
            kind,
            name: name.into(),
            version,
            payload: Payload::Ready(Arc::new(resource)),
        }
    }

    pub fn deferred<G: Into<String>>(
        gateway: G,
        entity: Entity,
        version: u64,
        builder: Arc<dyn ResourceBuilder>,
    ) -> Self {
        UpsertAction {
            kind: entity.kind(),
            name: entity.name().to_string(),
            version,
            payload: Payload::Deferred {
                gateway: gateway.into(),
                entity,
                builder,
            },
        }
    }

    fn resource(&self) -> Result<Arc<Resource>, ActionError> {
        match &self.payload {
            Payload::Ready(resource) => Ok(resource.clone()),
            Payload::Deferred {
                gateway,
                entity,
                builder,
            } => builder
                .build(gateway, entity)
                .map(Arc::new)
                .map_err(|source| ActionError::Build {
                    kind: self.kind,
                    name: self.name.clone(),
                    source,
                }),
        }
    }
}

impl UpdateAction for UpsertAction {
    fn perform(&self, snapshot: &Snapshot) -> Result<Snapshot, ActionError> {
        let resource = self.resource()?;

        let mut items = snapshot.bucket(self.kind).items().clone();
        items.insert(self.name.clone(), resource);

        Ok(snapshot.with_bucket(self.kind, Bucket::new(version_token(self.version), items)))
    }
}

#[derive(Clone, Debug)]
pub struct DeleteAction {
    kind: ResourceKind,
    name: String,
    version: u64,
}

impl DeleteAction {
    pub fn new<N: Into<String>>(kind: ResourceKind, name: N, version: u64) -> Self {
        DeleteAction {
            kind,
            name: name.into(),
            version,
        }
    }
}

impl UpdateAction for DeleteAction {
    fn perform(&self, snapshot: &Snapshot) -> Result<Snapshot, ActionError> {
        let bucket = snapshot.bucket(self.kind);
        if !bucket.contains(&self.name) {
            return Ok(snapshot.clone());
        }

        let mut items = bucket.items().clone();
        items.remove(&self.name);

        Ok(snapshot.with_bucket(self.kind, Bucket::new(version_token(self.version), items)))
    }
}

/// Replaces a whole bucket with an empty one at the given version.
#[derive(Clone, Debug)]
pub struct ClearAction {
    kind: ResourceKind,
    version: String,
}

impl ClearAction {
    pub fn new<V: Into<String>>(kind: ResourceKind, version: V) -> Self {
        ClearAction {
            kind,
            version: version.into(),
        }
    }
}

impl UpdateAction for ClearAction {
    fn perform(&self, snapshot: &Snapshot) -> Result<Snapshot, ActionError> {
        Ok(snapshot.with_bucket(self.kind, Bucket::empty(self.version.clone())))
    }
}

/// Rebuilds a whole bucket at a replicated config version: the bucket is
/// cleared and `actions` are applied on top. A version at or below the one
/// the bucket was already produced under is ignored, so a stale or
/// redelivered reload never moves the bucket backwards.
#[derive(Debug)]
pub struct ReloadAction {
    kind: ResourceKind,
    version: u64,
    actions: CompositeAction,
}

impl ReloadAction {
    pub fn new(kind: ResourceKind, version: u64, actions: CompositeAction) -> Self {
        ReloadAction {
            kind,
            version,
            actions,
        }
    }
}

impl UpdateAction for ReloadAction {
    fn perform(&self, snapshot: &Snapshot) -> Result<Snapshot, ActionError> {
        let current = snapshot.bucket(self.kind);
        if current
            .config_version()
            .is_some_and(|applied| applied >= self.version)
        {
            tracing::warn!(
                kind = %self.kind,
                version = self.version,
                current = current.version(),
                "Ignoring stale reload"
            );
            return Ok(snapshot.clone());
        }

        let cleared = ClearAction::new(self.kind, self.version.to_string()).perform(snapshot)?;
        self.actions.perform(&cleared)
    }
}

/// Applies its actions in order. A failing action is skipped and the rest
/// still apply; the overall result is then a `PartialFailure`.
#[derive(Debug, Default)]
pub struct CompositeAction {
    actions: Vec<Box<dyn UpdateAction>>,
}

impl CompositeAction {
    pub fn new(actions: Vec<Box<dyn UpdateAction>>) -> Self {
        CompositeAction { actions }
    }

    pub fn push(&mut self, action: Box<dyn UpdateAction>) {
        self.actions.push(action);
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl UpdateAction for CompositeAction {
    fn perform(&self, snapshot: &Snapshot) -> Result<Snapshot, ActionError> {
        let mut current = snapshot.clone();
        let mut failures = 0;
        let mut total = 0;

        for action in &self.actions {
            total += 1;
            match action.perform(&current) {
                Ok(next) => current = next,
                Err(ActionError::PartialFailure {
                    snapshot,
                    failures: nested_failures,
                    total: nested_total,
                }) => {
                    // A nested composite still advanced the snapshot
                    current = *snapshot;
                    failures += nested_failures;
                    total += nested_total.saturating_sub(1);
                }
                Err(err) => {
                    counter!(ACTION_FAILURES).increment(1);
                    tracing::warn!(error = %err, action = ?action, "Skipping failed update action");
                    failures += 1;
                }
            }
        }

        if failures > 0 {
            return Err(ActionError::PartialFailure {
                snapshot: Box::new(current),
                failures,
                total,
            });
        }

        Ok(current)
    }
}

impl From<Vec<Box<dyn UpdateAction>>> for CompositeAction {
    fn from(actions: Vec<Box<dyn UpdateAction>>) -> Self {
        CompositeAction::new(actions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::INITIAL_VERSION;
    use crate::testutils::FailingAction;
    use serde_json::json;

    fn cluster(name: &str) -> Resource {
        Resource::new(name, json!({"name": name}))
    }

    #[test]
    fn test_upsert_then_delete() {
        let empty = Snapshot::empty();

        let upsert = UpsertAction::new(ResourceKind::Cluster, "svcA", 1, cluster("svcA"));
        let populated = upsert.perform(&empty).unwrap();

        let bucket = populated.bucket(ResourceKind::Cluster);
        assert!(bucket.contains("svcA"));
        assert_ne!(bucket.version(), INITIAL_VERSION);
        // Only the targeted bucket changes
        assert_eq!(
            populated.bucket(ResourceKind::Listener),
            empty.bucket(ResourceKind::Listener)
        );

        let delete = DeleteAction::new(ResourceKind::Cluster, "svcA", 1);
        let deleted = delete.perform(&populated).unwrap();
        assert!(!deleted.bucket(ResourceKind::Cluster).contains("svcA"));
        assert_ne!(
            deleted.bucket(ResourceKind::Cluster).version(),
            bucket.version()
        );

        // Earlier snapshots are untouched
        assert!(empty.bucket(ResourceKind::Cluster).is_empty());
        assert!(populated.bucket(ResourceKind::Cluster).contains("svcA"));
    }

    #[test]
    fn test_upsert_overwrites() {
        let first = UpsertAction::new(ResourceKind::Cluster, "svcA", 1, cluster("svcA"))
            .perform(&Snapshot::empty())
            .unwrap();
        let replacement = Resource::new("svcA", json!({"name": "svcA", "lb": "ring_hash"}));
        let second = UpsertAction::new(ResourceKind::Cluster, "svcA", 2, replacement.clone())
            .perform(&first)
            .unwrap();

        let bucket = second.bucket(ResourceKind::Cluster);
        assert_eq!(bucket.len(), 1);
        assert_eq!(bucket.get("svcA").unwrap().as_ref(), &replacement);
        assert!(bucket.version().starts_with("2-"));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let populated = UpsertAction::new(ResourceKind::Cluster, "svcA", 1, cluster("svcA"))
            .perform(&Snapshot::empty())
            .unwrap();
        let delete = DeleteAction::new(ResourceKind::Cluster, "svcA", 1);

        let once = delete.perform(&populated).unwrap();
        let twice = delete.perform(&once).unwrap();
        assert_eq!(once, twice);

        // Deleting from an empty snapshot is a no-op
        let empty = Snapshot::empty();
        assert_eq!(delete.perform(&empty).unwrap(), empty);
    }

    #[test]
    fn test_clear_action() {
        let populated = UpsertAction::new(ResourceKind::Runtime, "flags", 1, cluster("flags"))
            .perform(&Snapshot::empty())
            .unwrap();

        let cleared = ClearAction::new(ResourceKind::Runtime, "7")
            .perform(&populated)
            .unwrap();

        assert!(cleared.bucket(ResourceKind::Runtime).is_empty());
        assert_eq!(cleared.bucket(ResourceKind::Runtime).version(), "7");
    }

    #[test]
    fn test_reload_action() {
        let populated = UpsertAction::new(ResourceKind::Cluster, "old", 3, cluster("old"))
            .perform(&Snapshot::empty())
            .unwrap();

        let reload = ReloadAction::new(
            ResourceKind::Cluster,
            5,
            CompositeAction::new(vec![Box::new(UpsertAction::new(
                ResourceKind::Cluster,
                "svcA",
                5,
                cluster("svcA"),
            ))]),
        );
        let reloaded = reload.perform(&populated).unwrap();
        let bucket = reloaded.bucket(ResourceKind::Cluster);
        assert!(!bucket.contains("old"));
        assert!(bucket.contains("svcA"));
        assert_eq!(bucket.config_version(), Some(5));

        // Redelivery and older versions leave the bucket alone
        assert_eq!(reload.perform(&reloaded).unwrap(), reloaded);
        let stale = ReloadAction::new(ResourceKind::Cluster, 4, CompositeAction::default());
        assert_eq!(stale.perform(&reloaded).unwrap(), reloaded);

        // An empty reload still stamps the version
        let empty = ReloadAction::new(ResourceKind::Cluster, 6, CompositeAction::default())
            .perform(&reloaded)
            .unwrap();
        assert!(empty.bucket(ResourceKind::Cluster).is_empty());
        assert_eq!(empty.bucket(ResourceKind::Cluster).version(), "6");
    }

    #[test]
    fn test_composite_partial_failure() {
        let composite = CompositeAction::new(vec![
            Box::new(UpsertAction::new(ResourceKind::Cluster, "svcA", 1, cluster("svcA"))),
            Box::new(FailingAction),
            Box::new(UpsertAction::new(ResourceKind::Cluster, "svcB", 1, cluster("svcB"))),
        ]);

        let err = composite.perform(&Snapshot::empty()).unwrap_err();
        match err {
            ActionError::PartialFailure {
                snapshot,
                failures,
                total,
            } => {
                assert_eq!(failures, 1);
                assert_eq!(total, 3);
                let bucket = snapshot.bucket(ResourceKind::Cluster);
                assert!(bucket.contains("svcA"));
                assert!(bucket.contains("svcB"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_nested_composite() {
        let inner = CompositeAction::new(vec![
            Box::new(FailingAction),
            Box::new(UpsertAction::new(ResourceKind::Listener, "http", 1, cluster("http"))),
        ]);
        let outer = CompositeAction::new(vec![
            Box::new(inner),
            Box::new(UpsertAction::new(ResourceKind::Cluster, "svcA", 1, cluster("svcA"))),
        ]);

        let Err(ActionError::PartialFailure {
            snapshot,
            failures,
            total,
        }) = outer.perform(&Snapshot::empty())
        else {
            panic!("expected a partial failure");
        };

        assert_eq!(failures, 1);
        assert_eq!(total, 3);
        assert!(snapshot.bucket(ResourceKind::Listener).contains("http"));
        assert!(snapshot.bucket(ResourceKind::Cluster).contains("svcA"));
    }

    #[test]
    fn test_empty_composite() {
        let snapshot = Snapshot::empty();
        assert_eq!(
            CompositeAction::default().perform(&snapshot).unwrap(),
            snapshot
        );
    }
}
