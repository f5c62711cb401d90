//! Immutable per-gateway configuration snapshots.
//!
//! A snapshot holds one bucket per [`ResourceKind`]. Buckets share their item
//! maps through `Arc`, and an update always builds a new map, so a reader that
//! holds an older snapshot never observes a partially applied change.

use crate::types::ResourceKind;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

/// Version of every bucket in a freshly created snapshot.
pub const INITIAL_VERSION: &str = "0";

/// A wire resource produced by the resource builder.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Resource {
    pub name: String,
    pub body: serde_json::Value,
}

impl Resource {
    pub fn new<N: Into<String>>(name: N, body: serde_json::Value) -> Self {
        Resource {
            name: name.into(),
            body,
        }
    }
}

pub type Items = HashMap<String, Arc<Resource>>;

#[derive(Clone, Debug, PartialEq)]
pub struct Bucket {
    version: String,
    items: Arc<Items>,
}

impl Bucket {
    pub fn new<V: Into<String>>(version: V, items: Items) -> Self {
        Bucket {
            version: version.into(),
            items: Arc::new(items),
        }
    }

    pub fn empty<V: Into<String>>(version: V) -> Self {
        Bucket::new(version, HashMap::new())
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Config version the bucket was produced under, read from the prefix of
    /// its version string.
    pub fn config_version(&self) -> Option<u64> {
        let prefix = match self.version.split_once('-') {
            Some((prefix, _)) => prefix,
            None => &self.version,
        };
        prefix.parse().ok()
    }

    pub fn items(&self) -> &Items {
        &self.items
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Resource>> {
        self.items.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.items.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    buckets: [Bucket; ResourceKind::COUNT],
}

impl Snapshot {
    pub fn empty() -> Self {
        Snapshot {
            buckets: std::array::from_fn(|_| Bucket::empty(INITIAL_VERSION)),
        }
    }

    pub fn bucket(&self, kind: ResourceKind) -> &Bucket {
        &self.buckets[kind.index()]
    }

    /// Returns a copy of this snapshot with one bucket swapped out.
    pub fn with_bucket(&self, kind: ResourceKind, bucket: Bucket) -> Snapshot {
        let mut next = self.clone();
        next.buckets[kind.index()] = bucket;
        next
    }

    pub fn versions(&self) -> BTreeMap<&'static str, String> {
        ResourceKind::ALL
            .iter()
            .map(|kind| (kind.as_str(), self.bucket(*kind).version().to_string()))
            .collect()
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Snapshot::empty()
    }
}

/// Fresh bucket version stamped with the config version it was produced under.
pub fn version_token(config_version: u64) -> String {
    format!("{config_version}-{}", Uuid::new_v4().simple())
}
