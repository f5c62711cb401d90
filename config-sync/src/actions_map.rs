use crate::action::{CompositeAction, UpdateAction};
use crate::types::ResourceKind;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

/// An update action tagged with the entity it originated from.
#[derive(Debug)]
pub struct GranularUpdate {
    pub kind: ResourceKind,
    pub entity_id: String,
    pub is_delete: bool,
    pub action: Box<dyn UpdateAction>,
}

/// Collects at most one action per entity. A delete replaces any pending
/// update for the same entity, while an update never replaces a pending delete.
#[derive(Debug, Default)]
pub struct ActionsMap {
    entries: BTreeMap<(ResourceKind, String), GranularUpdate>,
}

impl ActionsMap {
    pub fn new() -> Self {
        ActionsMap::default()
    }

    pub fn add(&mut self, update: GranularUpdate) {
        match self.entries.entry((update.kind, update.entity_id.clone())) {
            Entry::Vacant(entry) => {
                entry.insert(update);
            }
            Entry::Occupied(mut entry) => {
                if update.is_delete || !entry.get().is_delete {
                    entry.insert(update);
                }
            }
        }
    }

    pub fn get(&self, kind: ResourceKind, entity_id: &str) -> Option<&GranularUpdate> {
        self.entries.get(&(kind, entity_id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flattens the retained actions in (kind, entity id) order.
    pub fn composite_action(self) -> CompositeAction {
        self.entries
            .into_values()
            .map(|update| update.action)
            .collect::<Vec<_>>()
            .into()
    }
}
