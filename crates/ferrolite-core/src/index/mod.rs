//! Secondary indexes.
//!
//! Each index is an ordered map from index entry key (index key components,
//! then the encoded primary key) to a projected copy of the base item.
//! Strongly consistent indexes are changed under the base table's write lock;
//! eventually consistent ones receive the same changes through the
//! [`propagation::Propagator`] worker.

pub mod propagation;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{RwLock, RwLockReadGuard};
use tracing::warn;

use crate::api::key_utils::build_index_key;
use crate::api::projection::project_for_index;
use crate::storage::table::TableData;
use crate::types::{
    IndexConsistency, IndexDefinition, IndexDescription, IndexKind, IndexStatus, KeySchema,
    ProjectionType,
};
use crate::value::Item;

/// The delta one base mutation makes to one index.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct IndexChange {
    pub remove: Option<Vec<u8>>,
    pub insert: Option<(Vec<u8>, Item)>,
}

impl IndexChange {
    pub fn is_noop(&self) -> bool {
        self.remove.is_none() && self.insert.is_none()
    }
}

pub struct SecondaryIndex {
    definition: IndexDefinition,
    table_schema: KeySchema,
    index_schema: KeySchema,
    entries: RwLock<BTreeMap<Vec<u8>, Item>>,
    degraded: AtomicBool,
    creating: AtomicBool,
}

impl SecondaryIndex {
    pub fn new(definition: IndexDefinition, table_schema: KeySchema) -> Self {
        let index_schema = definition.key_schema();
        Self {
            definition,
            table_schema,
            index_schema,
            entries: RwLock::new(BTreeMap::new()),
            degraded: AtomicBool::new(false),
            creating: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.index_name
    }

    pub fn definition(&self) -> &IndexDefinition {
        &self.definition
    }

    pub fn index_schema(&self) -> &KeySchema {
        &self.index_schema
    }

    /// Local indexes are always maintained synchronously.
    pub fn is_strong(&self) -> bool {
        self.definition.kind == IndexKind::Local
            || self.definition.consistency == IndexConsistency::Strong
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    pub fn is_creating(&self) -> bool {
        self.creating.load(Ordering::Acquire)
    }

    pub fn set_creating(&self, creating: bool) {
        self.creating.store(creating, Ordering::Release);
    }

    fn project(&self, item: &Item) -> Item {
        let mut keys = self.table_schema.key_names();
        keys.extend(self.index_schema.key_names());
        let projection = &self.definition.projection;
        let non_key = match projection.projection_type {
            ProjectionType::All => None,
            ProjectionType::KeysOnly => Some(&[][..]),
            ProjectionType::Include => Some(projection.non_key_attributes.as_slice()),
        };
        project_for_index(item, &keys, non_key)
    }

    fn entry_for(&self, primary_key: &[u8], item: &Item) -> Option<(Vec<u8>, Item)> {
        match build_index_key(&self.index_schema, item, primary_key) {
            Ok(Some(key)) => Some((key, self.project(item))),
            Ok(None) => None,
            Err(e) => {
                if !self.degraded.swap(true, Ordering::AcqRel) {
                    warn!(index = self.name(), error = %e, "index entry could not be built; index degraded");
                }
                None
            }
        }
    }

    /// Work out the entry changes for one base mutation.
    ///
    /// An item that lost an indexed attribute loses its entry in the same change.
    pub fn change_for(&self, primary_key: &[u8], old: Option<&Item>, new: Option<&Item>) -> IndexChange {
        let remove = old
            .and_then(|item| build_index_key(&self.index_schema, item, primary_key).ok().flatten());
        let insert = new.and_then(|item| self.entry_for(primary_key, item));
        IndexChange { remove, insert }
    }

    pub fn apply(&self, change: IndexChange) {
        if change.is_noop() {
            return;
        }
        let mut entries = self.entries.write();
        if let Some(key) = change.remove {
            entries.remove(&key);
        }
        if let Some((key, item)) = change.insert {
            entries.insert(key, item);
        }
    }

    /// Replace all entries with ones derived from `data`.
    pub fn rebuild(&self, data: &TableData) {
        let rebuilt: BTreeMap<Vec<u8>, Item> = data
            .entries()
            .iter()
            .filter_map(|(pk, item)| self.entry_for(pk, item))
            .collect();
        *self.entries.write() = rebuilt;
    }

    pub fn entries(&self) -> RwLockReadGuard<'_, BTreeMap<Vec<u8>, Item>> {
        self.entries.read()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn describe(&self) -> IndexDescription {
        IndexDescription {
            definition: self.definition.clone(),
            status: if self.is_creating() {
                IndexStatus::Creating
            } else {
                IndexStatus::Active
            },
            item_count: self.len() as u64,
            degraded: self.is_degraded(),
        }
    }
}
