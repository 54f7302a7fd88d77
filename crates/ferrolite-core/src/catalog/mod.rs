//! Table catalog: live tables, their lifecycle and per-table runtime state.
//!
//! Lifecycle transitions are driven lazily. A table entering CREATING,
//! UPDATING or DELETING records a deadline; the next catalog access after
//! the deadline moves it to ACTIVE (or DELETED, which removes it).

pub mod ops;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;

use crate::error::{Error, ResourceError};
use crate::index::SecondaryIndex;
use crate::index::propagation::Propagator;
use crate::storage::snapshot::{CatalogImage, TableImage};
use crate::storage::table::TableData;
use crate::throughput::ThroughputLimiter;
use crate::types::{
    IndexKind, KeySchema, TableDefinition, TableDescription, TableId, TableStatus,
    TtlSpecification,
};
use crate::value::Item;

struct TableMeta {
    definition: TableDefinition,
    status: TableStatus,
    transition_deadline: Option<Instant>,
    ttl: Option<TtlSpecification>,
}

/// Capacity buckets of a table and its provisioned global indexes.
#[derive(Default)]
pub struct Limiters {
    pub table: Option<ThroughputLimiter>,
    pub indexes: BTreeMap<String, ThroughputLimiter>,
}

impl Limiters {
    fn build(definition: &TableDefinition, burst_seconds: u64) -> Self {
        let table = definition
            .provisioned_throughput
            .map(|tp| ThroughputLimiter::new(definition.table_name.clone(), tp, burst_seconds));
        let indexes = definition
            .indexes
            .iter()
            .filter(|idx| idx.kind == IndexKind::Global)
            .filter_map(|idx| {
                let tp = idx.provisioned_throughput?;
                let name = format!("{}/index/{}", definition.table_name, idx.index_name);
                Some((idx.index_name.clone(), ThroughputLimiter::new(name, tp, burst_seconds)))
            })
            .collect();
        Self { table, indexes }
    }
}

/// One incarnation of a table.
pub struct TableHandle {
    id: TableId,
    name: String,
    created_at: u64,
    meta: RwLock<TableMeta>,
    data: RwLock<TableData>,
    indexes: RwLock<Vec<Arc<SecondaryIndex>>>,
    limiters: RwLock<Limiters>,
    burst_seconds: u64,
}

impl TableHandle {
    /// A table entering CREATING, or ACTIVE straight away when `delay` is zero.
    pub fn new(
        id: TableId,
        definition: TableDefinition,
        created_at: u64,
        delay: Duration,
        burst_seconds: u64,
    ) -> Self {
        let schema = definition.key_schema();
        let indexes = definition
            .indexes
            .iter()
            .map(|idx| Arc::new(SecondaryIndex::new(idx.clone(), schema.clone())))
            .collect();
        let (status, transition_deadline) = if delay.is_zero() {
            (TableStatus::Active, None)
        } else {
            (TableStatus::Creating, Some(Instant::now() + delay))
        };
        Self {
            id,
            name: definition.table_name.clone(),
            created_at,
            limiters: RwLock::new(Limiters::build(&definition, burst_seconds)),
            meta: RwLock::new(TableMeta {
                definition,
                status,
                transition_deadline,
                ttl: None,
            }),
            data: RwLock::new(TableData::new()),
            indexes: RwLock::new(indexes),
            burst_seconds,
        }
    }

    /// Rebuild a recovered table: ACTIVE, with indexes derived from `items`.
    pub fn restore(
        id: TableId,
        definition: TableDefinition,
        created_at: u64,
        ttl: Option<TtlSpecification>,
        items: BTreeMap<Vec<u8>, Item>,
        burst_seconds: u64,
    ) -> Self {
        let handle = Self::new(id, definition, created_at, Duration::ZERO, burst_seconds);
        handle.meta.write().ttl = ttl;
        {
            let mut data = handle.data.write();
            for (key, item) in items {
                data.put(key, item);
            }
            for index in handle.indexes.read().iter() {
                index.rebuild(&data);
            }
        }
        handle
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current status, applying any transition whose deadline has passed.
    pub fn status(&self) -> TableStatus {
        let mut meta = self.meta.write();
        if let Some(deadline) = meta.transition_deadline
            && Instant::now() >= deadline
        {
            let next = match meta.status {
                TableStatus::Creating | TableStatus::Updating => TableStatus::Active,
                TableStatus::Deleting => TableStatus::Deleted,
                other => other,
            };
            if meta.status.can_transition_to(next) {
                info!(table = %self.name, from = ?meta.status, to = ?next, "table status changed");
                meta.status = next;
            }
            meta.transition_deadline = None;
            if next == TableStatus::Active {
                for index in self.indexes.read().iter() {
                    index.set_creating(false);
                }
            }
        }
        meta.status
    }

    /// Move to `next`, immediately or after `delay` via an intermediate state.
    ///
    /// `via` is the intermediate status (UPDATING or DELETING); with a zero
    /// delay the table lands on `settled` directly.
    pub fn begin_transition(&self, via: TableStatus, settled: TableStatus, delay: Duration) {
        let mut meta = self.meta.write();
        if delay.is_zero() {
            meta.status = settled;
            meta.transition_deadline = None;
        } else {
            meta.status = via;
            meta.transition_deadline = Some(Instant::now() + delay);
        }
        info!(table = %self.name, status = ?meta.status, "table status changed");
    }

    pub fn definition(&self) -> TableDefinition {
        self.meta.read().definition.clone()
    }

    pub fn key_schema(&self) -> KeySchema {
        self.meta.read().definition.key_schema()
    }

    /// Key schemas of every index, for validating written items.
    pub fn index_schemas(&self) -> Vec<KeySchema> {
        self.indexes
            .read()
            .iter()
            .map(|idx| idx.index_schema().clone())
            .collect()
    }

    pub fn set_definition(&self, definition: TableDefinition) {
        *self.limiters.write() = Limiters::build(&definition, self.burst_seconds);
        self.meta.write().definition = definition;
    }

    pub fn ttl(&self) -> Option<TtlSpecification> {
        self.meta.read().ttl.clone()
    }

    pub fn set_ttl(&self, ttl: Option<TtlSpecification>) {
        self.meta.write().ttl = ttl;
    }

    pub fn data(&self) -> RwLockReadGuard<'_, TableData> {
        self.data.read()
    }

    pub fn data_mut(&self) -> RwLockWriteGuard<'_, TableData> {
        self.data.write()
    }

    pub fn index(&self, name: &str) -> Option<Arc<SecondaryIndex>> {
        self.indexes
            .read()
            .iter()
            .find(|idx| idx.name() == name)
            .cloned()
    }

    pub fn indexes(&self) -> Vec<Arc<SecondaryIndex>> {
        self.indexes.read().clone()
    }

    /// Add an index, backfilled from current items before any later write lands.
    pub fn add_index(&self, index: Arc<SecondaryIndex>) {
        let data = self.data.write();
        index.rebuild(&data);
        self.indexes.write().push(index);
    }

    pub fn remove_index(&self, name: &str) -> bool {
        let mut indexes = self.indexes.write();
        let before = indexes.len();
        indexes.retain(|idx| idx.name() != name);
        indexes.len() != before
    }

    pub fn limiters(&self) -> RwLockReadGuard<'_, Limiters> {
        self.limiters.read()
    }

    /// Store or remove one item and bring every index up to date.
    ///
    /// Strongly consistent indexes change before the table lock is released;
    /// eventually consistent ones are handed to `propagator`.
    pub fn apply(&self, key: Vec<u8>, new: Option<Item>, propagator: &Propagator) -> Option<Item> {
        let mut data = self.data.write();
        let old = match &new {
            Some(item) => data.put(key.clone(), item.clone()),
            None => data.delete(&key),
        };
        for index in self.indexes.read().iter() {
            let change = index.change_for(&key, old.as_ref(), new.as_ref());
            if index.is_strong() {
                index.apply(change);
            } else {
                propagator.enqueue(Arc::clone(index), change);
            }
        }
        old
    }

    pub fn describe(&self) -> TableDescription {
        let status = self.status();
        let meta = self.meta.read();
        let data = self.data.read();
        TableDescription {
            table_name: self.name.clone(),
            table_id: self.id,
            status,
            partition_key: meta.definition.partition_key.clone(),
            sort_key: meta.definition.sort_key.clone(),
            indexes: self.indexes.read().iter().map(|idx| idx.describe()).collect(),
            provisioned_throughput: meta.definition.provisioned_throughput,
            creation_date_time: self.created_at,
            item_count: data.len() as u64,
            table_size_bytes: data.size_bytes(),
            ttl: meta.ttl.clone(),
        }
    }

    fn image(&self) -> TableImage {
        let meta = self.meta.read();
        TableImage {
            table_id: self.id,
            definition: meta.definition.clone(),
            created_at: self.created_at,
            ttl: meta.ttl.clone(),
            items: self.data.read().entries().values().cloned().collect(),
        }
    }
}

/// Name-indexed set of live tables.
pub struct Catalog {
    tables: RwLock<BTreeMap<String, Arc<TableHandle>>>,
    next_table_id: AtomicU64,
}

impl Catalog {
    pub fn new(next_table_id: TableId) -> Self {
        Self {
            tables: RwLock::new(BTreeMap::new()),
            next_table_id: AtomicU64::new(next_table_id.max(1)),
        }
    }

    pub fn allocate_id(&self) -> TableId {
        self.next_table_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Exclusive access for create, so two creates of one name serialize.
    pub fn lock_names(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Arc<TableHandle>>> {
        self.tables.write()
    }

    /// Look up a table that has not reached DELETED.
    pub fn get(&self, name: &str) -> Result<Arc<TableHandle>, Error> {
        let handle = self.tables.read().get(name).cloned();
        let Some(handle) = handle else {
            return Err(ResourceError::TableNotFound(name.to_string()).into());
        };
        if handle.status() == TableStatus::Deleted {
            self.remove(&handle);
            return Err(ResourceError::TableNotFound(name.to_string()).into());
        }
        Ok(handle)
    }

    /// Look up a table that currently serves item reads and writes.
    pub fn get_for_items(&self, name: &str) -> Result<Arc<TableHandle>, Error> {
        let handle = self.get(name)?;
        let status = handle.status();
        if !status.serves_items() {
            return Err(ResourceError::TableInUse {
                table: name.to_string(),
                status,
            }
            .into());
        }
        Ok(handle)
    }

    /// Drop `handle` if it is still the registered incarnation of its name.
    pub fn remove(&self, handle: &TableHandle) {
        let mut tables = self.tables.write();
        if tables.get(handle.name()).is_some_and(|h| h.id() == handle.id()) {
            tables.remove(handle.name());
            info!(table = handle.name(), table_id = handle.id(), "table removed");
        }
    }

    /// Names of tables not yet DELETED, in order.
    pub fn names(&self) -> Vec<String> {
        self.handles()
            .into_iter()
            .filter(|handle| {
                let live = handle.status() != TableStatus::Deleted;
                if !live {
                    self.remove(handle);
                }
                live
            })
            .map(|handle| handle.name().to_string())
            .collect()
    }

    pub fn handles(&self) -> Vec<Arc<TableHandle>> {
        self.tables.read().values().cloned().collect()
    }

    /// Durable view of every table that survives a restart.
    pub fn image(&self) -> CatalogImage {
        let tables = self
            .handles()
            .iter()
            .filter(|h| !matches!(h.status(), TableStatus::Deleting | TableStatus::Deleted))
            .map(|h| h.image())
            .collect();
        CatalogImage {
            next_table_id: self.next_table_id.load(Ordering::SeqCst),
            tables,
        }
    }
}
