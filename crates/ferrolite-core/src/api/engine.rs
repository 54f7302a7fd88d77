use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::{Condvar, Mutex, RwLockReadGuard};
use tracing::{error, info, warn};

use crate::catalog::{Catalog, TableHandle};
use crate::config::{EngineConfig, StorageMode};
use crate::coordinator::KeyCoordinator;
use crate::error::Error;
use crate::index::propagation::Propagator;
use crate::storage::durable::DurableStore;
use crate::storage::wal::LogRecord;
use crate::types::{TableDescription, TtlSpecification};

use super::builders::{
    BatchGetItemBuilder, BatchWriteItemBuilder, CreateTableBuilder, DeleteItemBuilder,
    GetItemBuilder, PutItemBuilder, QueryBuilder, ScanBuilder, UpdateItemBuilder,
    UpdateTableBuilder,
};
use super::dispatcher;
use super::items;
use super::request::{
    ListTablesInput, OperationOutput, OperationRequest, OperationResult, TableNameInput,
    UpdateTimeToLiveInput,
};

#[derive(Default)]
struct Admission {
    active: usize,
    closed: bool,
}

pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    pub(crate) catalog: Catalog,
    pub(crate) coordinator: KeyCoordinator,
    pub(crate) propagator: Propagator,
    pub(crate) durable: Option<DurableStore>,
    admission: Mutex<Admission>,
    idle: Condvar,
}

/// Counts one admitted operation until dropped.
pub(crate) struct OperationGuard<'a> {
    inner: &'a EngineInner,
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        let mut admission = self.inner.admission.lock();
        admission.active -= 1;
        if admission.active == 0 {
            self.inner.idle.notify_all();
        }
    }
}

impl EngineInner {
    /// Admit one operation, or fail once shutdown has begun.
    pub(crate) fn admit(&self) -> Result<OperationGuard<'_>, Error> {
        let mut admission = self.admission.lock();
        if admission.closed {
            return Err(Error::ShuttingDown);
        }
        admission.active += 1;
        Ok(OperationGuard { inner: self })
    }

    /// Shared durability gate; `None` in memory mode.
    pub(crate) fn gate(&self) -> Option<RwLockReadGuard<'_, ()>> {
        self.durable.as_ref().map(DurableStore::gate)
    }

    /// Append `record` to the log before its change is applied in memory.
    pub(crate) fn log(&self, record: &LogRecord) -> Result<(), Error> {
        if let Some(durable) = &self.durable {
            durable.append(record).map_err(|e| {
                error!(error = %e, "log append failed");
                Error::from(e)
            })?;
        }
        Ok(())
    }

    /// Checkpoint if the log has outgrown its threshold. Never holds the gate.
    pub(crate) fn maybe_checkpoint(&self) {
        if let Some(durable) = &self.durable
            && durable.needs_checkpoint()
            && let Err(e) = durable.checkpoint(|| self.catalog.image())
        {
            error!(error = %e, "automatic checkpoint failed");
        }
    }

    fn shutdown(&self) -> Result<(), Error> {
        {
            let mut admission = self.admission.lock();
            if admission.closed {
                return Ok(());
            }
            admission.closed = true;
            let deadline = Instant::now() + self.config.shutdown_timeout_duration();
            while admission.active > 0 {
                if self.idle.wait_until(&mut admission, deadline).timed_out() {
                    warn!(
                        in_flight = admission.active,
                        "shutdown timeout elapsed with operations still running"
                    );
                    break;
                }
            }
        }

        self.propagator.shutdown();
        if let Some(durable) = &self.durable {
            let flushed = durable.checkpoint(|| self.catalog.image());
            if flushed.is_err()
                && let Err(e) = durable.sync()
            {
                error!(error = %e, "write-ahead log sync failed during shutdown");
            }
            durable.release();
            flushed?;
        }
        info!("engine shut down");
        Ok(())
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!(error = %e, "final flush failed");
        }
    }
}

/// Seconds since the Unix epoch.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// The engine handle.
///
/// `Engine` is cheaply clonable (`Arc`-based) and `Send + Sync`. Dropping the
/// last clone flushes durable state and releases the storage root, as
/// [`Engine::shutdown`] does.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Open an engine, recovering durable state when configured.
    pub fn open(config: EngineConfig) -> Result<Self, Error> {
        let propagator = Propagator::start(config.propagation_delay_duration())?;
        let (durable, catalog) = match &config.storage {
            StorageMode::InMemory => {
                info!("opening in-memory engine");
                (None, Catalog::new(1))
            }
            StorageMode::Durable { path } => {
                let (store, state) = DurableStore::open(
                    path,
                    config.sync_mode,
                    config.checkpoint_threshold_bytes,
                )?;
                let catalog = Catalog::new(state.next_table_id);
                {
                    let mut names = catalog.lock_names();
                    for table in state.tables {
                        let handle = TableHandle::restore(
                            table.table_id,
                            table.definition,
                            table.created_at,
                            table.ttl,
                            table.items,
                            config.throughput_burst_seconds,
                        );
                        names.insert(handle.name().to_string(), Arc::new(handle));
                    }
                }
                (Some(store), catalog)
            }
        };
        let coordinator = KeyCoordinator::new(config.lock_timeout_duration());
        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                catalog,
                coordinator,
                propagator,
                durable,
                admission: Mutex::new(Admission::default()),
                idle: Condvar::new(),
            }),
        })
    }

    /// An in-memory engine with default settings.
    pub fn in_memory() -> Result<Self, Error> {
        Self::open(EngineConfig::in_memory())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &EngineInner {
        &self.inner
    }

    /// Validate, route and execute one request.
    pub fn dispatch(&self, request: OperationRequest) -> OperationResult {
        dispatcher::dispatch(&self.inner, request)
    }

    /// Stop admitting requests, wait for in-flight ones, drain index
    /// propagation, checkpoint and release the storage root. Idempotent.
    pub fn shutdown(&self) -> Result<(), Error> {
        self.inner.shutdown()
    }

    /// Write a snapshot and truncate the log now. No-op in memory mode.
    pub fn checkpoint(&self) -> Result<(), Error> {
        let _op = self.inner.admit()?;
        if let Some(durable) = &self.inner.durable {
            durable.checkpoint(|| self.inner.catalog.image())?;
        }
        Ok(())
    }

    /// Apply every pending eventually consistent index change now.
    pub fn flush_indexes(&self) {
        self.inner.propagator.flush();
    }

    /// Delete items of `table` whose TTL attribute lies in the past.
    ///
    /// Returns how many items were removed.
    pub fn sweep_expired(&self, table: &str) -> Result<usize, Error> {
        let _op = self.inner.admit()?;
        items::sweep_expired(&self.inner, table)
    }

    pub fn create_table(&self, name: &str) -> CreateTableBuilder<'_> {
        CreateTableBuilder::new(self, name.to_string())
    }

    pub fn delete_table(&self, name: &str) -> Result<TableDescription, Error> {
        match self.dispatch(OperationRequest::DeleteTable(TableNameInput {
            table_name: name.to_string(),
        }))? {
            OperationOutput::DeleteTable(out) => Ok(out.table_description),
            other => Err(unexpected(&other)),
        }
    }

    pub fn describe_table(&self, name: &str) -> Result<TableDescription, Error> {
        match self.dispatch(OperationRequest::DescribeTable(TableNameInput {
            table_name: name.to_string(),
        }))? {
            OperationOutput::DescribeTable(out) => Ok(out.table_description),
            other => Err(unexpected(&other)),
        }
    }

    /// Names of every table, in order.
    pub fn list_tables(&self) -> Result<Vec<String>, Error> {
        let mut names = Vec::new();
        let mut start = None;
        loop {
            let out = match self.dispatch(OperationRequest::ListTables(ListTablesInput {
                exclusive_start_table_name: start,
                limit: None,
            }))? {
                OperationOutput::ListTables(out) => out,
                other => return Err(unexpected(&other)),
            };
            names.extend(out.table_names);
            match out.last_evaluated_table_name {
                Some(last) => start = Some(last),
                None => return Ok(names),
            }
        }
    }

    pub fn update_table(&self, name: &str) -> UpdateTableBuilder<'_> {
        UpdateTableBuilder::new(self, name.to_string())
    }

    pub fn update_time_to_live(
        &self,
        table: &str,
        attribute_name: &str,
        enabled: bool,
    ) -> Result<TtlSpecification, Error> {
        let out = match self.dispatch(OperationRequest::UpdateTimeToLive(UpdateTimeToLiveInput {
            table_name: table.to_string(),
            attribute_name: attribute_name.to_string(),
            enabled,
        }))? {
            OperationOutput::UpdateTimeToLive(out) => out,
            other => return Err(unexpected(&other)),
        };
        out.time_to_live
            .ok_or_else(|| Error::Internal("missing time to live specification".into()))
    }

    pub fn put_item(&self, table: &str) -> PutItemBuilder<'_> {
        PutItemBuilder::new(self, table.to_string())
    }

    pub fn get_item(&self, table: &str) -> GetItemBuilder<'_> {
        GetItemBuilder::new(self, table.to_string())
    }

    pub fn update_item(&self, table: &str) -> UpdateItemBuilder<'_> {
        UpdateItemBuilder::new(self, table.to_string())
    }

    pub fn delete_item(&self, table: &str) -> DeleteItemBuilder<'_> {
        DeleteItemBuilder::new(self, table.to_string())
    }

    pub fn query(&self, table: &str) -> QueryBuilder<'_> {
        QueryBuilder::new(self, table.to_string())
    }

    pub fn scan(&self, table: &str) -> ScanBuilder<'_> {
        ScanBuilder::new(self, table.to_string())
    }

    pub fn batch_get_item(&self) -> BatchGetItemBuilder<'_> {
        BatchGetItemBuilder::new(self)
    }

    pub fn batch_write_item(&self) -> BatchWriteItemBuilder<'_> {
        BatchWriteItemBuilder::new(self)
    }
}

/// A dispatch returned an output of the wrong operation.
pub(crate) fn unexpected(output: &OperationOutput) -> Error {
    Error::Internal(format!("unexpected operation output: {output:?}"))
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("storage", &self.inner.config.storage)
            .finish_non_exhaustive()
    }
}

/// Lifecycle delays from the configuration.
pub(crate) fn delay(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::thread;

    use tempfile::tempdir;

    use super::*;
    use crate::api::condition::ConditionExpr;
    use crate::config::SyncMode;
    use crate::error::ErrorKind;
    use crate::storage::snapshot::SNAPSHOT_FILE;
    use crate::storage::wal::WAL_FILE;
    use crate::types::{
        IndexConsistency, IndexDefinition, IndexKind, KeyDefinition, KeyType, Projection,
    };
    use crate::value::{AttributeValue, Item};

    fn users(engine: &Engine) {
        engine
            .create_table("users")
            .partition_key("id", KeyType::String)
            .index(IndexDefinition {
                index_name: "by_email".into(),
                kind: IndexKind::Global,
                partition_key: KeyDefinition::new("email", KeyType::String),
                sort_key: None,
                projection: Projection::default(),
                consistency: IndexConsistency::Strong,
                provisioned_throughput: None,
            })
            .execute()
            .unwrap();
    }

    fn user(id: &str, email: &str) -> Item {
        Item::from([
            ("id".to_string(), AttributeValue::s(id)),
            ("email".to_string(), AttributeValue::s(email)),
        ])
    }

    fn by_email(engine: &Engine, email: &str) -> Vec<Item> {
        engine
            .query("users")
            .index("by_email")
            .partition_key(AttributeValue::s(email))
            .execute()
            .unwrap()
            .items
    }

    #[test]
    fn test_durable_round_trip_across_restart() {
        let dir = tempdir().unwrap();
        {
            let engine = Engine::open(EngineConfig::durable(dir.path())).unwrap();
            users(&engine);
            engine.put_item("users").item(user("a", "a@x")).execute().unwrap();
            engine.put_item("users").item(user("b", "b@x")).execute().unwrap();
            engine
                .delete_item("users")
                .key("id", AttributeValue::s("b"))
                .execute()
                .unwrap();
            engine.update_time_to_live("users", "expires", true).unwrap();
            engine.shutdown().unwrap();
        }

        let engine = Engine::open(EngineConfig::durable(dir.path())).unwrap();
        assert_eq!(engine.list_tables().unwrap(), vec!["users"]);
        let desc = engine.describe_table("users").unwrap();
        assert_eq!(desc.item_count, 1);
        assert_eq!(desc.ttl.unwrap().attribute_name, "expires");
        let a = engine
            .get_item("users")
            .key("id", AttributeValue::s("a"))
            .execute()
            .unwrap();
        assert_eq!(a, Some(user("a", "a@x")));
        // Indexes are rebuilt from recovered items.
        assert_eq!(by_email(&engine, "a@x"), vec![user("a", "a@x")]);
        assert!(by_email(&engine, "b@x").is_empty());
    }

    #[test]
    fn test_recovery_replays_log_without_checkpoint() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::durable(dir.path());
        {
            let engine = Engine::open(config.clone()).unwrap();
            users(&engine);
            for i in 0..20 {
                engine
                    .put_item("users")
                    .item(user(&format!("u{i}"), "same@x"))
                    .execute()
                    .unwrap();
            }
            // Simulate a crash: no shutdown, no checkpoint, lock dropped.
            engine.inner.durable.as_ref().unwrap().release();
            std::mem::forget(engine);
        }
        assert!(!dir.path().join(SNAPSHOT_FILE).exists());

        let engine = Engine::open(config).unwrap();
        assert_eq!(engine.scan("users").execute().unwrap().count, 20);
        assert_eq!(by_email(&engine, "same@x").len(), 20);
    }

    #[test]
    fn test_deleted_table_stays_deleted_after_restart() {
        let dir = tempdir().unwrap();
        {
            let engine = Engine::open(EngineConfig::durable(dir.path())).unwrap();
            users(&engine);
            engine.put_item("users").item(user("a", "a@x")).execute().unwrap();
            engine.delete_table("users").unwrap();
            users(&engine);
        }
        let engine = Engine::open(EngineConfig::durable(dir.path())).unwrap();
        assert_eq!(engine.describe_table("users").unwrap().item_count, 0);
    }

    #[test]
    fn test_failed_final_checkpoint_keeps_log() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::durable(dir.path()).with_sync_mode(SyncMode::None);
        {
            let engine = Engine::open(config.clone()).unwrap();
            users(&engine);
            engine.put_item("users").item(user("a", "a@x")).execute().unwrap();
            // A directory in the snapshot's place makes the rename fail.
            fs::create_dir(dir.path().join(SNAPSHOT_FILE)).unwrap();
            assert!(engine.shutdown().is_err());
        }
        assert!(fs::metadata(dir.path().join(WAL_FILE)).unwrap().len() > 0);
        fs::remove_dir(dir.path().join(SNAPSHOT_FILE)).unwrap();

        let engine = Engine::open(config).unwrap();
        let a = engine
            .get_item("users")
            .key("id", AttributeValue::s("a"))
            .execute()
            .unwrap();
        assert_eq!(a, Some(user("a", "a@x")));
    }

    #[test]
    fn test_shutdown_is_idempotent_and_rejects_new_work() {
        let engine = Engine::in_memory().unwrap();
        users(&engine);
        engine.shutdown().unwrap();
        engine.shutdown().unwrap();

        let err = engine.put_item("users").item(user("a", "a@x")).execute().unwrap_err();
        assert!(matches!(err, Error::ShuttingDown));
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(matches!(engine.describe_table("users"), Err(Error::ShuttingDown)));
    }

    #[test]
    fn test_shutdown_releases_storage_root() {
        let dir = tempdir().unwrap();
        let first = Engine::open(EngineConfig::durable(dir.path())).unwrap();
        let err = Engine::open(EngineConfig::durable(dir.path())).unwrap_err();
        assert!(matches!(err, Error::Storage(_)));

        first.shutdown().unwrap();
        let second = Engine::open(EngineConfig::durable(dir.path())).unwrap();
        drop(second);
        drop(first);
    }

    #[test]
    fn test_drop_flushes_snapshot() {
        let dir = tempdir().unwrap();
        {
            let engine = Engine::open(EngineConfig::durable(dir.path())).unwrap();
            users(&engine);
            let clone = engine.clone();
            thread::spawn(move || {
                clone.put_item("users").item(user("t", "t@x")).execute().unwrap();
            })
            .join()
            .unwrap();
        }
        assert!(dir.path().join(SNAPSHOT_FILE).exists());
        assert_eq!(fs::metadata(dir.path().join(WAL_FILE)).unwrap().len(), 0);
    }

    #[test]
    fn test_log_growth_triggers_checkpoint() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::durable(dir.path()).with_checkpoint_threshold(512);
        let engine = Engine::open(config).unwrap();
        users(&engine);
        for i in 0..50 {
            engine
                .put_item("users")
                .item(user(&format!("u{i}"), "x@x"))
                .condition(ConditionExpr::not_exists("id"))
                .execute()
                .unwrap();
        }
        assert!(dir.path().join(SNAPSHOT_FILE).exists());
        assert!(fs::metadata(dir.path().join(WAL_FILE)).unwrap().len() < 512);
        drop(engine);

        let engine = Engine::open(EngineConfig::durable(dir.path())).unwrap();
        assert_eq!(engine.scan("users").execute().unwrap().count, 50);
    }

    #[test]
    fn test_explicit_checkpoint_in_memory_is_noop() {
        let engine = Engine::in_memory().unwrap();
        engine.checkpoint().unwrap();
        engine.flush_indexes();
        assert!(format!("{engine:?}").contains("Engine"));
    }
}
