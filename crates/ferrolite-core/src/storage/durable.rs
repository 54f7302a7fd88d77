//! Durable mode: log, checkpoints and recovery under one storage root.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

use crate::api::key_utils::encode_primary_key;
use crate::config::SyncMode;
use crate::error::{Error, StorageError};
use crate::types::{TableDefinition, TableId, TtlSpecification};
use crate::value::Item;

use super::lock::StorageLock;
use super::snapshot::{CatalogImage, read_snapshot, write_snapshot};
use super::wal::{LogRecord, WAL_FILE, WalWriter, read_log};

/// A table as rebuilt from snapshot plus log.
#[derive(Debug)]
pub struct RecoveredTable {
    pub table_id: TableId,
    pub definition: TableDefinition,
    pub created_at: u64,
    pub ttl: Option<TtlSpecification>,
    pub items: BTreeMap<Vec<u8>, Item>,
}

#[derive(Debug, Default)]
pub struct RecoveredState {
    pub next_table_id: TableId,
    pub tables: Vec<RecoveredTable>,
}

pub struct DurableStore {
    root: PathBuf,
    wal: Mutex<WalWriter>,
    /// Mutations hold it shared from log append until applied in memory;
    /// checkpoints hold it exclusively.
    gate: RwLock<()>,
    checkpoint_threshold: u64,
    lock: Mutex<Option<StorageLock>>,
}

impl DurableStore {
    /// Lock `root`, then rebuild state from its snapshot and log.
    pub fn open(
        root: &Path,
        sync_mode: SyncMode,
        checkpoint_threshold: u64,
    ) -> Result<(Self, RecoveredState), Error> {
        fs::create_dir_all(root).map_err(StorageError::from)?;
        let lock = StorageLock::acquire(root)?;

        let image = read_snapshot(root)?.unwrap_or_default();
        let records = read_log(&root.join(WAL_FILE))?;
        let replayed = records.len();
        let state = replay(image, records)?;
        info!(
            root = %root.display(),
            tables = state.tables.len(),
            replayed,
            "recovered durable state"
        );

        let wal = WalWriter::open(&root.join(WAL_FILE), sync_mode)?;
        Ok((
            Self {
                root: root.to_path_buf(),
                wal: Mutex::new(wal),
                gate: RwLock::new(()),
                checkpoint_threshold,
                lock: Mutex::new(Some(lock)),
            },
            state,
        ))
    }

    /// Shared guard a mutation holds from append until it is applied.
    pub fn gate(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read()
    }

    pub fn append(&self, record: &LogRecord) -> Result<(), StorageError> {
        self.wal.lock().append(record)
    }

    pub fn needs_checkpoint(&self) -> bool {
        self.wal.lock().len() >= self.checkpoint_threshold
    }

    /// Write a snapshot from `image` and empty the log.
    ///
    /// Must not be called while holding [`DurableStore::gate`].
    pub fn checkpoint(&self, image: impl FnOnce() -> CatalogImage) -> Result<(), StorageError> {
        let _exclusive = self.gate.write();
        let image = image();
        write_snapshot(&self.root, &image)?;
        let mut wal = self.wal.lock();
        let discarded = wal.len();
        wal.reset()?;
        debug!(tables = image.tables.len(), discarded, "checkpoint written");
        Ok(())
    }

    /// Force the log to disk. Used when a final checkpoint could not be written.
    pub fn sync(&self) -> Result<(), StorageError> {
        self.wal.lock().sync()
    }

    /// Give up the storage root so another engine may open it.
    pub fn release(&self) {
        if let Some(lock) = self.lock.lock().take() {
            debug!(lock = %lock.path().display(), "storage lock released");
        }
    }
}

fn replay(image: CatalogImage, records: Vec<LogRecord>) -> Result<RecoveredState, Error> {
    let mut next_table_id = image.next_table_id;
    let mut tables: BTreeMap<TableId, RecoveredTable> = BTreeMap::new();
    for table in image.tables {
        let schema = table.definition.key_schema();
        let mut items = BTreeMap::new();
        for item in table.items {
            items.insert(encode_primary_key(&item, &schema)?, item);
        }
        tables.insert(
            table.table_id,
            RecoveredTable {
                table_id: table.table_id,
                definition: table.definition,
                created_at: table.created_at,
                ttl: table.ttl,
                items,
            },
        );
    }

    for record in records {
        match record {
            LogRecord::CreateTable {
                table_id,
                definition,
                created_at,
            } => {
                next_table_id = next_table_id.max(table_id + 1);
                tables.insert(
                    table_id,
                    RecoveredTable {
                        table_id,
                        definition,
                        created_at,
                        ttl: None,
                        items: BTreeMap::new(),
                    },
                );
            }
            LogRecord::DeleteTable { table_id } => {
                tables.remove(&table_id);
            }
            LogRecord::UpdateTable {
                table_id,
                definition,
            } => {
                if let Some(table) = tables.get_mut(&table_id) {
                    table.definition = definition;
                }
            }
            LogRecord::UpdateTtl { table_id, ttl } => {
                if let Some(table) = tables.get_mut(&table_id) {
                    table.ttl = ttl;
                }
            }
            LogRecord::Put { table_id, item } => {
                if let Some(table) = tables.get_mut(&table_id) {
                    let key = encode_primary_key(&item, &table.definition.key_schema())?;
                    table.items.insert(key, item);
                } else {
                    warn!(table_id, "skipping logged put for a dropped table");
                }
            }
            LogRecord::Delete { table_id, key } => {
                if let Some(table) = tables.get_mut(&table_id) {
                    let key = encode_primary_key(&key, &table.definition.key_schema())?;
                    table.items.remove(&key);
                }
            }
        }
    }

    Ok(RecoveredState {
        next_table_id,
        tables: tables.into_values().collect(),
    })
}
