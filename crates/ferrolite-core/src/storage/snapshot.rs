//! Checkpoint files.
//!
//! A snapshot holds the full catalog and every item at one instant:
//! ```text
//! ┌────────────────┬──────────┬──────────┬──────────────────────────┐
//! │ "FLSNAP01" (8B)│ CRC (4B) │ Len (8B) │ MessagePack CatalogImage │
//! └────────────────┴──────────┴──────────┴──────────────────────────┘
//! ```
//! Written to `snapshot.tmp`, fsynced, then renamed over `snapshot.bin`.
//! Unlike the log, a damaged snapshot cannot be partially trusted.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::types::{TableDefinition, TableId, TtlSpecification};
use crate::value::Item;

pub const SNAPSHOT_FILE: &str = "snapshot.bin";
pub const SNAPSHOT_TMP_FILE: &str = "snapshot.tmp";

const MAGIC: &[u8; 8] = b"FLSNAP01";
const HEADER_SIZE: usize = 8 + 4 + 8;

/// Durable state of every live table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogImage {
    pub next_table_id: TableId,
    pub tables: Vec<TableImage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableImage {
    pub table_id: TableId,
    pub definition: TableDefinition,
    pub created_at: u64,
    pub ttl: Option<TtlSpecification>,
    pub items: Vec<Item>,
}

pub fn write_snapshot(root: &Path, image: &CatalogImage) -> Result<(), StorageError> {
    let payload =
        rmp_serde::to_vec_named(image).map_err(|e| StorageError::Serialization(e.to_string()))?;
    let mut header = Vec::with_capacity(HEADER_SIZE);
    header.extend_from_slice(MAGIC);
    header.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    header.extend_from_slice(&(payload.len() as u64).to_le_bytes());

    let tmp = root.join(SNAPSHOT_TMP_FILE);
    let mut file = File::create(&tmp)?;
    file.write_all(&header)?;
    file.write_all(&payload)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, root.join(SNAPSHOT_FILE))?;
    // Persist the rename itself.
    if let Ok(dir) = File::open(root) {
        let _ = dir.sync_all();
    }
    Ok(())
}

/// Load the latest snapshot, or `None` if no checkpoint was ever written.
pub fn read_snapshot(root: &Path) -> Result<Option<CatalogImage>, StorageError> {
    let path = root.join(SNAPSHOT_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read(&path)?;
    let corrupted = |why: &str| StorageError::Corrupted(format!("{}: {why}", path.display()));

    if data.len() < HEADER_SIZE || &data[..8] != MAGIC {
        return Err(corrupted("bad snapshot header"));
    }
    let crc = u32::from_le_bytes(data[8..12].try_into().map_err(|_| corrupted("bad crc"))?);
    let len = u64::from_le_bytes(data[12..20].try_into().map_err(|_| corrupted("bad length"))?);
    let payload = data
        .get(HEADER_SIZE..)
        .filter(|p| p.len() as u64 == len)
        .ok_or_else(|| corrupted("truncated snapshot"))?;
    if crc32fast::hash(payload) != crc {
        return Err(corrupted("checksum mismatch"));
    }
    let image = rmp_serde::from_slice(payload).map_err(|e| corrupted(&e.to_string()))?;
    Ok(Some(image))
}
