//! Write-ahead log.
//!
//! On-disk frame:
//! ```text
//! ┌──────────┬──────────┬─────────────────────────┐
//! │ CRC (4B) │ Len (4B) │ MessagePack LogRecord   │
//! └──────────┴──────────┴─────────────────────────┘
//! ```
//! Both integers are little-endian. The CRC covers the length field and the
//! payload. Replay stops at the first frame that is short or fails its CRC;
//! everything before it is intact.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::config::SyncMode;
use crate::error::StorageError;
use crate::types::{TableDefinition, TableId, TtlSpecification};
use crate::value::Item;

pub const WAL_FILE: &str = "wal.log";

const HEADER_SIZE: usize = 8;

/// One durable state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogRecord {
    CreateTable {
        table_id: TableId,
        definition: TableDefinition,
        created_at: u64,
    },
    DeleteTable {
        table_id: TableId,
    },
    UpdateTable {
        table_id: TableId,
        definition: TableDefinition,
    },
    UpdateTtl {
        table_id: TableId,
        ttl: Option<TtlSpecification>,
    },
    Put {
        table_id: TableId,
        item: Item,
    },
    Delete {
        table_id: TableId,
        key: Item,
    },
}

pub fn encode_frame(record: &LogRecord) -> Result<Vec<u8>, StorageError> {
    let payload =
        rmp_serde::to_vec_named(record).map_err(|e| StorageError::Serialization(e.to_string()))?;
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&[0u8; 4]);
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&payload);
    let crc = crc32fast::hash(&frame[4..]);
    frame[..4].copy_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

/// Decode the frame at the start of `data`, returning the record and frame length.
///
/// `None` means a torn or corrupt frame.
fn decode_frame(data: &[u8]) -> Option<(LogRecord, usize)> {
    let header = data.get(..HEADER_SIZE)?;
    let stored_crc = u32::from_le_bytes(header[..4].try_into().ok()?);
    let len = u32::from_le_bytes(header[4..].try_into().ok()?) as usize;
    let body = data.get(4..HEADER_SIZE + len)?;
    if crc32fast::hash(body) != stored_crc {
        return None;
    }
    let record = rmp_serde::from_slice(&body[4..]).ok()?;
    Some((record, HEADER_SIZE + len))
}

/// Read every intact record, truncating a torn tail in place.
pub fn read_log(path: &Path) -> Result<Vec<LogRecord>, StorageError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut data = Vec::new();
    File::open(path)?.read_to_end(&mut data)?;

    let mut records = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        match decode_frame(&data[offset..]) {
            Some((record, used)) => {
                records.push(record);
                offset += used;
            }
            None => {
                warn!(
                    offset,
                    discarded = data.len() - offset,
                    "truncating torn write-ahead log tail"
                );
                OpenOptions::new()
                    .write(true)
                    .open(path)?
                    .set_len(offset as u64)?;
                break;
            }
        }
    }
    Ok(records)
}

/// File operations the log writer needs.
pub trait LogFile {
    fn append_bytes(&mut self, buf: &[u8]) -> io::Result<()>;
    fn sync_to_disk(&mut self) -> io::Result<()>;
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
    /// Move the write position to `pos` bytes from the start.
    fn seek_to(&mut self, pos: u64) -> io::Result<()>;
}

impl LogFile for File {
    fn append_bytes(&mut self, buf: &[u8]) -> io::Result<()> {
        self.write_all(buf)
    }

    fn sync_to_disk(&mut self) -> io::Result<()> {
        self.sync_data()
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn seek_to(&mut self, pos: u64) -> io::Result<()> {
        self.seek(SeekFrom::Start(pos)).map(|_| ())
    }
}

/// Appends frames to the log file.
///
/// A failed append is rolled back to the last acknowledged frame. If the
/// rollback itself fails the writer is poisoned and refuses further appends.
pub struct WalWriter<F: LogFile = File> {
    file: F,
    len: u64,
    sync_mode: SyncMode,
    poisoned: bool,
}

impl WalWriter<File> {
    pub fn open(path: &Path, sync_mode: SyncMode) -> Result<Self, StorageError> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        let len = file.seek(SeekFrom::End(0))?;
        Ok(Self::from_parts(file, len, sync_mode))
    }
}

impl<F: LogFile> WalWriter<F> {
    fn from_parts(file: F, len: u64, sync_mode: SyncMode) -> Self {
        Self {
            file,
            len,
            sync_mode,
            poisoned: false,
        }
    }

    /// Append one record. Under [`SyncMode::Full`] it is on disk when this returns.
    ///
    /// On error nothing of the frame remains in the log.
    pub fn append(&mut self, record: &LogRecord) -> Result<(), StorageError> {
        if self.poisoned {
            return Err(StorageError::LogPoisoned);
        }
        let frame = encode_frame(record)?;
        let written = self.file.append_bytes(&frame).and_then(|()| match self.sync_mode {
            SyncMode::Full => self.file.sync_to_disk(),
            SyncMode::None => Ok(()),
        });
        if let Err(e) = written {
            self.rollback()?;
            return Err(e.into());
        }
        self.len += frame.len() as u64;
        Ok(())
    }

    /// Cut the file back to the last acknowledged frame.
    fn rollback(&mut self) -> Result<(), StorageError> {
        let restored = self
            .file
            .truncate_to(self.len)
            .and_then(|()| self.file.seek_to(self.len));
        if let Err(e) = restored {
            error!(len = self.len, error = %e, "write-ahead log rollback failed");
            self.poisoned = true;
            return Err(e.into());
        }
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Discard every frame, after a checkpoint made them redundant.
    pub fn reset(&mut self) -> Result<(), StorageError> {
        self.file.truncate_to(0)?;
        self.file.seek_to(0)?;
        self.file.sync_to_disk()?;
        self.len = 0;
        self.poisoned = false;
        Ok(())
    }

    /// Force appended frames to disk regardless of the sync mode.
    pub fn sync(&mut self) -> Result<(), StorageError> {
        self.file.sync_to_disk()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::AttributeValue;
    use tempfile::tempdir;

    fn put(id: &str) -> LogRecord {
        LogRecord::Put {
            table_id: 7,
            item: Item::from([
                ("id".to_string(), AttributeValue::s(id)),
                ("blob".to_string(), AttributeValue::b(vec![0u8, 1, 2])),
            ]),
        }
    }

    #[test]
    fn test_append_and_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(WAL_FILE);
        let mut wal = WalWriter::open(&path, SyncMode::Full).unwrap();
        wal.append(&put("a")).unwrap();
        wal.append(&LogRecord::DeleteTable { table_id: 7 }).unwrap();
        assert!(!wal.is_empty());

        let records = read_log(&path).unwrap();
        assert_eq!(records, vec![put("a"), LogRecord::DeleteTable { table_id: 7 }]);
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(WAL_FILE);
        let mut wal = WalWriter::open(&path, SyncMode::None).unwrap();
        wal.append(&put("a")).unwrap();
        wal.append(&put("b")).unwrap();
        let good_len = wal.len();
        drop(wal);

        // Simulate a crash halfway through a third frame.
        let frame = encode_frame(&put("c")).unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&frame[..frame.len() / 2]).unwrap();
        drop(file);

        let records = read_log(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len);
    }

    #[test]
    fn test_corrupt_frame_stops_replay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(WAL_FILE);
        let mut wal = WalWriter::open(&path, SyncMode::None).unwrap();
        wal.append(&put("a")).unwrap();
        let first_len = wal.len() as usize;
        wal.append(&put("b")).unwrap();
        drop(wal);

        let mut data = std::fs::read(&path).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        std::fs::write(&path, &data).unwrap();

        let records = read_log(&path).unwrap();
        assert_eq!(records, vec![put("a")]);
        assert_eq!(std::fs::metadata(&path).unwrap().len() as usize, first_len);
    }

    /// In-memory log file that fails the operations it is told to.
    #[derive(Default)]
    struct FlakyFile {
        data: Vec<u8>,
        pos: usize,
        fail_sync: bool,
        fail_write_after: Option<usize>,
        fail_truncate: bool,
    }

    fn eio() -> io::Error {
        io::Error::other("injected I/O error")
    }

    impl LogFile for FlakyFile {
        fn append_bytes(&mut self, buf: &[u8]) -> io::Result<()> {
            let take = self.fail_write_after.map_or(buf.len(), |n| n.min(buf.len()));
            self.data.truncate(self.pos);
            self.data.extend_from_slice(&buf[..take]);
            self.pos += take;
            if take < buf.len() { Err(eio()) } else { Ok(()) }
        }

        fn sync_to_disk(&mut self) -> io::Result<()> {
            if self.fail_sync { Err(eio()) } else { Ok(()) }
        }

        fn truncate_to(&mut self, len: u64) -> io::Result<()> {
            if self.fail_truncate {
                return Err(eio());
            }
            self.data.truncate(len as usize);
            Ok(())
        }

        fn seek_to(&mut self, pos: u64) -> io::Result<()> {
            self.pos = pos as usize;
            Ok(())
        }
    }

    fn flaky_writer(sync_mode: SyncMode) -> WalWriter<FlakyFile> {
        let mut wal = WalWriter::from_parts(FlakyFile::default(), 0, sync_mode);
        wal.append(&put("a")).unwrap();
        wal
    }

    #[test]
    fn test_failed_sync_leaves_log_unchanged() {
        let mut wal = flaky_writer(SyncMode::Full);
        let before = wal.file.data.clone();

        wal.file.fail_sync = true;
        assert!(matches!(wal.append(&put("b")), Err(StorageError::Io(_))));
        assert_eq!(wal.file.data, before);
        assert_eq!(wal.len(), before.len() as u64);

        // The next append lands right after the last acknowledged frame.
        wal.file.fail_sync = false;
        wal.append(&put("c")).unwrap();
        let mut expected = before;
        expected.extend_from_slice(&encode_frame(&put("c")).unwrap());
        assert_eq!(wal.file.data, expected);
        assert_eq!(wal.len(), expected.len() as u64);
    }

    #[test]
    fn test_partial_write_is_rolled_back() {
        let mut wal = flaky_writer(SyncMode::None);
        let before = wal.file.data.clone();

        wal.file.fail_write_after = Some(5);
        assert!(wal.append(&put("b")).is_err());
        assert_eq!(wal.file.data, before);
    }

    #[test]
    fn test_failed_rollback_poisons_writer() {
        let mut wal = flaky_writer(SyncMode::Full);
        wal.file.fail_sync = true;
        wal.file.fail_truncate = true;
        assert!(matches!(wal.append(&put("b")), Err(StorageError::Io(_))));

        wal.file.fail_sync = false;
        wal.file.fail_truncate = false;
        assert!(matches!(wal.append(&put("c")), Err(StorageError::LogPoisoned)));

        // Emptying the log after a checkpoint brings it back to a known state.
        wal.reset().unwrap();
        wal.append(&put("d")).unwrap();
        assert_eq!(wal.file.data, encode_frame(&put("d")).unwrap());
    }

    #[test]
    fn test_reset_empties_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(WAL_FILE);
        let mut wal = WalWriter::open(&path, SyncMode::None).unwrap();
        wal.append(&put("a")).unwrap();
        wal.reset().unwrap();
        wal.append(&put("b")).unwrap();
        drop(wal);
        assert_eq!(read_log(&path).unwrap(), vec![put("b")]);
    }
}
