use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::StorageError;

pub const LOCK_FILE: &str = "LOCK";

/// Exclusive advisory lock on a storage root (`flock(2)` on Unix).
///
/// Held for the lifetime of a durable engine; released when dropped.
#[derive(Debug)]
pub struct StorageLock {
    file: File,
    path: PathBuf,
}

impl StorageLock {
    /// Lock `root/LOCK` without blocking.
    ///
    /// Fails with [`StorageError::FileLocked`] when another engine holds it.
    pub fn acquire(root: &Path) -> Result<Self, StorageError> {
        let path = root.join(LOCK_FILE);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        file.try_lock_exclusive()
            .map_err(|_| StorageError::FileLocked)?;

        // Owner pid, for humans inspecting a stuck directory.
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StorageLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
