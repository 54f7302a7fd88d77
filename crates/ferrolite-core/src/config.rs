//! Engine configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Where table data lives.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// Nothing survives the process.
    #[default]
    InMemory,
    /// Log and snapshot files under `path`, which is created if missing.
    Durable { path: PathBuf },
}

/// Durability level for log appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Fsync after every append (default). Maximum durability.
    #[default]
    Full,
    /// Skip fsync. Data may be lost on power failure, but appends are much
    /// faster. Useful for bulk loads and tests.
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub storage: StorageMode,
    /// Milliseconds a new table stays CREATING.
    pub create_table_delay: u64,
    /// Milliseconds a deleted table stays DELETING.
    pub delete_table_delay: u64,
    /// Milliseconds an updated table stays UPDATING.
    pub update_table_delay: u64,
    /// Milliseconds to wait for a per-key section before failing with contention.
    pub lock_timeout: u64,
    /// Milliseconds an eventually consistent index may lag its base table.
    pub index_propagation_delay: u64,
    pub enforce_throughput: bool,
    /// Seconds of unused capacity a token bucket may bank.
    pub throughput_burst_seconds: u64,
    pub sync_mode: SyncMode,
    /// Log size that triggers a snapshot checkpoint.
    pub checkpoint_threshold_bytes: u64,
    /// Milliseconds `shutdown()` waits for in-flight operations.
    pub shutdown_timeout: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage: StorageMode::InMemory,
            create_table_delay: 0,
            delete_table_delay: 0,
            update_table_delay: 0,
            lock_timeout: 5_000,
            index_propagation_delay: 0,
            enforce_throughput: false,
            throughput_burst_seconds: 300,
            sync_mode: SyncMode::Full,
            checkpoint_threshold_bytes: 64 * 1024 * 1024,
            shutdown_timeout: 10_000,
        }
    }
}

impl EngineConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn durable(path: impl AsRef<Path>) -> Self {
        Self {
            storage: StorageMode::Durable {
                path: path.as_ref().to_path_buf(),
            },
            ..Self::default()
        }
    }

    /// Set all three lifecycle delays at once.
    pub fn with_table_delays(mut self, create: u64, delete: u64, update: u64) -> Self {
        self.create_table_delay = create;
        self.delete_table_delay = delete;
        self.update_table_delay = update;
        self
    }

    pub fn with_lock_timeout(mut self, millis: u64) -> Self {
        self.lock_timeout = millis;
        self
    }

    pub fn with_index_propagation_delay(mut self, millis: u64) -> Self {
        self.index_propagation_delay = millis;
        self
    }

    pub fn with_enforce_throughput(mut self, enforce: bool) -> Self {
        self.enforce_throughput = enforce;
        self
    }

    pub fn with_sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    pub fn with_checkpoint_threshold(mut self, bytes: u64) -> Self {
        self.checkpoint_threshold_bytes = bytes;
        self
    }

    pub fn with_shutdown_timeout(mut self, millis: u64) -> Self {
        self.shutdown_timeout = millis;
        self
    }

    pub(crate) fn lock_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.lock_timeout)
    }

    pub(crate) fn propagation_delay_duration(&self) -> Duration {
        Duration::from_millis(self.index_propagation_delay)
    }

    pub(crate) fn shutdown_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout)
    }
}
