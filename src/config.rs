//! Configuration for TallyKV
//!
//! Centralized configuration with sensible defaults. The defaults reproduce
//! the cadence the store was tuned for on a game-server tick loop: a 5 ms
//! commit tick, WAL writes every 2.5 s, and snapshots every 5-60 s.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, TallyError};

/// Main configuration for a TallyKV instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── {name}.bin        (snapshot)
    ///     ├── {name}.wal        (live write-ahead log)
    ///     └── {name}.wal.{N}    (rotated logs awaiting replay)
    pub data_dir: PathBuf,

    /// File stem shared by the snapshot and log files
    pub name: String,

    /// Scope that legacy and malformed keys are folded into
    pub default_scope: String,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    /// What to do with the log file after each appended batch
    pub wal_sync_strategy: WalSyncStrategy,

    /// Minimum time between two non-forced log writes
    pub min_wal_interval: Duration,

    /// Upper bound on time between log writes
    pub max_wal_interval: Duration,

    /// Queued bytes below which the whole queue goes into one batch
    pub queue_byte_limit: usize,

    /// Lower bound of the dynamic batch size
    pub min_batch_records: usize,

    /// Upper bound of the dynamic batch size
    pub max_batch_records: usize,

    // -------------------------------------------------------------------------
    // Snapshot Configuration
    // -------------------------------------------------------------------------
    /// Minimum time between two snapshots while the store is dirty
    pub min_snapshot_interval: Duration,

    /// Upper bound on time between snapshots while the store is dirty
    pub max_snapshot_interval: Duration,

    /// A persisted batch larger than this triggers a snapshot right away
    pub large_batch_records: usize,

    // -------------------------------------------------------------------------
    // Scheduler Configuration
    // -------------------------------------------------------------------------
    /// Delay between commit loop iterations
    pub tick_interval: Duration,

    /// Distinct pending keys that make `save` flush the delta buffer inline
    pub merge_threshold: usize,

    /// How often an idle scheduler looks for rotated logs
    pub rotated_sweep_interval: Duration,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncStrategy {
    /// Flush the userspace buffer after each batch (the OS decides when to hit disk)
    FlushOnly,

    /// Flush and `fdatasync` after each batch (safest, slowest)
    SyncEachBatch,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./tallykv_data"),
            name: "tally".to_string(),
            default_scope: "global".to_string(),
            wal_sync_strategy: WalSyncStrategy::FlushOnly,
            min_wal_interval: Duration::from_millis(2_500),
            max_wal_interval: Duration::from_secs(60),
            queue_byte_limit: 5 * 1024 * 1024, // 5 MiB
            min_batch_records: 1_000,
            max_batch_records: 50_000,
            min_snapshot_interval: Duration::from_secs(5),
            max_snapshot_interval: Duration::from_secs(60),
            large_batch_records: 1_000,
            tick_interval: Duration::from_millis(5),
            merge_threshold: 1_000,
            rotated_sweep_interval: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(TallyError::Config("name must not be empty".to_string()));
        }
        if self.name.contains(&['/', '\\'][..]) {
            return Err(TallyError::Config(format!(
                "name must be a plain file stem, got {:?}",
                self.name
            )));
        }
        if self.default_scope.is_empty() {
            return Err(TallyError::Config(
                "default_scope must not be empty".to_string(),
            ));
        }
        if self.min_batch_records == 0 || self.min_batch_records > self.max_batch_records {
            return Err(TallyError::Config(format!(
                "invalid batch bounds: min={} max={}",
                self.min_batch_records, self.max_batch_records
            )));
        }
        if self.min_wal_interval > self.max_wal_interval {
            return Err(TallyError::Config(
                "min_wal_interval exceeds max_wal_interval".to_string(),
            ));
        }
        if self.min_snapshot_interval > self.max_snapshot_interval {
            return Err(TallyError::Config(
                "min_snapshot_interval exceeds max_snapshot_interval".to_string(),
            ));
        }
        if self.merge_threshold == 0 {
            return Err(TallyError::Config(
                "merge_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Path of the snapshot file
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.bin", self.name))
    }

    /// Path of the live write-ahead log
    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.wal", self.name))
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the file stem for the snapshot and log files
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the scope legacy keys migrate into
    pub fn default_scope(mut self, scope: impl Into<String>) -> Self {
        self.config.default_scope = scope.into();
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the minimum and maximum time between log writes
    pub fn wal_interval(mut self, min: Duration, max: Duration) -> Self {
        self.config.min_wal_interval = min;
        self.config.max_wal_interval = max;
        self
    }

    /// Set the minimum and maximum time between snapshots
    pub fn snapshot_interval(mut self, min: Duration, max: Duration) -> Self {
        self.config.min_snapshot_interval = min;
        self.config.max_snapshot_interval = max;
        self
    }

    /// Set the batch size that forces an immediate snapshot
    pub fn large_batch_records(mut self, records: usize) -> Self {
        self.config.large_batch_records = records;
        self
    }

    /// Set the queued-bytes limit for whole-queue batches
    pub fn queue_byte_limit(mut self, bytes: usize) -> Self {
        self.config.queue_byte_limit = bytes;
        self
    }

    /// Set the bounds of the dynamic batch size
    pub fn batch_records(mut self, min: usize, max: usize) -> Self {
        self.config.min_batch_records = min;
        self.config.max_batch_records = max;
        self
    }

    /// Set the commit loop tick interval
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.config.tick_interval = interval;
        self
    }

    /// Set the inline delta-buffer flush threshold
    pub fn merge_threshold(mut self, keys: usize) -> Self {
        self.config.merge_threshold = keys;
        self
    }

    /// Set how often an idle scheduler sweeps for rotated logs
    pub fn rotated_sweep_interval(mut self, interval: Duration) -> Self {
        self.config.rotated_sweep_interval = interval;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
