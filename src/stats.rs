//! Engine statistics

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of engine counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Records durably appended to the log since open
    pub records_written: u64,

    /// Snapshots written since open
    pub snapshots_taken: u64,

    /// Log records skipped during replay (bad checksum or payload)
    pub corrupt_records: u64,

    /// Records applied in memory but not yet in the log
    pub pending_records: usize,

    /// Distinct keys with buffered, unapplied deltas
    pub pending_deltas: usize,

    /// Entries in the store
    pub store_size: usize,

    /// Size of the snapshot file on disk
    pub snapshot_bytes: u64,
}

/// Monotonic counters shared by the engine and the commit thread
#[derive(Debug, Default)]
pub(crate) struct Counters {
    records_written: AtomicU64,
    snapshots_taken: AtomicU64,
    corrupt_records: AtomicU64,
}

impl Counters {
    pub(crate) fn add_records_written(&self, n: u64) {
        self.records_written.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_snapshot(&self) {
        self.snapshots_taken.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_corrupt(&self, n: u64) {
        self.corrupt_records.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn records_written(&self) -> u64 {
        self.records_written.load(Ordering::Relaxed)
    }

    pub(crate) fn snapshots_taken(&self) -> u64 {
        self.snapshots_taken.load(Ordering::Relaxed)
    }

    pub(crate) fn corrupt_records(&self) -> u64 {
        self.corrupt_records.load(Ordering::Relaxed)
    }
}
