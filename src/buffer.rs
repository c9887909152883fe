//! Delta Buffer
//!
//! Merges repeated mutations to the same key before they become WAL
//! records. A hot key changed a thousand times between two flushes costs
//! one record, not a thousand.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::store::StoreKey;

/// Concurrent accumulator of not-yet-durable deltas
///
/// The critical section is a single hash-map merge, so callers on a tick
/// loop only ever wait for another caller's merge, never for disk I/O.
#[derive(Default)]
pub struct DeltaBuffer {
    pending: Mutex<HashMap<StoreKey, i64>>,
}

impl DeltaBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `delta` into the pending value for `key`
    ///
    /// Returns the number of distinct pending keys after the merge, which
    /// callers compare against the flush threshold.
    pub fn accumulate(&self, key: StoreKey, delta: i64) -> usize {
        let mut pending = self.pending.lock();
        let slot = pending.entry(key).or_insert(0);
        *slot = slot.saturating_add(delta);
        pending.len()
    }

    /// Atomically take every pending delta, leaving the buffer empty
    ///
    /// Keys whose deltas net to zero are dropped. The result is in key
    /// order so a drain produces a deterministic record sequence.
    pub fn drain(&self) -> Vec<(StoreKey, i64)> {
        let taken = std::mem::take(&mut *self.pending.lock());
        let mut drained: Vec<(StoreKey, i64)> =
            taken.into_iter().filter(|(_, delta)| *delta != 0).collect();
        drained.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        drained
    }

    /// Pending value for a key (0 if none)
    pub fn pending(&self, key: &StoreKey) -> i64 {
        self.pending.lock().get(key).copied().unwrap_or(0)
    }

    /// Number of distinct pending keys
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}
