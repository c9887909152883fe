//! Ordered store implementation
//!
//! SkipMap-based index with a writer guard for the single-writer discipline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_skiplist::SkipMap;
use parking_lot::{Mutex, MutexGuard};

use super::{Entry, StoreKey};

/// Concurrent sorted mapping from key to (count, cached identity)
///
/// ## Concurrency:
/// - Reads (`get`, `range_scan`, `len`) go straight to the skip list and
///   never block. A reader may observe the state between two applied
///   records; each record touches one key, so no cross-key view is promised.
/// - Every mutation goes through a `StoreWriter`, obtained from `writer()`,
///   which holds the writer mutex for its lifetime.
pub struct OrderedStore<I> {
    map: SkipMap<StoreKey, Entry<I>>,

    /// Serializes writers; readers never touch it
    writer_lock: Mutex<()>,

    /// Set on every mutation, cleared when a snapshot captures the store
    dirty: AtomicBool,
}

impl<I: Send + Sync + 'static> OrderedStore<I> {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            map: SkipMap::new(),
            writer_lock: Mutex::new(()),
            dirty: AtomicBool::new(false),
        }
    }

    /// Current count of a key (0 if absent)
    pub fn get(&self, key: &StoreKey) -> i64 {
        self.map.get(key).map(|e| e.value().count).unwrap_or(0)
    }

    /// All entries with the given scope and partition, in key order
    pub fn range_scan(&self, scope: &str, partition: i32) -> Vec<(StoreKey, Entry<I>)> {
        self.map
            .range(StoreKey::range_start(scope, partition)..)
            .take_while(|e| e.key().in_range(scope, partition))
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Number of entries with the given scope and partition
    pub fn count_range(&self, scope: &str, partition: i32) -> usize {
        self.map
            .range(StoreKey::range_start(scope, partition)..)
            .take_while(|e| e.key().in_range(scope, partition))
            .count()
    }

    /// Total entry count
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Whether the store changed since the last snapshot capture
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Flag the store as holding unsaved changes
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Acquire the writer guard (blocks other writers, never readers)
    pub fn writer(&self) -> StoreWriter<'_, I> {
        StoreWriter {
            store: self,
            _guard: self.writer_lock.lock(),
        }
    }
}

impl<I: Send + Sync + 'static> Default for OrderedStore<I> {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive mutation handle for an `OrderedStore`
///
/// Holding one guarantees no other writer runs, so read-modify-write on a
/// single key is atomic with respect to other mutations.
pub struct StoreWriter<'a, I> {
    store: &'a OrderedStore<I>,
    _guard: MutexGuard<'a, ()>,
}

impl<'a, I: Send + Sync + 'static> StoreWriter<'a, I> {
    /// Add `delta` to a key's count and return the new count
    ///
    /// A result `<= 0` removes the key. Otherwise the entry is upserted; an
    /// existing cached identity is kept, and a missing one is resolved through
    /// `resolve` (which may fail, leaving the entry count-only).
    pub fn apply_delta<F>(&mut self, key: StoreKey, delta: i64, resolve: F) -> i64
    where
        F: FnOnce(&[u8]) -> Option<I>,
    {
        let existing = self.store.map.get(&key).map(|e| e.value().clone());
        let old_count = existing.as_ref().map(|e| e.count).unwrap_or(0);
        let new_count = old_count.saturating_add(delta);

        if new_count <= 0 {
            self.store.map.remove(&key);
        } else {
            let identity = existing
                .and_then(|e| e.identity)
                .or_else(|| resolve(&key.identity).map(Arc::new));
            self.store.map.insert(key, Entry::new(new_count, identity));
        }

        self.store.mark_dirty();
        new_count.max(0)
    }

    /// Insert a count-only entry, replacing any existing one (snapshot load)
    ///
    /// Non-positive counts are not stored.
    pub fn load(&mut self, key: StoreKey, count: i64) {
        if count > 0 {
            self.store.map.insert(key, Entry::count_only(count));
        } else {
            self.store.map.remove(&key);
        }
    }

    /// Remove a key, returning its count
    pub fn remove(&mut self, key: &StoreKey) -> Option<i64> {
        let removed = self.store.map.remove(key).map(|e| e.value().count);
        if removed.is_some() {
            self.store.mark_dirty();
        }
        removed
    }

    /// Remove every entry with the given scope and partition
    pub fn clear_range(&mut self, scope: &str, partition: i32) -> usize {
        let keys: Vec<StoreKey> = self
            .store
            .map
            .range(StoreKey::range_start(scope, partition)..)
            .take_while(|e| e.key().in_range(scope, partition))
            .map(|e| e.key().clone())
            .collect();

        for key in &keys {
            self.store.map.remove(key);
        }
        if !keys.is_empty() {
            self.store.mark_dirty();
        }
        keys.len()
    }

    /// (key, count) pairs in key order
    pub fn iter_counts(&self) -> impl Iterator<Item = (StoreKey, i64)> + '_ {
        self.store
            .map
            .iter()
            .map(|e| (e.key().clone(), e.value().count))
    }

    /// Collected `iter_counts`, for callers that mutate while walking
    pub fn counts(&self) -> Vec<(StoreKey, i64)> {
        self.iter_counts().collect()
    }

    /// Clear the dirty flag, returning its previous value
    pub fn take_dirty(&mut self) -> bool {
        self.store.dirty.swap(false, Ordering::AcqRel)
    }

    /// Read access while holding the guard
    pub fn store(&self) -> &OrderedStore<I> {
        self.store
    }
}
