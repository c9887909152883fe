//! Store Module
//!
//! The in-memory ordered index: the single source of truth for reads.
//!
//! ## Responsibilities
//! - Composite key ordering (scope, partition, identity)
//! - Lock-free concurrent reads
//! - Single serialized writer, enforced by `StoreWriter`
//! - Contiguous range scans per (scope, partition)
//! - Folding legacy scopes into the default scope after load
//!
//! ## Data Structure Choice
//! `crossbeam_skiplist::SkipMap`: ordered, and readers never take a lock,
//! so a game-tick thread calling `get` is never stalled by the commit thread.

mod migrate;
mod table;

use std::fmt;
use std::sync::Arc;

pub use migrate::{is_canonical_scope, migrate_legacy_scopes};
pub use table::{OrderedStore, StoreWriter};

/// Composite key: ordered by scope, then partition, then identity bytes
///
/// Field order matters: the derived `Ord` is what makes
/// `[(S, P, ""), (S, P + 1, ""))` exactly the keys of scope S, partition P.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoreKey {
    pub scope: String,
    pub partition: i32,
    pub identity: Vec<u8>,
}

impl StoreKey {
    pub fn new(scope: impl Into<String>, partition: i32, identity: impl Into<Vec<u8>>) -> Self {
        Self {
            scope: scope.into(),
            partition,
            identity: identity.into(),
        }
    }

    /// Smallest key of a (scope, partition) range
    pub fn range_start(scope: &str, partition: i32) -> Self {
        Self {
            scope: scope.to_string(),
            partition,
            identity: Vec::new(),
        }
    }

    /// Whether this key belongs to the given (scope, partition)
    pub fn in_range(&self, scope: &str, partition: i32) -> bool {
        self.partition == partition && self.scope == scope
    }
}

impl fmt::Debug for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.scope,
            self.partition,
            hex::encode(&self.identity)
        )
    }
}

/// Value half of the store
///
/// `count` is always positive while the entry is stored. `identity` is a
/// best-effort decode of the key's identity bytes and may be absent.
#[derive(Debug)]
pub struct Entry<I> {
    pub count: i64,
    pub identity: Option<Arc<I>>,
}

impl<I> Entry<I> {
    pub fn new(count: i64, identity: Option<Arc<I>>) -> Self {
        Self { count, identity }
    }

    /// Count-only entry (snapshot load, migration)
    pub fn count_only(count: i64) -> Self {
        Self {
            count,
            identity: None,
        }
    }
}

// Manual impl: cloning shares the Arc, so `I` need not be Clone
impl<I> Clone for Entry<I> {
    fn clone(&self) -> Self {
        Self {
            count: self.count,
            identity: self.identity.clone(),
        }
    }
}
