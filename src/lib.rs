//! # TallyKV
//!
//! An embedded, crash-recoverable counter store:
//! - Per-key signed counts keyed by (scope, partition, identity bytes)
//! - Delta buffering so hot keys cost one log record per flush
//! - Write-Ahead Logging (WAL) with CRC32-checked records
//! - Atomic full snapshots that supersede the log
//! - Crash recovery with legacy-format migration
//!
//! ## Architecture Overview
//!
//! ```text
//!   caller threads                        commit thread
//!  ┌──────────────┐                   ┌────────────────────┐
//!  │ save(delta)  │                   │  tick every 5 ms   │
//!  └──────┬───────┘                   └─────────┬──────────┘
//!         │                                     │ drain
//!         ▼                                     ▼
//!  ┌──────────────┐  flush (threshold  ┌────────────────────┐
//!  │ DeltaBuffer  │ ─────────or tick──▶│ apply + enqueue    │
//!  └──────────────┘                    └───┬────────────┬───┘
//!                                          │            │
//!                                          ▼            ▼
//!  ┌──────────────┐   reads         ┌──────────┐  ┌─────────────┐
//!  │ get / query  │ ◀────────────── │ Ordered  │  │ Pending WAL │
//!  └──────────────┘   (lock-free)   │  Store   │  │   queue     │
//!                                   └────┬─────┘  └──────┬──────┘
//!                                        │ snapshot      │ batch
//!                                        ▼               ▼
//!                                   ┌──────────┐  ┌─────────────┐
//!                                   │ name.bin │  │  name.wal   │
//!                                   └──────────┘  └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use tallykv::{Config, Engine, NoIdentity};
//!
//! let config = Config::builder().data_dir("./data").build();
//! let engine = Engine::open(config, NoIdentity)?;
//!
//! engine.save("player_abc", 1, b"diamond", 64);
//! engine.flush_deltas();
//! assert_eq!(engine.get_count("player_abc", 1, b"diamond"), 64);
//!
//! engine.close()?;
//! # Ok::<(), tallykv::TallyError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod codec;
pub mod identity;
pub mod store;
pub mod buffer;
pub mod wal;
pub mod snapshot;
pub mod stats;
pub mod engine;

mod scheduler;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{TallyError, Result};
pub use config::{Config, WalSyncStrategy};
pub use engine::{Engine, QueryEntry};
pub use identity::{IdentityDecoder, NoIdentity, Utf8Identity};
pub use stats::Stats;
pub use store::StoreKey;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of TallyKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
