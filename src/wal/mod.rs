//! Write-Ahead Log (WAL) Module
//!
//! Durability journal for deltas applied since the last snapshot.
//!
//! ## Responsibilities
//! - Encode/decode delta records
//! - Hold encoded records in memory until the commit thread batches them
//! - Append checksummed frames to the live log
//! - Read logs back for replay, skipping damaged frames
//!
//! ## File Format (big-endian)
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │ Frame 1                                          │
//! │ ┌──────────┬──────────────────┬────────────────┐ │
//! │ │ Len (4)  │ Payload (Len)    │ Checksum (8)   │ │
//! │ └──────────┴──────────────────┴────────────────┘ │
//! ├──────────────────────────────────────────────────┤
//! │ Frame 2 ...                                      │
//! └──────────────────────────────────────────────────┘
//!
//! Payload: [key (see codec)][delta: i64]
//! Checksum: CRC-32 (IEEE) of the payload, zero-extended to u64
//! ```
//!
//! The log has no header: an empty file is a valid empty log.
//!
//! ## Generations
//! Each time the live log is emptied by a snapshot it starts a new
//! generation. The first frame written after that is a generation mark
//! (payload `"TLKG"` + `u64`), and every record up to the next mark belongs
//! to that generation. A snapshot stores the generation it covers, so a log
//! that outlived its snapshot (crash between the rename and the truncate)
//! is recognized and not replayed twice.

mod queue;
mod reader;
mod record;
mod recovery;
mod writer;

pub use queue::PendingQueue;
pub use reader::{WalFrame, WalReader};
pub use record::{
    checksum, decode_generation, encode_generation, DeltaRecord, FRAME_OVERHEAD,
    GENERATION_MAGIC, MAX_PAYLOAD_SIZE,
};
pub use recovery::{rotated_logs, RecoveryResult, WalRecovery};
pub use writer::WalWriter;
