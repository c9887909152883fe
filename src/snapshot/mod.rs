//! Snapshot Module
//!
//! Full point-in-time dump of the store. Every snapshot supersedes all log
//! records applied before it was captured.
//!
//! ## File Format (big-endian)
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (22 bytes)                                       │
//! │   Magic: "TLKV" (4) | Version: u16 (2) | Count: u64 (8) │
//! │   WAL generation covered: u64 (8)                       │
//! ├─────────────────────────────────────────────────────────┤
//! │ Records (variable)                                      │
//! │   [key (see codec)][count: i64]                         │
//! │   ... repeated for each entry, in key order ...         │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Version 1 files have the same layout without the generation field
//! (14-byte header) and are still read.
//!
//! No checksum: the file is written to `{name}.bin.tmp`, synced, and renamed
//! over the previous snapshot, so readers only ever see a complete file.
//!
//! Files without the header come from earlier hosts. Their records are
//! trial-decoded one by one: first in the layout above, then in the
//! scope-less legacy layout `[partition: i32][id len: i32][id][count: i64]`.

mod codec;
mod reader;
mod writer;

pub use codec::{decode_record, encode_record, DecodedRecord};
pub use reader::{SnapshotReader, SnapshotRecord};
pub use writer::{SnapshotBuilder, SnapshotInfo};

use std::path::{Path, PathBuf};

/// Magic bytes identifying a TallyKV snapshot
pub(crate) const MAGIC: &[u8; 4] = b"TLKV";

/// Current snapshot format version
pub(crate) const VERSION: u16 = 2;

/// Version without the WAL generation field
pub(crate) const VERSION_1: u16 = 1;

/// Header size: Magic (4) + Version (2) + EntryCount (8) + Generation (8) = 22 bytes
pub(crate) const HEADER_SIZE: usize = 22;

/// Version 1 header size: Magic (4) + Version (2) + EntryCount (8) = 14 bytes
pub(crate) const HEADER_SIZE_V1: usize = 14;

/// Temp file a snapshot is staged in before the rename
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}
