//! Snapshot Builder
//!
//! Encodes records in memory, then writes them to disk atomically.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Result, TallyError};
use crate::store::StoreKey;

use super::{encode_record, temp_path, MAGIC, VERSION};

/// Metadata about a written snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    /// Final path of the snapshot file
    pub path: PathBuf,
    /// Number of records
    pub entry_count: u64,
    /// File size in bytes
    pub file_size: u64,
    /// Live log generation whose records the snapshot contains
    pub wal_generation: u64,
}

/// Builds a snapshot from entries added in key order
///
/// Encoding happens in memory so the store only has to be held still while
/// `add` runs; `finish` does the disk I/O afterwards.
pub struct SnapshotBuilder {
    buf: Vec<u8>,
    entry_count: u64,
    wal_generation: u64,
    last_key: Option<StoreKey>,
}

impl SnapshotBuilder {
    /// Create a new builder with the header written (covering no log)
    pub fn new() -> Self {
        Self::with_generation(0)
    }

    /// Builder for a snapshot that contains every record of `wal_generation`
    pub fn with_generation(wal_generation: u64) -> Self {
        let mut buf = Vec::with_capacity(64 * 1024);
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&VERSION.to_be_bytes());
        buf.extend_from_slice(&0u64.to_be_bytes()); // Placeholder for entry count
        buf.extend_from_slice(&wal_generation.to_be_bytes());
        Self {
            buf,
            entry_count: 0,
            wal_generation,
            last_key: None,
        }
    }

    /// Add a record (must be called in strictly increasing key order)
    pub fn add(&mut self, key: &StoreKey, count: i64) -> Result<()> {
        if let Some(last) = &self.last_key {
            if key <= last {
                return Err(TallyError::Snapshot(format!(
                    "keys out of order: {:?} after {:?}",
                    key, last
                )));
            }
        }
        encode_record(&mut self.buf, key, count)?;
        self.entry_count += 1;
        self.last_key = Some(key.clone());
        Ok(())
    }

    /// Number of records added so far
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Write to `{path}.tmp`, sync, and rename over `path`
    pub fn finish(mut self, path: &Path) -> Result<SnapshotInfo> {
        // Patch entry count into header (after magic + version)
        self.buf[6..14].copy_from_slice(&self.entry_count.to_be_bytes());

        let tmp = temp_path(path);
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&self.buf)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        sync_parent_dir(path);

        Ok(SnapshotInfo {
            path: path.to_path_buf(),
            entry_count: self.entry_count,
            file_size: self.buf.len() as u64,
            wal_generation: self.wal_generation,
        })
    }
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Best-effort fsync of the directory so the rename itself is durable
#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}
