//! Snapshot Reader
//!
//! Loads a snapshot file and yields its records.

use std::fs;
use std::path::Path;

use tracing::warn;

use crate::error::{Result, TallyError};
use crate::store::StoreKey;

use super::{decode_record, DecodedRecord, HEADER_SIZE, HEADER_SIZE_V1, MAGIC, VERSION, VERSION_1};

/// A record read from a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    pub key: StoreKey,
    pub count: i64,
    /// Decoded from the scope-less legacy layout
    pub legacy: bool,
}

/// Reader for snapshot files (versioned or headerless)
pub struct SnapshotReader {
    data: Vec<u8>,
    /// Offset of the first record
    start: usize,
    /// Entry count from the header (`None` for headerless files)
    declared_count: Option<u64>,
    /// Log generation covered (version 2 headers only)
    wal_generation: Option<u64>,
    default_scope: String,
}

impl SnapshotReader {
    /// Read a snapshot file into memory
    ///
    /// `default_scope` is assigned to legacy records, which carry no scope.
    pub fn open(path: &Path, default_scope: &str) -> Result<Self> {
        let data = fs::read(path)?;
        Self::from_bytes(data, default_scope)
    }

    /// Wrap already-loaded snapshot bytes
    pub fn from_bytes(data: Vec<u8>, default_scope: &str) -> Result<Self> {
        let mut start = 0;
        let mut declared_count = None;
        let mut wal_generation = None;

        if data.len() >= HEADER_SIZE_V1 && &data[0..4] == MAGIC {
            let version = u16::from_be_bytes([data[4], data[5]]);
            start = match version {
                VERSION_1 => HEADER_SIZE_V1,
                VERSION if data.len() >= HEADER_SIZE => {
                    wal_generation = Some(read_u64(&data[14..HEADER_SIZE]));
                    HEADER_SIZE
                }
                VERSION => {
                    return Err(TallyError::Snapshot(format!(
                        "snapshot header truncated: {} bytes",
                        data.len()
                    )))
                }
                _ => {
                    return Err(TallyError::Snapshot(format!(
                        "Unsupported snapshot version: {}",
                        version
                    )))
                }
            };
            declared_count = Some(read_u64(&data[6..14]));
        }

        Ok(Self {
            data,
            start,
            declared_count,
            wal_generation,
            default_scope: default_scope.to_string(),
        })
    }

    /// Whether the file carries the versioned header
    pub fn is_versioned(&self) -> bool {
        self.declared_count.is_some()
    }

    /// Entry count declared in the header
    pub fn declared_count(&self) -> Option<u64> {
        self.declared_count
    }

    /// Live log generation the snapshot already contains
    pub fn wal_generation(&self) -> Option<u64> {
        self.wal_generation
    }

    /// Iterate over records in file order
    pub fn records(&self) -> SnapshotIter<'_> {
        SnapshotIter {
            remaining: &self.data[self.start..],
            allow_legacy: !self.is_versioned(),
            default_scope: &self.default_scope,
            offset: self.start,
            unreadable: false,
        }
    }

    /// Read every record, warning about an unreadable tail
    pub fn read_all(&self) -> Vec<SnapshotRecord> {
        let mut iter = self.records();
        let records: Vec<SnapshotRecord> = iter.by_ref().collect();

        if iter.hit_unreadable() {
            warn!(
                offset = iter.offset(),
                records = records.len(),
                "snapshot has an unreadable tail; keeping records read so far"
            );
        }
        if let Some(declared) = self.declared_count {
            if declared != records.len() as u64 {
                warn!(
                    declared,
                    read = records.len(),
                    "snapshot record count differs from header"
                );
            }
        }
        records
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_be_bytes(buf)
}

/// Iterator over snapshot records
///
/// Stops at the end of the data or at the first record that fits neither
/// layout.
pub struct SnapshotIter<'a> {
    remaining: &'a [u8],
    allow_legacy: bool,
    default_scope: &'a str,
    offset: usize,
    unreadable: bool,
}

impl<'a> SnapshotIter<'a> {
    /// Whether iteration stopped on an unreadable record
    pub fn hit_unreadable(&self) -> bool {
        self.unreadable
    }

    /// File offset of the next undecoded byte
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl<'a> Iterator for SnapshotIter<'a> {
    type Item = SnapshotRecord;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.is_empty() || self.unreadable {
            return None;
        }

        let (record, len) = match decode_record(self.remaining, self.allow_legacy) {
            DecodedRecord::Current { key, count, len } => (
                SnapshotRecord {
                    key,
                    count,
                    legacy: false,
                },
                len,
            ),
            DecodedRecord::Legacy {
                partition,
                identity,
                count,
                len,
            } => (
                SnapshotRecord {
                    key: StoreKey::new(self.default_scope, partition, identity),
                    count,
                    legacy: true,
                },
                len,
            ),
            DecodedRecord::Unreadable => {
                self.unreadable = true;
                return None;
            }
        };

        self.remaining = &self.remaining[len..];
        self.offset += len;
        Some(record)
    }
}
