//! WAL Recovery
//!
//! Reads a whole log back into records for replay.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::Result;

use super::{decode_generation, DeltaRecord, WalFrame, WalReader};

/// Reads logs for replay and verification
pub struct WalRecovery;

/// Result of a recovery operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Records that passed the checksum and decoded
    pub records_recovered: u64,

    /// Frames skipped for a checksum mismatch or an undecodable payload
    pub records_corrupted: u64,

    /// Valid records skipped because a snapshot already covers their generation
    pub records_superseded: u64,

    /// Whether the log ended inside a frame (torn tail)
    pub was_truncated: bool,

    /// Generation of the last mark in the log
    pub generation: Option<u64>,
}

impl WalRecovery {
    /// Read every valid record from a log, in append order
    ///
    /// This will:
    /// 1. Read frames until the end of the file or a torn tail
    /// 2. Skip (and count) frames whose checksum or payload is bad
    /// 3. Return all valid records in order
    pub fn recover(path: &Path) -> Result<(Vec<DeltaRecord>, RecoveryResult)> {
        Self::recover_since(path, None)
    }

    /// `recover`, minus records of generations up to `covered`
    ///
    /// Records written before the first generation mark are always kept.
    pub fn recover_since(
        path: &Path,
        covered: Option<u64>,
    ) -> Result<(Vec<DeltaRecord>, RecoveryResult)> {
        let mut records = Vec::new();
        let result = Self::scan(path, covered, |record| records.push(record))?;
        Ok((records, result))
    }

    /// Count valid and damaged frames without keeping the records
    pub fn verify(path: &Path) -> Result<RecoveryResult> {
        Self::scan(path, None, |_| {})
    }

    fn scan(
        path: &Path,
        covered: Option<u64>,
        mut on_record: impl FnMut(DeltaRecord),
    ) -> Result<RecoveryResult> {
        let mut reader = WalReader::open(path)?;
        let mut result = RecoveryResult::default();

        while let Some(frame) = reader.next_frame()? {
            match frame {
                WalFrame::Valid(payload) => {
                    if let Some(generation) = decode_generation(&payload) {
                        result.generation = Some(generation);
                        continue;
                    }
                    match DeltaRecord::decode(&payload) {
                        Ok(_) if is_covered(result.generation, covered) => {
                            result.records_superseded += 1;
                        }
                        Ok(record) => {
                            result.records_recovered += 1;
                            on_record(record);
                        }
                        Err(e) => {
                            result.records_corrupted += 1;
                            warn!(
                                path = %path.display(),
                                error = %e,
                                "skipping undecodable WAL record"
                            );
                        }
                    }
                }
                WalFrame::Corrupt { offset } => {
                    result.records_corrupted += 1;
                    warn!(
                        path = %path.display(),
                        offset,
                        "skipping WAL record with bad checksum"
                    );
                }
            }
        }

        result.was_truncated = reader.was_truncated();
        if result.was_truncated {
            warn!(
                path = %path.display(),
                offset = reader.offset(),
                "WAL ends with a partial record"
            );
        }
        Ok(result)
    }
}

fn is_covered(generation: Option<u64>, covered: Option<u64>) -> bool {
    matches!((generation, covered), (Some(g), Some(c)) if g <= c)
}

/// Rotated logs (`{name}.wal.{N}`) in `dir`, sorted by file name
pub fn rotated_logs(dir: &Path, name: &str) -> Result<Vec<PathBuf>> {
    let prefix = format!("{}.wal.", name);
    let mut logs = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if let Some(suffix) = file_name.strip_prefix(&prefix) {
            if !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) {
                logs.push(path);
            }
        }
    }

    logs.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(logs)
}
