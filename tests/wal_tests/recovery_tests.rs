//! Tests for WAL recovery
//!
//! These tests verify:
//! - Empty and missing-tail logs
//! - A record with a bad checksum is skipped; later records survive
//! - A torn final record ends the log
//! - An impossible length ends the log
//! - Records of covered generations are skipped
//! - Rotated log discovery and ordering

use std::fs::{self, OpenOptions};
use std::io::Write;

use tallykv::config::WalSyncStrategy;
use tallykv::store::StoreKey;
use tallykv::wal::{rotated_logs, DeltaRecord, WalFrame, WalReader, WalRecovery, WalWriter};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn record(partition: i32, delta: i64) -> DeltaRecord {
    DeltaRecord::new(StoreKey::new("player_a", partition, b"gold"), delta)
}

/// Write records and return the byte length of each frame
fn write_log(path: &std::path::Path, records: &[DeltaRecord]) -> Vec<usize> {
    let mut wal = WalWriter::open(path, WalSyncStrategy::FlushOnly).unwrap();
    let mut sizes = Vec::new();
    for r in records {
        let before = wal.len();
        wal.append_batch(&[r.encode().unwrap()]).unwrap();
        sizes.push((wal.len() - before) as usize);
    }
    wal.close().unwrap();
    sizes
}

/// Write one batch per generation
fn write_generations(path: &std::path::Path, batches: &[(u64, Vec<DeltaRecord>)]) {
    let mut wal = WalWriter::open(path, WalSyncStrategy::FlushOnly).unwrap();
    for (generation, records) in batches {
        let payloads: Vec<Vec<u8>> = records.iter().map(|r| r.encode().unwrap()).collect();
        wal.set_generation(*generation);
        wal.append_batch(&payloads).unwrap();
    }
    wal.close().unwrap();
}

// =============================================================================
// Basic Recovery Tests
// =============================================================================

#[test]
fn test_recover_empty_log() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("t.wal");
    fs::write(&path, b"").unwrap();

    let (records, result) = WalRecovery::recover(&path).unwrap();
    assert!(records.is_empty());
    assert_eq!(result.records_recovered, 0);
    assert_eq!(result.records_corrupted, 0);
    assert!(!result.was_truncated);
}

#[test]
fn test_recover_missing_file_is_error() {
    let temp_dir = TempDir::new().unwrap();
    assert!(WalRecovery::recover(&temp_dir.path().join("none.wal")).is_err());
}

#[test]
fn test_recover_in_order() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("t.wal");
    let written: Vec<DeltaRecord> = (0..50).map(|i| record(i, i64::from(i) - 25)).collect();
    write_log(&path, &written);

    let (records, result) = WalRecovery::recover(&path).unwrap();
    assert_eq!(records, written);
    assert_eq!(result.records_recovered, 50);
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_corrupt_payload_is_skipped() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("t.wal");
    let sizes = write_log(&path, &[record(1, 1), record(2, 2), record(3, 3)]);

    // Flip a payload byte of the second record
    let mut bytes = fs::read(&path).unwrap();
    let second_payload = sizes[0] + 4 + 2;
    bytes[second_payload] ^= 0xff;
    fs::write(&path, &bytes).unwrap();

    let (records, result) = WalRecovery::recover(&path).unwrap();
    assert_eq!(records, vec![record(1, 1), record(3, 3)]);
    assert_eq!(result.records_recovered, 2);
    assert_eq!(result.records_corrupted, 1);
    assert!(!result.was_truncated);
}

#[test]
fn test_corrupt_checksum_is_skipped() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("t.wal");
    let sizes = write_log(&path, &[record(1, 1), record(2, 2)]);

    // Last byte of the first frame is part of its checksum
    let mut bytes = fs::read(&path).unwrap();
    bytes[sizes[0] - 1] ^= 0x01;
    fs::write(&path, &bytes).unwrap();

    let result = WalRecovery::verify(&path).unwrap();
    assert_eq!(result.records_recovered, 1);
    assert_eq!(result.records_corrupted, 1);
}

#[test]
fn test_valid_checksum_bad_payload_is_skipped() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("t.wal");

    let mut wal = WalWriter::open(&path, WalSyncStrategy::FlushOnly).unwrap();
    wal.append_batch(&[vec![0xde, 0xad], record(1, 1).encode().unwrap()])
        .unwrap();
    wal.close().unwrap();

    let (records, result) = WalRecovery::recover(&path).unwrap();
    assert_eq!(records, vec![record(1, 1)]);
    assert_eq!(result.records_corrupted, 1);
}

#[test]
fn test_torn_tail_ends_log() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("t.wal");
    let sizes = write_log(&path, &[record(1, 1), record(2, 2)]);

    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len((sizes[0] + sizes[1] - 3) as u64).unwrap();

    let (records, result) = WalRecovery::recover(&path).unwrap();
    assert_eq!(records, vec![record(1, 1)]);
    assert_eq!(result.records_corrupted, 0);
    assert!(result.was_truncated);
}

#[test]
fn test_partial_length_prefix_ends_log() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("t.wal");
    write_log(&path, &[record(1, 1)]);

    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[0x00, 0x00]).unwrap();
    drop(file);

    let (records, result) = WalRecovery::recover(&path).unwrap();
    assert_eq!(records.len(), 1);
    assert!(result.was_truncated);
}

#[test]
fn test_oversized_length_ends_log() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("t.wal");
    write_log(&path, &[record(1, 1)]);

    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&u32::MAX.to_be_bytes()).unwrap();
    file.write_all(&[0u8; 64]).unwrap();
    drop(file);

    let mut reader = WalReader::open(&path).unwrap();
    assert!(matches!(reader.next_frame().unwrap(), Some(WalFrame::Valid(_))));
    assert!(reader.next_frame().unwrap().is_none());
    assert!(reader.was_truncated());
}

// =============================================================================
// Rotated Log Tests
// =============================================================================

// =============================================================================
// Generation Tests
// =============================================================================

#[test]
fn test_recover_skips_covered_generations() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("t.wal");
    write_generations(
        &path,
        &[
            (1, vec![record(1, 5), record(2, 5)]),
            (2, vec![record(1, 3)]),
        ],
    );

    let (records, result) = WalRecovery::recover_since(&path, Some(1)).unwrap();
    assert_eq!(records, vec![record(1, 3)]);
    assert_eq!(result.records_recovered, 1);
    assert_eq!(result.records_superseded, 2);
    assert_eq!(result.records_corrupted, 0);
    assert_eq!(result.generation, Some(2));

    let (records, result) = WalRecovery::recover_since(&path, Some(2)).unwrap();
    assert!(records.is_empty());
    assert_eq!(result.records_superseded, 3);
}

#[test]
fn test_recover_without_cover_keeps_everything() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("t.wal");
    write_generations(&path, &[(4, vec![record(1, 5)]), (5, vec![record(1, 1)])]);

    let (records, result) = WalRecovery::recover(&path).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(result.records_superseded, 0);
    assert_eq!(result.generation, Some(5));
}

#[test]
fn test_records_before_first_mark_always_kept() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("t.wal");
    write_log(&path, &[record(1, 5)]);

    let (records, result) = WalRecovery::recover_since(&path, Some(9)).unwrap();
    assert_eq!(records, vec![record(1, 5)]);
    assert_eq!(result.generation, None);
}

#[test]
fn test_rotated_logs_discovery() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    for name in [
        "tally.wal.2",
        "tally.wal.10",
        "tally.wal.1",
        "tally.wal",
        "tally.wal.tmp",
        "tally.wal.",
        "other.wal.1",
        "tally.bin",
    ] {
        fs::write(dir.join(name), b"").unwrap();
    }
    fs::create_dir(dir.join("tally.wal.3")).unwrap();

    let logs = rotated_logs(dir, "tally").unwrap();
    let names: Vec<String> = logs
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();

    // File-name order, not numeric order
    assert_eq!(names, vec!["tally.wal.1", "tally.wal.10", "tally.wal.2"]);
}
