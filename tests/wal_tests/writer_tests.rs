//! Tests for WalWriter
//!
//! These tests verify:
//! - Frame layout on disk
//! - Batches accumulate and survive reopen
//! - Truncate empties the log and keeps it appendable
//! - Closed writers reject appends
//! - Generation marks precede the first batch of each generation

use std::fs;

use tallykv::config::WalSyncStrategy;
use tallykv::error::TallyError;
use tallykv::store::StoreKey;
use tallykv::wal::{
    checksum, decode_generation, DeltaRecord, WalFrame, WalReader, WalRecovery, WalWriter,
    FRAME_OVERHEAD,
};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn payload(partition: i32, delta: i64) -> Vec<u8> {
    DeltaRecord::new(StoreKey::new("player_a", partition, b"gold"), delta)
        .encode()
        .unwrap()
}

// =============================================================================
// Append Tests
// =============================================================================

#[test]
fn test_append_writes_framed_record() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("t.wal");
    let mut wal = WalWriter::open(&path, WalSyncStrategy::FlushOnly).unwrap();

    let p = payload(1, 5);
    assert_eq!(wal.append_batch(&[p.clone()]).unwrap(), 1);

    let bytes = fs::read(&path).unwrap();
    assert_eq!(bytes.len(), FRAME_OVERHEAD + p.len());
    assert_eq!(&bytes[0..4], &(p.len() as u32).to_be_bytes());
    assert_eq!(&bytes[4..4 + p.len()], p.as_slice());
    assert_eq!(&bytes[4 + p.len()..], &checksum(&p).to_be_bytes());
    assert_eq!(wal.len(), bytes.len() as u64);
}

#[test]
fn test_empty_batch_is_noop() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("t.wal");
    let mut wal = WalWriter::open(&path, WalSyncStrategy::FlushOnly).unwrap();

    let empty: Vec<Vec<u8>> = Vec::new();
    assert_eq!(wal.append_batch(&empty).unwrap(), 0);
    assert!(wal.is_empty());
    assert_eq!(fs::metadata(&path).unwrap().len(), 0);
}

#[test]
fn test_batches_accumulate() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("t.wal");
    let mut wal = WalWriter::open(&path, WalSyncStrategy::SyncEachBatch).unwrap();

    wal.append_batch(&[payload(1, 1), payload(2, 2)]).unwrap();
    wal.append_batch(&[payload(3, 3)]).unwrap();
    assert_eq!(wal.records_in_file(), 3);

    let (records, result) = WalRecovery::recover(&path).unwrap();
    assert_eq!(result.records_recovered, 3);
    let deltas: Vec<i64> = records.iter().map(|r| r.delta).collect();
    assert_eq!(deltas, vec![1, 2, 3]);
}

#[test]
fn test_reopen_appends_after_existing() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("t.wal");

    {
        let mut wal = WalWriter::open(&path, WalSyncStrategy::FlushOnly).unwrap();
        wal.append_batch(&[payload(1, 1)]).unwrap();
        wal.close().unwrap();
    }

    let mut wal = WalWriter::open(&path, WalSyncStrategy::FlushOnly).unwrap();
    assert!(!wal.is_empty());
    assert_eq!(wal.records_in_file(), 0);
    wal.append_batch(&[payload(2, 2)]).unwrap();

    let (records, _) = WalRecovery::recover(&path).unwrap();
    assert_eq!(records.len(), 2);
}

// =============================================================================
// Truncate / Close Tests
// =============================================================================

#[test]
fn test_truncate_empties_and_stays_appendable() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("t.wal");
    let mut wal = WalWriter::open(&path, WalSyncStrategy::FlushOnly).unwrap();

    wal.append_batch(&[payload(1, 1), payload(2, 2)]).unwrap();
    wal.truncate().unwrap();

    assert!(wal.is_empty());
    assert_eq!(wal.records_in_file(), 0);
    assert_eq!(fs::metadata(&path).unwrap().len(), 0);

    wal.append_batch(&[payload(3, 3)]).unwrap();
    let (records, _) = WalRecovery::recover(&path).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].delta, 3);
}

#[test]
fn test_append_after_close_fails() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("t.wal");
    let mut wal = WalWriter::open(&path, WalSyncStrategy::FlushOnly).unwrap();

    wal.append_batch(&[payload(1, 1)]).unwrap();
    wal.close().unwrap();
    assert!(!wal.is_open());

    let err = wal.append_batch(&[payload(2, 2)]).unwrap_err();
    assert!(matches!(err, TallyError::WalClosed));

    // Close is idempotent and the first record is intact
    wal.close().unwrap();
    let (records, result) = WalRecovery::recover(&path).unwrap();
    assert_eq!(records.len(), 1);
    assert!(!result.was_truncated);
}

#[test]
fn test_records_round_trip_keys() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("t.wal");
    let mut wal = WalWriter::open(&path, WalSyncStrategy::FlushOnly).unwrap();

    let record = DeltaRecord::new(StoreKey::new("team_9", i32::MIN, vec![0u8, 1, 2]), -42);
    wal.append_batch(&[record.encode().unwrap()]).unwrap();

    let (records, _) = WalRecovery::recover(&path).unwrap();
    assert_eq!(records, vec![record]);
}

// =============================================================================
// Generation Mark Tests
// =============================================================================

fn frames(path: &std::path::Path) -> Vec<Vec<u8>> {
    let mut reader = WalReader::open(path).unwrap();
    let mut payloads = Vec::new();
    while let Some(frame) = reader.next_frame().unwrap() {
        match frame {
            WalFrame::Valid(payload) => payloads.push(payload),
            WalFrame::Corrupt { offset } => panic!("corrupt frame at {}", offset),
        }
    }
    payloads
}

#[test]
fn test_generation_mark_precedes_first_batch_only() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("t.wal");
    let mut wal = WalWriter::open(&path, WalSyncStrategy::FlushOnly).unwrap();
    wal.set_generation(3);

    wal.append_batch(&[payload(1, 1)]).unwrap();
    wal.append_batch(&[payload(2, 2)]).unwrap();
    assert_eq!(wal.records_in_file(), 2);

    let written = frames(&path);
    assert_eq!(written.len(), 3);
    assert_eq!(decode_generation(&written[0]), Some(3));
    assert_eq!(written[1], payload(1, 1));
    assert_eq!(written[2], payload(2, 2));
}

#[test]
fn test_truncate_rewrites_mark_for_current_generation() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("t.wal");
    let mut wal = WalWriter::open(&path, WalSyncStrategy::FlushOnly).unwrap();
    wal.set_generation(1);
    wal.append_batch(&[payload(1, 1)]).unwrap();

    wal.set_generation(2);
    wal.truncate().unwrap();
    assert_eq!(fs::metadata(&path).unwrap().len(), 0);

    wal.append_batch(&[payload(2, 2)]).unwrap();
    let written = frames(&path);
    assert_eq!(written.len(), 2);
    assert_eq!(decode_generation(&written[0]), Some(2));

    let (records, result) = WalRecovery::recover(&path).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(result.generation, Some(2));
}

#[test]
fn test_generation_zero_writes_no_mark() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("t.wal");
    let mut wal = WalWriter::open(&path, WalSyncStrategy::FlushOnly).unwrap();

    wal.append_batch(&[payload(1, 1)]).unwrap();
    wal.truncate().unwrap();
    wal.append_batch(&[payload(2, 2)]).unwrap();

    assert_eq!(frames(&path), vec![payload(2, 2)]);
}
