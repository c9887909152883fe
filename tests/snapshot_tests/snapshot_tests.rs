//! Tests for snapshot files
//!
//! These tests verify:
//! - Builder/reader round trip with the versioned header
//! - Atomic write (no temp file left, previous snapshot replaced)
//! - Key-order enforcement in the builder
//! - Headerless files: current layout, legacy layout, unreadable tail
//! - Version 1 headers still read, unknown versions rejected
//! - The covered log generation round-trips through the header

use std::fs;

use tallykv::error::TallyError;
use tallykv::snapshot::{temp_path, SnapshotBuilder, SnapshotReader};
use tallykv::store::StoreKey;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn key(scope: &str, partition: i32, identity: &[u8]) -> StoreKey {
    StoreKey::new(scope, partition, identity)
}

fn legacy_record(partition: i32, identity: &[u8], count: i64) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&partition.to_be_bytes());
    bytes.extend_from_slice(&(identity.len() as i32).to_be_bytes());
    bytes.extend_from_slice(identity);
    bytes.extend_from_slice(&count.to_be_bytes());
    bytes
}

fn current_record(key: &StoreKey, count: i64) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&(key.scope.len() as u16).to_be_bytes());
    bytes.extend_from_slice(key.scope.as_bytes());
    bytes.extend_from_slice(&key.partition.to_be_bytes());
    bytes.extend_from_slice(&(key.identity.len() as i32).to_be_bytes());
    bytes.extend_from_slice(&key.identity);
    bytes.extend_from_slice(&count.to_be_bytes());
    bytes
}

// =============================================================================
// Builder / Reader Tests
// =============================================================================

#[test]
fn test_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("tally.bin");

    let entries = vec![
        (key("global", -3, b"a"), 1i64),
        (key("player_a", 0, b""), 2),
        (key("player_a", 0, b"gold"), i64::MAX),
        (key("player_b", i32::MAX, &[0, 255]), 7),
    ];

    let mut builder = SnapshotBuilder::new();
    for (k, count) in &entries {
        builder.add(k, *count).unwrap();
    }
    assert_eq!(builder.entry_count(), 4);
    let info = builder.finish(&path).unwrap();

    assert_eq!(info.entry_count, 4);
    assert_eq!(info.file_size, fs::metadata(&path).unwrap().len());
    assert!(!temp_path(&path).exists());

    let reader = SnapshotReader::open(&path, "global").unwrap();
    assert!(reader.is_versioned());
    assert_eq!(reader.declared_count(), Some(4));

    let read: Vec<(StoreKey, i64)> = reader
        .read_all()
        .into_iter()
        .map(|r| {
            assert!(!r.legacy);
            (r.key, r.count)
        })
        .collect();
    assert_eq!(read, entries);
}

#[test]
fn test_header_layout() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("tally.bin");

    let mut builder = SnapshotBuilder::new();
    builder.add(&key("global", 1, b"x"), 3).unwrap();
    builder.finish(&path).unwrap();

    let bytes = fs::read(&path).unwrap();
    assert_eq!(&bytes[0..4], b"TLKV");
    assert_eq!(&bytes[4..6], &2u16.to_be_bytes());
    assert_eq!(&bytes[6..14], &1u64.to_be_bytes());
    assert_eq!(&bytes[14..22], &0u64.to_be_bytes());
    assert_eq!(&bytes[22..], current_record(&key("global", 1, b"x"), 3).as_slice());
}

#[test]
fn test_empty_snapshot() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("tally.bin");

    let info = SnapshotBuilder::new().finish(&path).unwrap();
    assert_eq!(info.entry_count, 0);
    assert_eq!(info.file_size, 22);

    let reader = SnapshotReader::open(&path, "global").unwrap();
    assert!(reader.read_all().is_empty());
}

#[test]
fn test_finish_replaces_previous_snapshot() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("tally.bin");

    let mut first = SnapshotBuilder::new();
    first.add(&key("global", 1, b"old"), 1).unwrap();
    first.finish(&path).unwrap();

    let mut second = SnapshotBuilder::new();
    second.add(&key("global", 1, b"new"), 2).unwrap();
    second.finish(&path).unwrap();

    let records = SnapshotReader::open(&path, "global").unwrap().read_all();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].key.identity, b"new");
}

#[test]
fn test_builder_rejects_out_of_order_keys() {
    let mut builder = SnapshotBuilder::new();
    builder.add(&key("player_b", 1, b"a"), 1).unwrap();

    let err = builder.add(&key("player_a", 1, b"a"), 1).unwrap_err();
    assert!(matches!(err, TallyError::Snapshot(_)));
    assert!(builder.add(&key("player_b", 1, b"a"), 1).is_err());
}

#[test]
fn test_generation_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("tally.bin");

    let mut builder = SnapshotBuilder::with_generation(41);
    builder.add(&key("global", 1, b"x"), 3).unwrap();
    let info = builder.finish(&path).unwrap();
    assert_eq!(info.wal_generation, 41);

    let reader = SnapshotReader::open(&path, "global").unwrap();
    assert_eq!(reader.wal_generation(), Some(41));
    assert_eq!(reader.read_all().len(), 1);
}

#[test]
fn test_version_one_header_still_read() {
    let mut bytes = b"TLKV".to_vec();
    bytes.extend_from_slice(&1u16.to_be_bytes());
    bytes.extend_from_slice(&1u64.to_be_bytes());
    bytes.extend(current_record(&key("player_a", 4, b"gem"), 9));

    let reader = SnapshotReader::from_bytes(bytes, "global").unwrap();
    assert!(reader.is_versioned());
    assert_eq!(reader.wal_generation(), None);

    let records = reader.read_all();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].key, key("player_a", 4, b"gem"));
    assert_eq!(records[0].count, 9);
}

#[test]
fn test_unsupported_version_rejected() {
    let mut bytes = b"TLKV".to_vec();
    bytes.extend_from_slice(&3u16.to_be_bytes());
    bytes.extend_from_slice(&0u64.to_be_bytes());
    bytes.extend_from_slice(&0u64.to_be_bytes());

    let result = SnapshotReader::from_bytes(bytes, "global");
    assert!(matches!(result, Err(TallyError::Snapshot(_))));
}

#[test]
fn test_truncated_version_two_header_rejected() {
    let mut bytes = b"TLKV".to_vec();
    bytes.extend_from_slice(&2u16.to_be_bytes());
    bytes.extend_from_slice(&0u64.to_be_bytes());

    let result = SnapshotReader::from_bytes(bytes, "global");
    assert!(matches!(result, Err(TallyError::Snapshot(_))));
}

// =============================================================================
// Headerless Format Tests
// =============================================================================

#[test]
fn test_headerless_current_layout() {
    let mut bytes = current_record(&key("player_a", 4, b"gem"), 9);
    bytes.extend(current_record(&key("player_a", 5, b"gem"), 1));

    let reader = SnapshotReader::from_bytes(bytes, "global").unwrap();
    assert!(!reader.is_versioned());

    let records = reader.read_all();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].key, key("player_a", 4, b"gem"));
    assert_eq!(records[0].count, 9);
    assert!(!records[0].legacy);
}

#[test]
fn test_headerless_legacy_layout_gets_default_scope() {
    let mut bytes = legacy_record(0x0102_0304, b"ore", 5);
    bytes.extend(legacy_record(-1, b"", 2));

    let records = SnapshotReader::from_bytes(bytes, "global").unwrap().read_all();
    assert_eq!(records.len(), 2);

    assert!(records[0].legacy);
    assert_eq!(records[0].key, key("global", 0x0102_0304, b"ore"));
    assert_eq!(records[0].count, 5);
    assert_eq!(records[1].key, key("global", -1, b""));
}

#[test]
fn test_headerless_mixed_layouts() {
    let mut bytes = current_record(&key("player_a", 4, b"gem"), 9);
    bytes.extend(legacy_record(7, b"ore", 5));

    let records = SnapshotReader::from_bytes(bytes, "global").unwrap().read_all();
    assert_eq!(records.len(), 2);
    assert!(!records[0].legacy);
    assert!(records[1].legacy);
    assert_eq!(records[1].key, key("global", 7, b"ore"));
}

#[test]
fn test_unreadable_tail_keeps_earlier_records() {
    let mut bytes = legacy_record(7, b"ore", 5);
    bytes.extend_from_slice(&[0xff, 0xff, 0xff]);

    let reader = SnapshotReader::from_bytes(bytes, "global").unwrap();
    let mut iter = reader.records();
    assert_eq!(iter.next().unwrap().count, 5);
    assert!(iter.next().is_none());
    assert!(iter.hit_unreadable());
}

#[test]
fn test_versioned_file_never_decodes_legacy() {
    let mut bytes = b"TLKV".to_vec();
    bytes.extend_from_slice(&1u16.to_be_bytes());
    bytes.extend_from_slice(&1u64.to_be_bytes());
    bytes.extend(legacy_record(7, b"ore", 5));

    let reader = SnapshotReader::from_bytes(bytes, "global").unwrap();
    let mut iter = reader.records();
    assert!(iter.next().is_none());
    assert!(iter.hit_unreadable());
}
