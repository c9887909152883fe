//! Snapshot record codec
//!
//! Trial decoding returns a tagged result instead of backtracking on error:
//! the input slice is only advanced by the caller, using the reported length.

use bytes::BufMut;

use crate::codec;
use crate::error::Result;
use crate::store::StoreKey;

/// Outcome of decoding one record at the front of a buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedRecord {
    /// Current layout
    Current {
        key: StoreKey,
        count: i64,
        len: usize,
    },

    /// Scope-less legacy layout; the caller assigns the default scope
    Legacy {
        partition: i32,
        identity: Vec<u8>,
        count: i64,
        len: usize,
    },

    /// Neither layout fits; nothing after this point can be framed
    Unreadable,
}

/// Append one record in the current layout
pub fn encode_record(buf: &mut Vec<u8>, key: &StoreKey, count: i64) -> Result<()> {
    codec::put_key(buf, key)?;
    buf.put_i64(count);
    Ok(())
}

/// Decode the record at the front of `buf`
///
/// With `allow_legacy` false only the current layout is tried (files that
/// carry the versioned header never contain legacy records).
pub fn decode_record(buf: &[u8], allow_legacy: bool) -> DecodedRecord {
    if let Some(record) = decode_current(buf) {
        return record;
    }
    if allow_legacy {
        if let Some(record) = decode_legacy(buf) {
            return record;
        }
    }
    DecodedRecord::Unreadable
}

fn decode_current(buf: &[u8]) -> Option<DecodedRecord> {
    let mut cursor = buf;
    let key = codec::get_key(&mut cursor).ok()?;
    let count = codec::get_i64(&mut cursor, "count").ok()?;
    Some(DecodedRecord::Current {
        key,
        count,
        len: buf.len() - cursor.len(),
    })
}

fn decode_legacy(buf: &[u8]) -> Option<DecodedRecord> {
    let mut cursor = buf;
    let (partition, identity) = codec::get_partition_and_identity(&mut cursor).ok()?;
    let count = codec::get_i64(&mut cursor, "count").ok()?;
    Some(DecodedRecord::Legacy {
        partition,
        identity,
        count,
        len: buf.len() - cursor.len(),
    })
}
