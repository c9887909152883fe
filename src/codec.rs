//! Key codec
//!
//! Binary layout of a store key, shared by WAL payloads and snapshot records.
//! All integers are big-endian.
//!
//! ```text
//! ┌───────────────┬───────────┬───────────────┬─────────────┬──────────────┐
//! │ ScopeLen (2)  │ Scope     │ Partition (4) │ IdLen (4)   │ Identity     │
//! │ u16           │ UTF-8     │ i32           │ i32         │ IdLen bytes  │
//! └───────────────┴───────────┴───────────────┴─────────────┴──────────────┘
//! ```
//!
//! The scope prefix matches Java's `DataOutput::writeUTF` for plain text, so
//! files written by earlier hosts decode unchanged.

use bytes::{Buf, BufMut};

use crate::error::{Result, TallyError};
use crate::store::StoreKey;

/// Longest scope the u16 length prefix can carry
pub const MAX_SCOPE_LEN: usize = u16::MAX as usize;

/// Encoded size of a key
pub fn encoded_key_len(key: &StoreKey) -> usize {
    2 + key.scope.len() + 4 + 4 + key.identity.len()
}

/// Append the key layout to `buf`
pub fn put_key(buf: &mut impl BufMut, key: &StoreKey) -> Result<()> {
    if key.scope.len() > MAX_SCOPE_LEN {
        return Err(TallyError::Codec(format!(
            "scope too long: {} bytes (max {})",
            key.scope.len(),
            MAX_SCOPE_LEN
        )));
    }
    let id_len = i32::try_from(key.identity.len()).map_err(|_| {
        TallyError::Codec(format!("identity too long: {} bytes", key.identity.len()))
    })?;

    buf.put_u16(key.scope.len() as u16);
    buf.put_slice(key.scope.as_bytes());
    buf.put_i32(key.partition);
    buf.put_i32(id_len);
    buf.put_slice(&key.identity);
    Ok(())
}

/// Read a key from the front of `buf`, advancing it
///
/// On error `buf` may be partially consumed; callers that need to backtrack
/// decode from a copy of the slice.
pub fn get_key(buf: &mut &[u8]) -> Result<StoreKey> {
    let scope = get_scope(buf)?;
    let (partition, identity) = get_partition_and_identity(buf)?;
    Ok(StoreKey {
        scope,
        partition,
        identity,
    })
}

/// Read a u16-length-prefixed UTF-8 scope
pub fn get_scope(buf: &mut &[u8]) -> Result<String> {
    need(buf, 2, "scope length")?;
    let len = buf.get_u16() as usize;
    need(buf, len, "scope")?;
    let scope = std::str::from_utf8(&buf[..len])
        .map_err(|e| TallyError::Codec(format!("scope is not UTF-8: {}", e)))?
        .to_string();
    buf.advance(len);
    Ok(scope)
}

/// Read `[partition][identity length][identity]`
pub fn get_partition_and_identity(buf: &mut &[u8]) -> Result<(i32, Vec<u8>)> {
    need(buf, 8, "partition and identity length")?;
    let partition = buf.get_i32();
    let id_len = buf.get_i32();
    if id_len < 0 {
        return Err(TallyError::Codec(format!(
            "negative identity length: {}",
            id_len
        )));
    }
    let id_len = id_len as usize;
    need(buf, id_len, "identity")?;
    let identity = buf[..id_len].to_vec();
    buf.advance(id_len);
    Ok((partition, identity))
}

/// Read a big-endian i64
pub fn get_i64(buf: &mut &[u8], what: &str) -> Result<i64> {
    need(buf, 8, what)?;
    Ok(buf.get_i64())
}

fn need(buf: &[u8], len: usize, what: &str) -> Result<()> {
    if buf.remaining() < len {
        return Err(TallyError::Codec(format!(
            "truncated {}: need {} bytes, have {}",
            what,
            len,
            buf.remaining()
        )));
    }
    Ok(())
}
