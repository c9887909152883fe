//! WAL record definitions
//!
//! A record is one delta against one key.

use bytes::BufMut;

use crate::codec;
use crate::error::{Result, TallyError};
use crate::store::StoreKey;

/// Frame bytes around a payload: length prefix (4) + checksum (8)
pub const FRAME_OVERHEAD: usize = 4 + 8;

/// Largest payload a reader will accept (guards against a damaged length)
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Payload prefix of a generation mark
pub const GENERATION_MAGIC: &[u8; 4] = b"TLKG";

/// Generation mark payload: magic (4) + generation (8)
///
/// A delta record this short would need a scope of 0x544C bytes, so the
/// two payload kinds never collide.
pub const GENERATION_MARK_SIZE: usize = 12;

/// A single delta against a single key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaRecord {
    pub key: StoreKey,
    pub delta: i64,
}

impl DeltaRecord {
    pub fn new(key: StoreKey, delta: i64) -> Self {
        Self { key, delta }
    }

    /// Encode the payload: `[key][delta: i64]`
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut payload = Vec::with_capacity(codec::encoded_key_len(&self.key) + 8);
        codec::put_key(&mut payload, &self.key)?;
        payload.put_i64(self.delta);

        if payload.len() > MAX_PAYLOAD_SIZE as usize {
            return Err(TallyError::Codec(format!(
                "record too large: {} bytes (max {})",
                payload.len(),
                MAX_PAYLOAD_SIZE
            )));
        }
        Ok(payload)
    }

    /// Decode a payload; trailing bytes are rejected
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut buf = payload;
        let key = codec::get_key(&mut buf)?;
        let delta = codec::get_i64(&mut buf, "delta")?;
        if !buf.is_empty() {
            return Err(TallyError::Codec(format!(
                "{} trailing bytes after delta record",
                buf.len()
            )));
        }
        Ok(Self { key, delta })
    }
}

/// Payload announcing the generation of the records that follow it
pub fn encode_generation(generation: u64) -> Vec<u8> {
    let mut payload = Vec::with_capacity(GENERATION_MARK_SIZE);
    payload.put_slice(GENERATION_MAGIC);
    payload.put_u64(generation);
    payload
}

/// Generation carried by a mark payload, `None` for any other payload
pub fn decode_generation(payload: &[u8]) -> Option<u64> {
    if payload.len() != GENERATION_MARK_SIZE || &payload[..4] != GENERATION_MAGIC {
        return None;
    }
    let mut generation = [0u8; 8];
    generation.copy_from_slice(&payload[4..]);
    Some(u64::from_be_bytes(generation))
}

/// Checksum stored after each payload
pub fn checksum(payload: &[u8]) -> u64 {
    u64::from(crc32fast::hash(payload))
}
