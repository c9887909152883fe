//! Identity decoding
//!
//! The identity part of a key is opaque bytes to the store. Hosts that know
//! how to turn those bytes into a richer value plug in a decoder; its output
//! is cached next to the count and handed back from `Engine::query`.

/// Host-supplied decoder for identity bytes
///
/// Decoding is best-effort: returning `None` only means the entry is kept
/// without a cached identity. Counts never depend on it.
pub trait IdentityDecoder: Send + Sync + 'static {
    /// Rich in-memory form of an identity
    type Identity: Send + Sync + 'static;

    fn decode(&self, bytes: &[u8]) -> Option<Self::Identity>;
}

/// Decoder for hosts that only need counts
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIdentity;

impl IdentityDecoder for NoIdentity {
    type Identity = ();

    fn decode(&self, _bytes: &[u8]) -> Option<()> {
        None
    }
}

/// Decodes identities that are UTF-8 text (names, resource ids)
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Identity;

impl IdentityDecoder for Utf8Identity {
    type Identity = String;

    fn decode(&self, bytes: &[u8]) -> Option<String> {
        std::str::from_utf8(bytes).ok().map(str::to_string)
    }
}
