//! Key hashing for fixed-width resource identifiers.
use sha1::{Digest, Sha1};
use std::fmt;

/// The width of a key hash in bytes.
pub const KEY_HASH_LEN: usize = 20;

/// The 20-byte SHA-1 digest of a resource key.
///
/// All indexes address resources by their hash instead of the (potentially
/// large) client-supplied key, so index entries stay fixed-width and
/// equality-fast. The hash algorithm is a format-level constant of the
/// persisted log; changing it would be a schema migration.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyHash(pub [u8; KEY_HASH_LEN]);

impl KeyHash {
    /// The smallest possible hash value, usable as a range bound.
    pub const MIN: KeyHash = KeyHash([0x00; KEY_HASH_LEN]);
    /// The largest possible hash value, usable as a range bound.
    pub const MAX: KeyHash = KeyHash([0xff; KEY_HASH_LEN]);

    /// Hashes the UTF-8 bytes of a resource key.
    pub fn from_key(key: &str) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(key.as_bytes());
        KeyHash(hasher.finalize().into())
    }

    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_HASH_LEN] {
        &self.0
    }
}

impl fmt::Debug for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}
