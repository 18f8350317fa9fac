//! Content identifiers for persisted map nodes.
//!
//! A node's id is the SHA-256 of its serialized bytes, so equal contents
//! always resolve to the same id and unchanged subtrees are shared between
//! map versions.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::Digest;
use std::fmt;

/// SHA-256 digest of a serialized node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentId([u8; 32]);

impl ContentId {
    pub const LEN: usize = 32;

    /// Hash `bytes` into an id.
    pub fn of(bytes: &[u8]) -> Self {
        let digest = sha2::Sha256::digest(bytes);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        ContentId(out)
    }

    pub fn from_digest(digest: [u8; 32]) -> Self {
        ContentId(digest)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        <[u8; 32]>::try_from(bytes)
            .map(ContentId)
            .map_err(|_| Error::corrupt(format!("content id must be 32 bytes, got {}", bytes.len())))
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| Error::corrupt(format!("content id hex: {}", e)))?;
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// True if `bytes` hash to this id.
    pub fn verifies(&self, bytes: &[u8]) -> bool {
        ContentId::of(bytes) == *self
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", &self.to_hex()[..12])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_sha256() {
        let id = ContentId::of(b"hello");
        assert_eq!(
            id.to_hex(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert!(id.verifies(b"hello"));
        assert!(!id.verifies(b"hello!"));
    }

    #[test]
    fn test_hex_round_trip() {
        let id = ContentId::of(b"node");
        assert_eq!(ContentId::from_hex(&id.to_string()).unwrap(), id);
        assert!(ContentId::from_hex("abcd").is_err());
    }
}
