//! Content identifiers.
//!
//! Every blob, tree, commit and manifest in the backing repository is named
//! by a 20-byte hash. The bytes are opaque to this crate: they are compared,
//! hashed, and printed, never interpreted.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Width of an identifier in bytes.
pub const HASH_LEN: usize = 20;

/// A fixed-size, content-derived identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash([u8; HASH_LEN]);

/// Identifier of a commit. Resolved to a root tree by the backing store.
pub type CommitId = Hash;

/// Identifier of a manifest (root tree) attached to a commit.
pub type ManifestId = Hash;

impl Hash {
    pub const ZERO: Hash = Hash([0u8; HASH_LEN]);

    pub const fn new(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Derive an identifier from content: BLAKE3 truncated to 20 bytes.
    ///
    /// Real repositories name objects by their own hash function; this is
    /// used by synthetic stores and tests that need stable, distinct ids.
    pub fn of(data: &[u8]) -> Self {
        let digest = blake3::hash(data);
        let mut bytes = [0u8; HASH_LEN];
        bytes.copy_from_slice(&digest.as_bytes()[..HASH_LEN]);
        Self(bytes)
    }

    /// Build an identifier from an integer, big-endian in the low bytes.
    /// Handy for numbering test fixtures.
    pub fn from_u64(n: u64) -> Self {
        let mut bytes = [0u8; HASH_LEN];
        bytes[HASH_LEN - 8..].copy_from_slice(&n.to_be_bytes());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl From<[u8; HASH_LEN]> for Hash {
    fn from(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseHashError {
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("expected 20 bytes, got {0}")]
    WrongLength(usize),
}

impl FromStr for Hash {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        if bytes.len() != HASH_LEN {
            return Err(ParseHashError::WrongLength(bytes.len()));
        }
        let mut arr = [0u8; HASH_LEN];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
