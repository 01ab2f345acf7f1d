use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::Error;

/// SHA-256 hash used for content addressing
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; 32]);

impl Hash {
    /// zero hash (useful as sentinel)
    pub const ZERO: Hash = Hash([0u8; 32]);

    /// create from raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// parse from hex string
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        let bytes = hex::decode(s).map_err(|_| Error::InvalidHashHex(s.to_string()))?;
        if bytes.len() != 32 {
            return Err(Error::InvalidHashHex(s.to_string()));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// true if the string has the shape of a full hex hash
    pub fn looks_like_hex(s: &str) -> bool {
        s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
    }

    /// get raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// first 12 hex chars, for display
    pub fn short(&self) -> String {
        self.to_hex()[..12].to_string()
    }

    /// split into path components for object store
    /// returns (first 2 hex chars, remaining 62 hex chars)
    pub fn to_path_components(&self) -> (String, String) {
        let hex = self.to_hex();
        (hex[..2].to_string(), hex[2..].to_string())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.short())
    }
}

impl std::str::FromStr for Hash {
    type Err = Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// digest of an asset's raw bytes
pub fn compute_asset_hash(content: &[u8]) -> Hash {
    Hash(Sha256::digest(content).into())
}

/// hash of compressed object bytes (commits and partitions)
pub fn compute_object_hash(compressed: &[u8]) -> Hash {
    Hash(Sha256::digest(compressed).into())
}

/// streaming asset hasher for large files
pub struct AssetHasher {
    hasher: Sha256,
}

impl AssetHasher {
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    /// feed content bytes
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// finalize and return hash
    pub fn finalize(self) -> Hash {
        Hash(self.hasher.finalize().into())
    }
}

impl Default for AssetHasher {
    fn default() -> Self {
        Self::new()
    }
}
