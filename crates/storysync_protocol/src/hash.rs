//! Content hashing for change detection.
//!
//! An [`EntityHash`] is the SHA-256 digest of the entity's canonical CBOR
//! encoding. The canonical form is produced from the decoded entity, so field
//! order in a transport body never influences the digest, while any change to
//! a field (or to the type discriminator) does.

use crate::entity::ProjectEntity;
use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// A deterministic digest of an entity's content.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityHash([u8; 32]);

impl EntityHash {
    /// Size of the digest in bytes.
    pub const LEN: usize = 32;

    /// Computes the hash of an entity.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Encoding`] if the canonical form cannot be
    /// produced.
    pub fn of(entity: &ProjectEntity) -> ProtocolResult<Self> {
        let canonical = canonical_bytes(entity)?;
        Ok(Self(Sha256::digest(&canonical).into()))
    }

    /// Wraps raw digest bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns the lowercase hex rendering used in headers.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Canonical CBOR form of an entity.
fn canonical_bytes(entity: &ProjectEntity) -> ProtocolResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(256);
    ciborium::into_writer(entity, &mut buf).map_err(|e| ProtocolError::encoding(e.to_string()))?;
    Ok(buf)
}

impl fmt::Display for EntityHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for EntityHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityHash({})", &self.to_hex()[..12])
    }
}

impl FromStr for EntityHash {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim()).map_err(|e| ProtocolError::InvalidHash(e.to_string()))?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            ProtocolError::InvalidHash(format!("expected {} bytes, got {}", Self::LEN, b.len()))
        })?;
        Ok(Self(bytes))
    }
}

impl Serialize for EntityHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for EntityHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
