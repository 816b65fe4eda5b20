//! Artifact model: the packaged, content-addressed unit of deployment.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

/// SHA-256 digest used as the content address of an artifact.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Compute the SHA-256 digest of `data`.
    pub fn compute(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&hash);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 12 hex chars, for log lines.
    pub fn short(&self) -> String {
        self.to_hex()[..12].to_string()
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.short())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid content hash: {0}")]
pub struct InvalidHash(String);

impl FromStr for ContentHash {
    type Err = InvalidHash;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| InvalidHash(s.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| InvalidHash(s.to_string()))?;
        Ok(Self(arr))
    }
}

impl Serialize for ContentHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Immutable packaged artifact.
///
/// Created once per trigger and shared read-only (behind `Arc`) by every
/// concurrent upload. There is no mutating API.
#[derive(Debug, Clone)]
pub struct Artifact {
    content: Vec<u8>,
    content_hash: ContentHash,
    entries: Vec<String>,
    created_at: DateTime<Utc>,
}

impl Artifact {
    /// Wrap already-packed bytes. `entries` lists the packed paths in archive order.
    pub fn new(content: Vec<u8>, entries: Vec<String>, created_at: DateTime<Utc>) -> Self {
        let content_hash = ContentHash::compute(&content);
        Self {
            content,
            content_hash,
            entries,
            created_at,
        }
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn content_hash(&self) -> ContentHash {
        self.content_hash
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_display_parse_roundtrip() {
        let h = ContentHash::compute(b"hello world");
        let hex = h.to_string();
        assert_eq!(hex.len(), 64);
        assert_eq!(hex.parse::<ContentHash>().unwrap(), h);
    }

    #[test]
    fn hash_parse_rejects_wrong_length() {
        assert!("abcd".parse::<ContentHash>().is_err());
        assert!("zz".parse::<ContentHash>().is_err());
    }

    #[test]
    fn artifact_hash_matches_content() {
        let a = Artifact::new(b"bytes".to_vec(), vec!["index.html".into()], Utc::now());
        assert_eq!(a.content_hash(), ContentHash::compute(b"bytes"));
        assert_eq!(a.len(), 5);
        assert_eq!(a.entries().to_vec(), vec!["index.html".to_string()]);
    }

    #[test]
    fn hash_serializes_as_hex_string() {
        let h = ContentHash::compute(b"x");
        let v = serde_json::to_value(h).unwrap();
        assert_eq!(v, serde_json::Value::String(h.to_hex()));
    }
}
