//! Common types used throughout Blobshed.

use futures::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;

/// Byte stream type for upload/download operations.
pub type ByteStream = Pin<Box<dyn Stream<Item = crate::Result<Vec<u8>>> + Send>>;

/// Shard width used when partitioning keys into storage paths.
const PARTITION_WIDTH: usize = 2;

/// A validated logical blob key, independent of the underlying backend.
///
/// Keys address blobs by their logical name (typically a GUID or a content
/// digest). Backends derive the physical storage key from it via
/// [`BlobKey::partitioned`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlobKey(String);

impl BlobKey {
    /// Parse a key string into a BlobKey.
    ///
    /// # Preconditions
    /// - `key` must be non-empty
    /// - No leading or trailing `/`
    /// - No empty, `.` or `..` segments
    /// - No `\` characters
    ///
    /// # Errors
    /// - Returns error if any rule is violated
    pub fn parse(key: &str) -> crate::Result<Self> {
        if key.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Blob key cannot be empty".to_string(),
            ));
        }
        if key.starts_with('/') || key.ends_with('/') {
            return Err(crate::Error::InvalidInput(format!(
                "Blob key cannot start or end with '/': {}",
                key
            )));
        }
        if key.contains('\\') {
            return Err(crate::Error::InvalidInput(format!(
                "Blob key cannot contain backslashes: {}",
                key
            )));
        }
        for segment in key.split('/') {
            if segment.trim().is_empty() {
                return Err(crate::Error::InvalidInput(format!(
                    "Blob key cannot contain empty segments: {}",
                    key
                )));
            }
            if segment == "." || segment == ".." {
                return Err(crate::Error::InvalidInput(format!(
                    "Blob key cannot contain relative segments: {}",
                    key
                )));
            }
        }
        Ok(Self(key.to_string()))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Append a sub-key segment, e.g. `guid` + `droplet-sha`.
    pub fn join(&self, child: &str) -> crate::Result<Self> {
        Self::parse(&format!("{}/{}", self.0, child))
    }

    /// The sharded storage key for this blob.
    ///
    /// `abcdef` becomes `ab/cd/abcdef`. Keys shorter than two shards are
    /// stored unpartitioned.
    pub fn partitioned(&self) -> String {
        partitioned_from(&self.0)
    }
}

impl TryFrom<String> for BlobKey {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<BlobKey> for String {
    fn from(key: BlobKey) -> Self {
        key.0
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shard a raw prefix the same way full keys are sharded.
///
/// Prefix operations (`delete_prefix`, `list`) must address the same
/// physical layout as `put`, so `guid` becomes `gu/id/guid` and matches
/// every key stored under it.
pub fn partition_prefix(prefix: &str) -> String {
    partitioned_from(prefix)
}

fn partitioned_from(key: &str) -> String {
    let head: Vec<char> = key.chars().take(PARTITION_WIDTH * 2).collect();
    if head.len() < PARTITION_WIDTH * 2 {
        return key.to_string();
    }
    let first: String = head[..PARTITION_WIDTH].iter().collect();
    let second: String = head[PARTITION_WIDTH..].iter().collect();
    format!("{}/{}/{}", first, second, key)
}

/// A content digest attached to an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    /// Digest algorithm name, e.g. "sha256".
    #[serde(rename = "type")]
    pub algorithm: String,
    /// Hex-encoded digest value.
    pub value: String,
}

impl Checksum {
    /// Create a sha256 checksum from a hex digest.
    pub fn sha256(value: impl Into<String>) -> Self {
        Self {
            algorithm: "sha256".to_string(),
            value: value.into(),
        }
    }
}
