//! Blobstore client trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use blobshed_common::{partition_prefix, BlobKey, Result};

pub use blobshed_common::ByteStream;

/// Metadata for a stored blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blob {
    /// Storage key under the client's directory key.
    pub key: String,
    /// Size in bytes, when the backend reports it.
    pub size: Option<u64>,
    /// ETag or revision for change detection.
    pub etag: Option<String>,
    /// Last modification time.
    pub last_modified: Option<DateTime<Utc>>,
}

/// HTTP verb a signed URL grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignedMethod {
    Get,
    Put,
}

impl SignedMethod {
    /// Lowercase verb name as used in signing requests.
    pub fn as_str(&self) -> &'static str {
        match self {
            SignedMethod::Get => "get",
            SignedMethod::Put => "put",
        }
    }
}

/// Blobstore client trait for different backends.
///
/// All operations are async and use streams for large data transfers.
/// Implementations must handle their own authentication. Logical keys are
/// sharded into storage keys via [`BlobKey::partitioned`]; prefix operations
/// shard the same way so they address the keys `put` created.
#[async_trait]
pub trait BlobstoreClient: Send + Sync {
    /// Get the backend name (e.g. "webdav", "s3", "local").
    fn backend(&self) -> &str;

    /// Whether blobs live on a filesystem reachable by this process.
    fn local(&self) -> bool {
        false
    }

    /// The scoping prefix all storage keys live under, if any.
    ///
    /// Consulted by the safe-delete decorator before bulk deletes.
    fn root_dir(&self) -> Option<&str>;

    /// Check whether a blob exists.
    ///
    /// Absence is `Ok(false)`, never an error. A missing bucket or an
    /// unreachable endpoint is a real error.
    async fn exists(&self, key: &BlobKey) -> Result<bool>;

    /// Download a blob's content.
    ///
    /// # Errors
    /// - Blob not found
    /// - Network/I/O errors
    async fn download(&self, key: &BlobKey) -> Result<Vec<u8>>;

    /// Download a blob as a stream.
    ///
    /// For large blobs, this allows streaming without loading the entire
    /// content into memory.
    async fn download_stream(&self, key: &BlobKey) -> Result<ByteStream>;

    /// Store a blob, creating or overwriting it.
    ///
    /// # Postconditions
    /// - Blob is stored at the sharded key; shard prefixes are created
    ///   implicitly
    /// - Returns metadata of the stored blob
    async fn put(&self, key: &BlobKey, data: Vec<u8>) -> Result<Blob>;

    /// Store a blob from a stream.
    async fn put_stream(&self, key: &BlobKey, stream: ByteStream) -> Result<Blob>;

    /// Copy a blob between two keys without round-tripping the content.
    ///
    /// # Errors
    /// - Source not found
    async fn copy(&self, src: &BlobKey, dest: &BlobKey) -> Result<()>;

    /// Delete a blob.
    ///
    /// # Errors
    /// - Blob not found
    async fn delete(&self, key: &BlobKey) -> Result<()>;

    /// Delete every blob under this client's scope.
    async fn delete_all(&self) -> Result<()>;

    /// Delete every blob under the sharded prefix.
    ///
    /// Individual blobs vanishing mid-delete are ignored; other per-blob
    /// failures are collected and reported together. An empty result set is
    /// success.
    async fn delete_prefix(&self, prefix: &str) -> Result<()>;

    /// Get metadata for a blob.
    ///
    /// # Errors
    /// - Blob not found
    async fn blob(&self, key: &BlobKey) -> Result<Blob>;

    /// List blobs under the sharded prefix. An empty prefix lists the whole
    /// scope.
    async fn list(&self, prefix: &str) -> Result<Vec<Blob>>;

    /// Produce a pre-signed public URL for direct access to a blob.
    async fn signed_url(
        &self,
        key: &BlobKey,
        method: SignedMethod,
        expires_in: Duration,
    ) -> Result<String>;
}

/// Full storage key for a blob: optional root dir plus the sharded key.
pub fn storage_key(root_dir: Option<&str>, key: &BlobKey) -> String {
    match root_dir {
        Some(root) if !root.is_empty() => format!("{}/{}", root, key.partitioned()),
        _ => key.partitioned(),
    }
}

/// Full storage prefix for prefix operations.
///
/// An empty prefix resolves to the scope itself, so `delete_prefix("")`
/// against a scoped client addresses exactly the root dir.
pub fn storage_prefix(root_dir: Option<&str>, prefix: &str) -> String {
    let sharded = partition_prefix(prefix);
    match root_dir {
        Some(root) if !root.is_empty() => {
            if sharded.is_empty() {
                format!("{}/", root)
            } else {
                format!("{}/{}", root, sharded)
            }
        }
        _ => sharded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_serialization() {
        let blob = Blob {
            key: "ab/cd/abcdef".to_string(),
            size: Some(1024),
            etag: Some("abc123".to_string()),
            last_modified: Some(Utc::now()),
        };

        let json = serde_json::to_string(&blob).unwrap();
        let deserialized: Blob = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.key, blob.key);
        assert_eq!(deserialized.size, blob.size);
        assert_eq!(deserialized.etag, blob.etag);
    }

    #[test]
    fn test_storage_key_scoping() {
        let key = BlobKey::parse("abcdef").unwrap();
        assert_eq!(storage_key(None, &key), "ab/cd/abcdef");
        assert_eq!(storage_key(Some(""), &key), "ab/cd/abcdef");
        assert_eq!(storage_key(Some("droplets"), &key), "droplets/ab/cd/abcdef");
    }

    #[test]
    fn test_storage_prefix_addresses_stored_keys() {
        let key = BlobKey::parse("guid1234/droplet").unwrap();
        let stored = storage_key(Some("droplets"), &key);
        let prefix = storage_prefix(Some("droplets"), "guid1234");
        assert!(stored.starts_with(&prefix));
    }

    #[test]
    fn test_empty_storage_prefix_is_scope() {
        assert_eq!(storage_prefix(Some("droplets"), ""), "droplets/");
        assert_eq!(storage_prefix(None, ""), "");
    }

    #[test]
    fn test_signed_method_names() {
        assert_eq!(SignedMethod::Get.as_str(), "get");
        assert_eq!(SignedMethod::Put.as_str(), "put");
    }
}
