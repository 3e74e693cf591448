//! Null blobstore client.

use async_trait::async_trait;
use std::time::Duration;

use blobshed_common::{BlobKey, Error, Result};

use crate::client::{Blob, BlobstoreClient, ByteStream, SignedMethod};

/// A client that accepts every write and stores nothing.
///
/// Used when a resource type has no backing store configured: uploads are
/// discarded, reads behave as if the store were empty.
#[derive(Debug, Default, Clone)]
pub struct NullClient;

impl NullClient {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BlobstoreClient for NullClient {
    fn backend(&self) -> &str {
        "null"
    }

    fn root_dir(&self) -> Option<&str> {
        None
    }

    async fn exists(&self, _key: &BlobKey) -> Result<bool> {
        Ok(false)
    }

    async fn download(&self, key: &BlobKey) -> Result<Vec<u8>> {
        Err(Error::NotFound(format!("Blob not found: {}", key)))
    }

    async fn download_stream(&self, key: &BlobKey) -> Result<ByteStream> {
        Err(Error::NotFound(format!("Blob not found: {}", key)))
    }

    async fn put(&self, key: &BlobKey, data: Vec<u8>) -> Result<Blob> {
        Ok(Blob {
            key: key.partitioned(),
            size: Some(data.len() as u64),
            etag: None,
            last_modified: None,
        })
    }

    async fn put_stream(&self, key: &BlobKey, mut stream: ByteStream) -> Result<Blob> {
        use futures::StreamExt;
        // Drain the stream so upstream producers complete normally.
        let mut size = 0u64;
        while let Some(chunk) = stream.next().await {
            size += chunk?.len() as u64;
        }
        Ok(Blob {
            key: key.partitioned(),
            size: Some(size),
            etag: None,
            last_modified: None,
        })
    }

    async fn copy(&self, _src: &BlobKey, _dest: &BlobKey) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _key: &BlobKey) -> Result<()> {
        Ok(())
    }

    async fn delete_all(&self) -> Result<()> {
        Ok(())
    }

    async fn delete_prefix(&self, _prefix: &str) -> Result<()> {
        Ok(())
    }

    async fn blob(&self, key: &BlobKey) -> Result<Blob> {
        Err(Error::NotFound(format!("Blob not found: {}", key)))
    }

    async fn list(&self, _prefix: &str) -> Result<Vec<Blob>> {
        Ok(Vec::new())
    }

    async fn signed_url(
        &self,
        _key: &BlobKey,
        _method: SignedMethod,
        _expires_in: Duration,
    ) -> Result<String> {
        Err(Error::Unsupported(
            "null blobstore cannot sign URLs".to_string(),
        ))
    }
}
