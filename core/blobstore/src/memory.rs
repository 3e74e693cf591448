//! In-memory blobstore client for testing.

use async_trait::async_trait;
use chrono::Utc;
use futures::stream;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use uuid::Uuid;

use blobshed_common::{BlobKey, Error, Result};

use crate::client::{storage_key, storage_prefix, Blob, BlobstoreClient, ByteStream, SignedMethod};

/// In-memory blobstore client.
///
/// Useful for tests and development. All data is stored in memory and lost
/// on drop. Clones share the same store.
#[derive(Clone)]
pub struct MemoryClient {
    root_dir: Option<String>,
    store: Arc<RwLock<HashMap<String, StoredBlob>>>,
}

#[derive(Debug, Clone)]
struct StoredBlob {
    data: Vec<u8>,
    blob: Blob,
}

impl MemoryClient {
    /// Create a new empty memory client.
    pub fn new(root_dir: Option<String>) -> Self {
        Self {
            root_dir,
            store: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn key_for(&self, key: &BlobKey) -> String {
        storage_key(self.root_dir.as_deref(), key)
    }

    fn prefix_for(&self, prefix: &str) -> String {
        storage_prefix(self.root_dir.as_deref(), prefix)
    }

    fn make_blob(key: String, size: u64) -> Blob {
        Blob {
            key,
            size: Some(size),
            etag: Some(Uuid::new_v4().to_string()),
            last_modified: Some(Utc::now()),
        }
    }
}

#[async_trait]
impl BlobstoreClient for MemoryClient {
    fn backend(&self) -> &str {
        "memory"
    }

    fn root_dir(&self) -> Option<&str> {
        self.root_dir.as_deref()
    }

    async fn exists(&self, key: &BlobKey) -> Result<bool> {
        Ok(self.store.read().unwrap().contains_key(&self.key_for(key)))
    }

    async fn download(&self, key: &BlobKey) -> Result<Vec<u8>> {
        let store = self.store.read().unwrap();
        match store.get(&self.key_for(key)) {
            Some(stored) => Ok(stored.data.clone()),
            None => Err(Error::NotFound(format!("Blob not found: {}", key))),
        }
    }

    async fn download_stream(&self, key: &BlobKey) -> Result<ByteStream> {
        let data = self.download(key).await?;
        let stream = stream::once(async move { Ok(data) });
        Ok(Box::pin(stream))
    }

    async fn put(&self, key: &BlobKey, data: Vec<u8>) -> Result<Blob> {
        let storage_key = self.key_for(key);
        let blob = Self::make_blob(storage_key.clone(), data.len() as u64);
        self.store
            .write()
            .unwrap()
            .insert(storage_key, StoredBlob { data, blob: blob.clone() });
        Ok(blob)
    }

    async fn put_stream(&self, key: &BlobKey, mut stream: ByteStream) -> Result<Blob> {
        use futures::StreamExt;
        let mut data = Vec::new();

        while let Some(chunk) = stream.next().await {
            data.extend_from_slice(&chunk?);
        }

        self.put(key, data).await
    }

    async fn copy(&self, src: &BlobKey, dest: &BlobKey) -> Result<()> {
        let data = {
            let store = self.store.read().unwrap();
            match store.get(&self.key_for(src)) {
                Some(stored) => stored.data.clone(),
                None => return Err(Error::NotFound(format!("Blob not found: {}", src))),
            }
        };
        self.put(dest, data).await?;
        Ok(())
    }

    async fn delete(&self, key: &BlobKey) -> Result<()> {
        match self.store.write().unwrap().remove(&self.key_for(key)) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(format!("Blob not found: {}", key))),
        }
    }

    async fn delete_all(&self) -> Result<()> {
        let scope = self.prefix_for("");
        self.store
            .write()
            .unwrap()
            .retain(|key, _| !key.starts_with(&scope));
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        let prefix = self.prefix_for(prefix);
        self.store
            .write()
            .unwrap()
            .retain(|key, _| !key.starts_with(&prefix));
        Ok(())
    }

    async fn blob(&self, key: &BlobKey) -> Result<Blob> {
        let store = self.store.read().unwrap();
        match store.get(&self.key_for(key)) {
            Some(stored) => Ok(stored.blob.clone()),
            None => Err(Error::NotFound(format!("Blob not found: {}", key))),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<Blob>> {
        let prefix = self.prefix_for(prefix);
        let store = self.store.read().unwrap();
        let mut blobs: Vec<Blob> = store
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(_, stored)| stored.blob.clone())
            .collect();
        blobs.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(blobs)
    }

    async fn signed_url(
        &self,
        _key: &BlobKey,
        _method: SignedMethod,
        _expires_in: Duration,
    ) -> Result<String> {
        Err(Error::Unsupported(
            "memory blobstore cannot sign URLs".to_string(),
        ))
    }
}
