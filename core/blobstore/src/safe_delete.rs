//! Safe-delete decorator.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use blobshed_common::{BlobKey, Error, Result};

use crate::client::{Blob, BlobstoreClient, ByteStream, SignedMethod};

/// Decorator refusing bulk deletes that would wipe an unscoped store.
///
/// Every other operation is delegated unchanged. `delete_all` requires the
/// wrapped client to be scoped to a root dir; `delete_prefix` additionally
/// accepts an unscoped client as long as the prefix is non-empty.
pub struct SafeDeleteClient {
    inner: Arc<dyn BlobstoreClient>,
}

impl SafeDeleteClient {
    pub fn new(inner: Arc<dyn BlobstoreClient>) -> Self {
        Self { inner }
    }

    fn scoped(&self) -> bool {
        self.inner.root_dir().map(|r| !r.is_empty()).unwrap_or(false)
    }
}

#[async_trait]
impl BlobstoreClient for SafeDeleteClient {
    fn backend(&self) -> &str {
        self.inner.backend()
    }

    fn local(&self) -> bool {
        self.inner.local()
    }

    fn root_dir(&self) -> Option<&str> {
        self.inner.root_dir()
    }

    async fn exists(&self, key: &BlobKey) -> Result<bool> {
        self.inner.exists(key).await
    }

    async fn download(&self, key: &BlobKey) -> Result<Vec<u8>> {
        self.inner.download(key).await
    }

    async fn download_stream(&self, key: &BlobKey) -> Result<ByteStream> {
        self.inner.download_stream(key).await
    }

    async fn put(&self, key: &BlobKey, data: Vec<u8>) -> Result<Blob> {
        self.inner.put(key, data).await
    }

    async fn put_stream(&self, key: &BlobKey, stream: ByteStream) -> Result<Blob> {
        self.inner.put_stream(key, stream).await
    }

    async fn copy(&self, src: &BlobKey, dest: &BlobKey) -> Result<()> {
        self.inner.copy(src, dest).await
    }

    async fn delete(&self, key: &BlobKey) -> Result<()> {
        self.inner.delete(key).await
    }

    async fn delete_all(&self) -> Result<()> {
        if !self.scoped() {
            return Err(Error::UnsafeDelete(
                "delete_all on a blobstore without a root directory would wipe the whole store"
                    .to_string(),
            ));
        }
        self.inner.delete_all().await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        if !self.scoped() && prefix.is_empty() {
            return Err(Error::UnsafeDelete(
                "delete_prefix with an empty prefix on an unscoped blobstore would wipe the whole store"
                    .to_string(),
            ));
        }
        self.inner.delete_prefix(prefix).await
    }

    async fn blob(&self, key: &BlobKey) -> Result<Blob> {
        self.inner.blob(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<Blob>> {
        self.inner.list(prefix).await
    }

    async fn signed_url(
        &self,
        key: &BlobKey,
        method: SignedMethod,
        expires_in: Duration,
    ) -> Result<String> {
        self.inner.signed_url(key, method, expires_in).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryClient;

    #[tokio::test]
    async fn test_unscoped_delete_all_refused() {
        let inner = MemoryClient::new(None);
        let key = BlobKey::parse("abcdef").unwrap();
        inner.put(&key, vec![1]).await.unwrap();

        let client = SafeDeleteClient::new(Arc::new(inner.clone()));
        assert!(matches!(
            client.delete_all().await,
            Err(Error::UnsafeDelete(_))
        ));

        // The backend was never reached.
        assert!(inner.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_scoped_delete_all_delegates() {
        let inner = MemoryClient::new(Some("cc".to_string()));
        let key = BlobKey::parse("abcdef").unwrap();
        inner.put(&key, vec![1]).await.unwrap();

        let client = SafeDeleteClient::new(Arc::new(inner.clone()));
        client.delete_all().await.unwrap();

        assert!(!inner.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_root_dir_counts_as_unscoped() {
        let inner = MemoryClient::new(Some(String::new()));
        let client = SafeDeleteClient::new(Arc::new(inner));

        assert!(matches!(
            client.delete_all().await,
            Err(Error::UnsafeDelete(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_prefix_requires_scope_or_prefix() {
        let inner = MemoryClient::new(None);
        let key = BlobKey::parse("guid1234/one").unwrap();
        inner.put(&key, vec![1]).await.unwrap();

        let client = SafeDeleteClient::new(Arc::new(inner.clone()));

        assert!(matches!(
            client.delete_prefix("").await,
            Err(Error::UnsafeDelete(_))
        ));

        client.delete_prefix("guid1234").await.unwrap();
        assert!(!inner.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_non_bulk_operations_unaffected() {
        let client = SafeDeleteClient::new(Arc::new(MemoryClient::new(None)));
        let key = BlobKey::parse("abcdef").unwrap();

        client.put(&key, vec![1, 2]).await.unwrap();
        assert!(client.exists(&key).await.unwrap());
        assert_eq!(client.download(&key).await.unwrap(), vec![1, 2]);
        client.delete(&key).await.unwrap();
        assert!(!client.exists(&key).await.unwrap());
    }
}
