//! Instrumented blobstore handle.

use futures::StreamExt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use blobshed_common::{BlobKey, Error, Result};
use blobshed_metrics::MetricsHandle;

use crate::client::{Blob, BlobstoreClient, ByteStream, SignedMethod};

/// Upload size policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct SizeLimits {
    /// Smallest blob accepted, in bytes.
    pub min_size: Option<u64>,
    /// Largest blob accepted, in bytes.
    pub max_size: Option<u64>,
}

impl SizeLimits {
    /// Whether a blob of `size` bytes falls within the policy.
    pub fn within(&self, size: u64) -> bool {
        if let Some(min) = self.min_size {
            if size < min {
                return false;
            }
        }
        if let Some(max) = self.max_size {
            if size > max {
                return false;
            }
        }
        true
    }
}

/// The public blobstore handle.
///
/// Wraps a backend client and instruments every operation: a timing metric,
/// an outcome counter, and a debug log line per call. File uploads go
/// through the size policy first.
pub struct Blobstore {
    inner: Arc<dyn BlobstoreClient>,
    metrics: MetricsHandle,
    limits: SizeLimits,
}

impl Blobstore {
    pub fn new(inner: Arc<dyn BlobstoreClient>, metrics: MetricsHandle, limits: SizeLimits) -> Self {
        Self {
            inner,
            metrics,
            limits,
        }
    }

    /// Backend name of the wrapped client.
    pub fn backend(&self) -> &str {
        self.inner.backend()
    }

    /// Whether blobs are reachable on the local filesystem.
    pub fn local(&self) -> bool {
        self.inner.local()
    }

    /// Scoping prefix of the wrapped client.
    pub fn root_dir(&self) -> Option<&str> {
        self.inner.root_dir()
    }

    /// Size policy applied to file uploads.
    pub fn limits(&self) -> SizeLimits {
        self.limits
    }

    fn metric(&self, op: &str, suffix: &str) -> String {
        format!("blobstore-{}-{}-{}", self.inner.backend(), op, suffix)
    }

    async fn measured<T>(&self, op: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let start = Instant::now();
        let result = fut.await;
        self.metrics.send_timing(&self.metric(op, "time"), start.elapsed());
        let outcome = if result.is_ok() { "ok" } else { "error" };
        self.metrics.send_counter(&self.metric(op, outcome), 1);
        result
    }

    pub async fn exists(&self, key: &BlobKey) -> Result<bool> {
        debug!(backend = self.backend(), %key, "exists");
        self.measured("exists", self.inner.exists(key)).await
    }

    pub async fn download(&self, key: &BlobKey) -> Result<Vec<u8>> {
        debug!(backend = self.backend(), %key, "download");
        self.measured("download", self.inner.download(key)).await
    }

    pub async fn download_stream(&self, key: &BlobKey) -> Result<ByteStream> {
        debug!(backend = self.backend(), %key, "download stream");
        self.measured("download", self.inner.download_stream(key))
            .await
    }

    pub async fn put(&self, key: &BlobKey, data: Vec<u8>) -> Result<Blob> {
        debug!(backend = self.backend(), %key, size = data.len(), "put");
        self.metrics
            .send_gauge(&self.metric("put", "size"), data.len() as f64);
        self.measured("put", self.inner.put(key, data)).await
    }

    pub async fn put_stream(&self, key: &BlobKey, stream: ByteStream) -> Result<Blob> {
        debug!(backend = self.backend(), %key, "put stream");
        self.measured("put", self.inner.put_stream(key, stream))
            .await
    }

    /// Upload a staged local file.
    ///
    /// Returns `None` without touching the backend when the file size falls
    /// outside the configured limits.
    pub async fn put_file(&self, key: &BlobKey, path: &Path) -> Result<Option<Blob>> {
        let size = fs::metadata(path).await?.len();
        if !self.limits.within(size) {
            info!(
                backend = self.backend(),
                %key,
                size,
                "skipping upload outside size limits"
            );
            self.metrics.send_counter(&self.metric("put", "skip"), 1);
            return Ok(None);
        }

        self.metrics
            .send_gauge(&self.metric("put", "size"), size as f64);
        let file = fs::File::open(path).await?;
        let stream: ByteStream = Box::pin(
            ReaderStream::new(file).map(|chunk| chunk.map(|b| b.to_vec()).map_err(Error::from)),
        );
        let blob = self
            .measured("put", self.inner.put_stream(key, stream))
            .await?;
        Ok(Some(blob))
    }

    pub async fn copy(&self, src: &BlobKey, dest: &BlobKey) -> Result<()> {
        debug!(backend = self.backend(), %src, %dest, "copy");
        self.measured("copy", self.inner.copy(src, dest)).await
    }

    pub async fn delete(&self, key: &BlobKey) -> Result<()> {
        debug!(backend = self.backend(), %key, "delete");
        self.measured("delete", self.inner.delete(key)).await
    }

    pub async fn delete_all(&self) -> Result<()> {
        debug!(backend = self.backend(), "delete all");
        self.measured("delete-all", self.inner.delete_all()).await
    }

    pub async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        debug!(backend = self.backend(), prefix, "delete prefix");
        self.measured("delete-prefix", self.inner.delete_prefix(prefix))
            .await
    }

    pub async fn blob(&self, key: &BlobKey) -> Result<Blob> {
        debug!(backend = self.backend(), %key, "blob metadata");
        self.measured("blob", self.inner.blob(key)).await
    }

    pub async fn list(&self, prefix: &str) -> Result<Vec<Blob>> {
        debug!(backend = self.backend(), prefix, "list");
        self.measured("list", self.inner.list(prefix)).await
    }

    pub async fn signed_url(
        &self,
        key: &BlobKey,
        method: SignedMethod,
        expires_in: Duration,
    ) -> Result<String> {
        debug!(backend = self.backend(), %key, method = method.as_str(), "sign");
        self.measured("sign", self.inner.signed_url(key, method, expires_in))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryClient;
    use blobshed_metrics::MetricsEmitter;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingEmitter {
        counters: Mutex<Vec<(String, u64)>>,
        gauges: Mutex<Vec<(String, f64)>>,
        timings: Mutex<Vec<String>>,
    }

    impl MetricsEmitter for RecordingEmitter {
        fn send_counter(&self, name: &str, value: u64) {
            self.counters.lock().unwrap().push((name.to_string(), value));
        }

        fn send_gauge(&self, name: &str, value: f64) {
            self.gauges.lock().unwrap().push((name.to_string(), value));
        }

        fn send_timing(&self, name: &str, _duration: Duration) {
            self.timings.lock().unwrap().push(name.to_string());
        }
    }

    fn store_with(
        limits: SizeLimits,
    ) -> (Blobstore, Arc<RecordingEmitter>, MemoryClient) {
        let emitter = Arc::new(RecordingEmitter::default());
        let client = MemoryClient::new(None);
        let store = Blobstore::new(Arc::new(client.clone()), emitter.clone(), limits);
        (store, emitter, client)
    }

    #[tokio::test]
    async fn test_delegates_and_measures() {
        let (store, emitter, _) = store_with(SizeLimits::default());
        let key = BlobKey::parse("abcdef").unwrap();

        store.put(&key, vec![1, 2, 3]).await.unwrap();
        assert!(store.exists(&key).await.unwrap());
        assert_eq!(store.download(&key).await.unwrap(), vec![1, 2, 3]);

        let timings = emitter.timings.lock().unwrap();
        assert!(timings.contains(&"blobstore-memory-put-time".to_string()));
        assert!(timings.contains(&"blobstore-memory-exists-time".to_string()));

        let counters = emitter.counters.lock().unwrap();
        assert!(counters.contains(&("blobstore-memory-put-ok".to_string(), 1)));
    }

    #[tokio::test]
    async fn test_error_outcome_counted() {
        let (store, emitter, _) = store_with(SizeLimits::default());
        let key = BlobKey::parse("missing").unwrap();

        assert!(store.download(&key).await.is_err());

        let counters = emitter.counters.lock().unwrap();
        assert!(counters.contains(&("blobstore-memory-download-error".to_string(), 1)));
    }

    #[tokio::test]
    async fn test_put_file_within_limits() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("payload");
        tokio::fs::write(&path, b"12345").await.unwrap();

        let (store, emitter, client) = store_with(SizeLimits {
            min_size: Some(1),
            max_size: Some(10),
        });
        let key = BlobKey::parse("abcdef").unwrap();

        let blob = store.put_file(&key, &path).await.unwrap();
        assert!(blob.is_some());
        assert_eq!(client.download(&key).await.unwrap(), b"12345");

        let gauges = emitter.gauges.lock().unwrap();
        assert!(gauges.contains(&("blobstore-memory-put-size".to_string(), 5.0)));
    }

    #[tokio::test]
    async fn test_put_file_skips_outside_limits() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("payload");
        tokio::fs::write(&path, b"this payload is too large").await.unwrap();

        let (store, emitter, client) = store_with(SizeLimits {
            min_size: None,
            max_size: Some(4),
        });
        let key = BlobKey::parse("abcdef").unwrap();

        let blob = store.put_file(&key, &path).await.unwrap();
        assert!(blob.is_none());
        assert!(!client.exists(&key).await.unwrap());

        let counters = emitter.counters.lock().unwrap();
        assert!(counters.contains(&("blobstore-memory-put-skip".to_string(), 1)));
    }

    #[test]
    fn test_size_limits() {
        let limits = SizeLimits {
            min_size: Some(2),
            max_size: Some(4),
        };
        assert!(!limits.within(1));
        assert!(limits.within(2));
        assert!(limits.within(4));
        assert!(!limits.within(5));

        assert!(SizeLimits::default().within(u64::MAX));
    }
}
