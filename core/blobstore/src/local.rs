//! Local filesystem blobstore client.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use blobshed_common::{BlobKey, Error, Result};

use crate::client::{storage_key, storage_prefix, Blob, BlobstoreClient, ByteStream, SignedMethod};

/// Local filesystem blobstore client.
///
/// Stores blobs under `{base}/{storage_key}`, creating shard directories on
/// demand. This is the one backend where `local()` is true: callers may read
/// blobs straight off the filesystem.
pub struct LocalClient {
    base: PathBuf,
    root_dir: Option<String>,
}

impl LocalClient {
    /// Create a new local client rooted at the given base directory.
    ///
    /// # Postconditions
    /// - Base directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Invalid path
    /// - Permission denied
    pub fn new(base: impl AsRef<Path>, root_dir: Option<String>) -> Result<Self> {
        let base = base.as_ref().to_path_buf();

        // Create base if it doesn't exist (sync for constructor)
        if !base.exists() {
            std::fs::create_dir_all(&base)?;
        }

        Ok(Self { base, root_dir })
    }

    fn fs_path(&self, key: &BlobKey) -> PathBuf {
        let mut path = self.base.clone();
        for part in storage_key(self.root_dir.as_deref(), key).split('/') {
            path.push(part);
        }
        path
    }

    fn relative_key(&self, path: &Path) -> String {
        path.strip_prefix(&self.base)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn make_blob(&self, storage_key: String, meta: &std::fs::Metadata) -> Blob {
        let modified: Option<DateTime<Utc>> = meta.modified().map(|t| t.into()).ok();
        Blob {
            etag: modified.map(|m| format!("{}-{}", m.timestamp(), meta.len())),
            key: storage_key,
            size: Some(meta.len()),
            last_modified: modified,
        }
    }

    /// Collect every regular file under the base directory.
    async fn walk(&self) -> Result<Vec<(PathBuf, std::fs::Metadata)>> {
        let mut files = Vec::new();
        let mut pending = vec![self.base.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let meta = entry.metadata().await?;
                if meta.is_dir() {
                    pending.push(entry.path());
                } else {
                    files.push((entry.path(), meta));
                }
            }
        }

        Ok(files)
    }

    async fn matching(&self, prefix: &str) -> Result<Vec<(PathBuf, std::fs::Metadata)>> {
        let prefix = storage_prefix(self.root_dir.as_deref(), prefix);
        let mut matches = Vec::new();
        for (path, meta) in self.walk().await? {
            if self.relative_key(&path).starts_with(&prefix) {
                matches.push((path, meta));
            }
        }
        Ok(matches)
    }
}

#[async_trait]
impl BlobstoreClient for LocalClient {
    fn backend(&self) -> &str {
        "local"
    }

    fn local(&self) -> bool {
        true
    }

    fn root_dir(&self) -> Option<&str> {
        self.root_dir.as_deref()
    }

    async fn exists(&self, key: &BlobKey) -> Result<bool> {
        Ok(self.fs_path(key).is_file())
    }

    async fn download(&self, key: &BlobKey) -> Result<Vec<u8>> {
        let path = self.fs_path(key);
        if !path.is_file() {
            return Err(Error::NotFound(format!("Blob not found: {}", key)));
        }
        Ok(fs::read(&path).await?)
    }

    async fn download_stream(&self, key: &BlobKey) -> Result<ByteStream> {
        use futures::StreamExt;
        use tokio_util::io::ReaderStream;

        let path = self.fs_path(key);
        if !path.is_file() {
            return Err(Error::NotFound(format!("Blob not found: {}", key)));
        }
        let file = fs::File::open(&path).await?;
        let stream =
            ReaderStream::new(file).map(|chunk| chunk.map(|b| b.to_vec()).map_err(Error::from));
        Ok(Box::pin(stream))
    }

    async fn put(&self, key: &BlobKey, data: Vec<u8>) -> Result<Blob> {
        let path = self.fs_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, &data).await?;

        let meta = fs::metadata(&path).await?;
        Ok(self.make_blob(storage_key(self.root_dir.as_deref(), key), &meta))
    }

    async fn put_stream(&self, key: &BlobKey, mut stream: ByteStream) -> Result<Blob> {
        use tokio::io::AsyncWriteExt;
        use futures::StreamExt;

        let path = self.fs_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&path).await?;
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;

        let meta = fs::metadata(&path).await?;
        Ok(self.make_blob(storage_key(self.root_dir.as_deref(), key), &meta))
    }

    async fn copy(&self, src: &BlobKey, dest: &BlobKey) -> Result<()> {
        let src_path = self.fs_path(src);
        if !src_path.is_file() {
            return Err(Error::NotFound(format!("Blob not found: {}", src)));
        }
        let dest_path = self.fs_path(dest);
        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(&src_path, &dest_path).await?;
        Ok(())
    }

    async fn delete(&self, key: &BlobKey) -> Result<()> {
        let path = self.fs_path(key);
        if !path.is_file() {
            return Err(Error::NotFound(format!("Blob not found: {}", key)));
        }
        fs::remove_file(&path).await?;
        Ok(())
    }

    async fn delete_all(&self) -> Result<()> {
        match self.root_dir.as_deref() {
            Some(root) if !root.is_empty() => {
                let scope = self.base.join(root);
                match fs::remove_dir_all(&scope).await {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(e.into()),
                }
            }
            _ => {
                // Unscoped: clear the base directory but keep it in place.
                let mut entries = fs::read_dir(&self.base).await?;
                while let Some(entry) = entries.next_entry().await? {
                    let path = entry.path();
                    if entry.metadata().await?.is_dir() {
                        fs::remove_dir_all(&path).await?;
                    } else {
                        fs::remove_file(&path).await?;
                    }
                }
                Ok(())
            }
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        let mut failures = Vec::new();
        for (path, _) in self.matching(prefix).await? {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => failures.push(format!("{}: {}", path.display(), e)),
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Blobstore(format!(
                "Errors while deleting prefix {}: {}",
                prefix,
                failures.join(", ")
            )))
        }
    }

    async fn blob(&self, key: &BlobKey) -> Result<Blob> {
        let path = self.fs_path(key);
        if !path.is_file() {
            return Err(Error::NotFound(format!("Blob not found: {}", key)));
        }
        let meta = fs::metadata(&path).await?;
        Ok(self.make_blob(storage_key(self.root_dir.as_deref(), key), &meta))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<Blob>> {
        let mut blobs: Vec<Blob> = self
            .matching(prefix)
            .await?
            .into_iter()
            .map(|(path, meta)| self.make_blob(self.relative_key(&path), &meta))
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
            "local blobstore cannot sign URLs".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_download() {
        let temp = TempDir::new().unwrap();
        let client = LocalClient::new(temp.path(), None).unwrap();
        let key = BlobKey::parse("abcdef").unwrap();
        let data = b"Hello, local!".to_vec();

        client.put(&key, data.clone()).await.unwrap();
        assert_eq!(client.download(&key).await.unwrap(), data);

        // Sharded layout on disk.
        assert!(temp.path().join("ab/cd/abcdef").is_file());
    }

    #[tokio::test]
    async fn test_absent_key_semantics() {
        let temp = TempDir::new().unwrap();
        let client = LocalClient::new(temp.path(), None).unwrap();
        let key = BlobKey::parse("abcdef").unwrap();

        assert!(!client.exists(&key).await.unwrap());
        assert!(matches!(
            client.download(&key).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(client.delete(&key).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_copy() {
        let temp = TempDir::new().unwrap();
        let client = LocalClient::new(temp.path(), None).unwrap();
        let src = BlobKey::parse("source-key").unwrap();
        let dest = BlobKey::parse("dest-key").unwrap();

        client.put(&src, vec![1, 2, 3]).await.unwrap();
        client.copy(&src, &dest).await.unwrap();

        assert_eq!(client.download(&dest).await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_delete_prefix() {
        let temp = TempDir::new().unwrap();
        let client = LocalClient::new(temp.path(), None).unwrap();
        let one = BlobKey::parse("guid1234/one").unwrap();
        let other = BlobKey::parse("guid9999/one").unwrap();

        client.put(&one, vec![1]).await.unwrap();
        client.put(&other, vec![2]).await.unwrap();

        client.delete_prefix("guid1234").await.unwrap();

        assert!(!client.exists(&one).await.unwrap());
        assert!(client.exists(&other).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_all_scoped() {
        let temp = TempDir::new().unwrap();
        let scoped = LocalClient::new(temp.path(), Some("cc".to_string())).unwrap();
        let unscoped = LocalClient::new(temp.path(), None).unwrap();
        let key = BlobKey::parse("abcdef").unwrap();

        scoped.put(&key, vec![1]).await.unwrap();
        unscoped.put(&key, vec![2]).await.unwrap();

        scoped.delete_all().await.unwrap();

        assert!(!scoped.exists(&key).await.unwrap());
        assert!(unscoped.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_list() {
        let temp = TempDir::new().unwrap();
        let client = LocalClient::new(temp.path(), None).unwrap();

        client
            .put(&BlobKey::parse("guid1234/one").unwrap(), vec![1])
            .await
            .unwrap();
        client
            .put(&BlobKey::parse("guid1234/two").unwrap(), vec![2, 2])
            .await
            .unwrap();

        let blobs = client.list("guid1234").await.unwrap();
        assert_eq!(blobs.len(), 2);
        assert_eq!(blobs[0].key, "gu/id/guid1234/one");
        assert_eq!(blobs[0].size, Some(1));
    }

    #[tokio::test]
    async fn test_blob_metadata() {
        let temp = TempDir::new().unwrap();
        let client = LocalClient::new(temp.path(), None).unwrap();
        let key = BlobKey::parse("abcdef").unwrap();

        client.put(&key, vec![1, 2, 3]).await.unwrap();
        let blob = client.blob(&key).await.unwrap();

        assert_eq!(blob.key, "ab/cd/abcdef");
        assert_eq!(blob.size, Some(3));
        assert!(blob.etag.is_some());
        assert!(blob.last_modified.is_some());
    }

    #[tokio::test]
    async fn test_stream_round_trip() {
        use futures::StreamExt;

        let temp = TempDir::new().unwrap();
        let client = LocalClient::new(temp.path(), None).unwrap();
        let key = BlobKey::parse("abcdef").unwrap();
        let chunks: ByteStream =
            Box::pin(futures::stream::iter(vec![Ok(vec![1u8]), Ok(vec![2u8, 3])]));

        client.put_stream(&key, chunks).await.unwrap();

        let mut collected = Vec::new();
        let mut stream = client.download_stream(&key).await.unwrap();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_signing_unsupported() {
        let temp = TempDir::new().unwrap();
        let client = LocalClient::new(temp.path(), None).unwrap();
        let key = BlobKey::parse("abcdef").unwrap();

        assert!(matches!(
            client
                .signed_url(&key, SignedMethod::Get, Duration::from_secs(60))
                .await,
            Err(Error::Unsupported(_))
        ));
    }
}
