//! S3-compatible blobstore client.
//!
//! Backs onto AWS S3 or any S3-compatible server (MinIO and friends). The
//! directory key names the bucket. Signed URLs are SDK presigned requests.

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream as S3ByteStream;
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::debug;

use blobshed_common::{BlobKey, Error, Result};

use crate::client::{storage_key, storage_prefix, Blob, BlobstoreClient, ByteStream, SignedMethod};
use crate::config::S3Options;

/// S3-compatible blobstore client.
pub struct S3Client {
    client: Client,
    bucket: String,
    root_dir: Option<String>,
}

impl S3Client {
    /// Create a new S3 client for the given bucket.
    pub fn new(options: &S3Options, bucket: &str, root_dir: Option<String>) -> Self {
        let credentials = Credentials::new(
            options.access_key_id.clone(),
            options.secret_access_key.clone(),
            None,
            None,
            "blobshed-static",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(options.region.clone()))
            .credentials_provider(credentials);
        if let Some(endpoint) = &options.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        if options.path_style {
            builder = builder.force_path_style(true);
        }

        Self {
            client: Client::from_conf(builder.build()),
            bucket: bucket.to_string(),
            root_dir,
        }
    }

    fn object_key(&self, key: &BlobKey) -> String {
        storage_key(self.root_dir.as_deref(), key)
    }

    fn copy_source(&self, src: &BlobKey) -> String {
        format!("{}/{}", self.bucket, self.object_key(src))
    }

    /// Delete every object under a raw storage prefix, collecting failures.
    async fn delete_by_storage_prefix(&self, prefix: &str) -> Result<()> {
        let mut failures = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| {
                Error::Network(format!("Failed to list prefix {}: {}", prefix, e))
            })?;
            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                match self
                    .client
                    .delete_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .send()
                    .await
                {
                    Ok(_) => {}
                    Err(e) => failures.push(format!("{}: {}", key, e)),
                }
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

    fn blob_from_object(&self, object: &aws_sdk_s3::types::Object) -> Blob {
        Blob {
            key: object.key().unwrap_or_default().to_string(),
            size: object.size().and_then(|s| u64::try_from(s).ok()),
            etag: object.e_tag().map(|e| e.trim_matches('"').to_string()),
            last_modified: object.last_modified().and_then(to_chrono),
        }
    }
}

fn to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

#[async_trait]
impl BlobstoreClient for S3Client {
    fn backend(&self) -> &str {
        "s3"
    }

    fn root_dir(&self) -> Option<&str> {
        self.root_dir.as_deref()
    }

    async fn exists(&self, key: &BlobKey) -> Result<bool> {
        let object_key = self.object_key(key);
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let service = e.into_service_error();
                if service.is_not_found() {
                    Ok(false)
                } else {
                    Err(Error::Network(format!(
                        "Failed to check for {}/{}: {}",
                        self.bucket, object_key, service
                    )))
                }
            }
        }
    }

    async fn download(&self, key: &BlobKey) -> Result<Vec<u8>> {
        debug!(bucket = %self.bucket, %key, "get from s3");
        let object_key = self.object_key(key);
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|e| {
                let service = e.into_service_error();
                if service.is_no_such_key() {
                    Error::NotFound(format!("Blob not found: {}", key))
                } else {
                    Error::Network(format!("Failed to download {}: {}", object_key, service))
                }
            })?;
        let data = output
            .body
            .collect()
            .await
            .map_err(|e| Error::Network(format!("Failed to read body of {}: {}", object_key, e)))?;
        Ok(data.into_bytes().to_vec())
    }

    async fn download_stream(&self, key: &BlobKey) -> Result<ByteStream> {
        let object_key = self.object_key(key);
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|e| {
                let service = e.into_service_error();
                if service.is_no_such_key() {
                    Error::NotFound(format!("Blob not found: {}", key))
                } else {
                    Error::Network(format!("Failed to download {}: {}", object_key, service))
                }
            })?;
        let stream = ReaderStream::new(output.body.into_async_read()).map(|chunk| {
            chunk
                .map(|b| b.to_vec())
                .map_err(|e| Error::Network(format!("Stream read error: {}", e)))
        });
        Ok(Box::pin(stream))
    }

    async fn put(&self, key: &BlobKey, data: Vec<u8>) -> Result<Blob> {
        debug!(bucket = %self.bucket, %key, size = data.len(), "put to s3");
        let object_key = self.object_key(key);
        let size = data.len() as u64;
        let output = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .body(S3ByteStream::from(data))
            .send()
            .await
            .map_err(|e| {
                Error::Network(format!(
                    "Failed to upload {}: {}",
                    object_key,
                    e.into_service_error()
                ))
            })?;
        Ok(Blob {
            key: object_key,
            size: Some(size),
            etag: output.e_tag().map(|e| e.trim_matches('"').to_string()),
            last_modified: None,
        })
    }

    async fn put_stream(&self, key: &BlobKey, mut stream: ByteStream) -> Result<Blob> {
        // The SDK needs a sized body for a plain PUT, so buffer the stream.
        let mut data = Vec::new();
        while let Some(chunk) = stream.next().await {
            data.extend_from_slice(&chunk?);
        }
        self.put(key, data).await
    }

    async fn copy(&self, src: &BlobKey, dest: &BlobKey) -> Result<()> {
        debug!(bucket = %self.bucket, %src, %dest, "copy in s3");
        let dest_key = self.object_key(dest);
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(self.copy_source(src))
            .key(&dest_key)
            .send()
            .await
            .map_err(|e| {
                let service = e.into_service_error();
                if matches!(service.code(), Some("NoSuchKey") | Some("NotFound")) {
                    Error::NotFound(format!("Blob not found: {}", src))
                } else {
                    Error::Network(format!(
                        "Failed to copy {} to {}: {}",
                        src, dest_key, service
                    ))
                }
            })?;
        Ok(())
    }

    async fn delete(&self, key: &BlobKey) -> Result<()> {
        // S3 deletes are idempotent; probe first so absent keys surface.
        if !self.exists(key).await? {
            return Err(Error::NotFound(format!("Blob not found: {}", key)));
        }
        let object_key = self.object_key(key);
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|e| {
                Error::Network(format!(
                    "Failed to delete {}: {}",
                    object_key,
                    e.into_service_error()
                ))
            })?;
        Ok(())
    }

    async fn delete_all(&self) -> Result<()> {
        let scope = storage_prefix(self.root_dir.as_deref(), "");
        self.delete_by_storage_prefix(&scope).await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        let prefix = storage_prefix(self.root_dir.as_deref(), prefix);
        self.delete_by_storage_prefix(&prefix).await
    }

    async fn blob(&self, key: &BlobKey) -> Result<Blob> {
        let object_key = self.object_key(key);
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|e| {
                let service = e.into_service_error();
                if service.is_not_found() {
                    Error::NotFound(format!("Blob not found: {}", key))
                } else {
                    Error::Network(format!("Failed to stat {}: {}", object_key, service))
                }
            })?;
        Ok(Blob {
            key: object_key,
            size: output.content_length().and_then(|s| u64::try_from(s).ok()),
            etag: output.e_tag().map(|e| e.trim_matches('"').to_string()),
            last_modified: output.last_modified().and_then(to_chrono),
        })
    }

    async fn list(&self, prefix: &str) -> Result<Vec<Blob>> {
        let prefix = storage_prefix(self.root_dir.as_deref(), prefix);
        let mut blobs = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&prefix)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| {
                Error::Network(format!("Failed to list prefix {}: {}", prefix, e))
            })?;
            for object in page.contents() {
                blobs.push(self.blob_from_object(object));
            }
        }

        Ok(blobs)
    }

    async fn signed_url(
        &self,
        key: &BlobKey,
        method: SignedMethod,
        expires_in: Duration,
    ) -> Result<String> {
        let object_key = self.object_key(key);
        let presigning = PresigningConfig::expires_in(expires_in)
            .map_err(|e| Error::InvalidInput(format!("Invalid signing expiry: {}", e)))?;

        let uri = match method {
            SignedMethod::Get => self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(&object_key)
                .presigned(presigning)
                .await
                .map_err(|e| {
                    Error::Network(format!("Failed to sign URL for {}: {}", object_key, e))
                })?
                .uri()
                .to_string(),
            SignedMethod::Put => self
                .client
                .put_object()
                .bucket(&self.bucket)
                .key(&object_key)
                .presigned(presigning)
                .await
                .map_err(|e| {
                    Error::Network(format!("Failed to sign URL for {}: {}", object_key, e))
                })?
                .uri()
                .to_string(),
        };

        Ok(uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> S3Options {
        S3Options {
            region: "us-east-1".to_string(),
            access_key_id: "AKIA".to_string(),
            secret_access_key: "secret".to_string(),
            endpoint: None,
            path_style: false,
        }
    }

    #[test]
    fn test_object_key_is_sharded() {
        let client = S3Client::new(&options(), "packages", None);
        let key = BlobKey::parse("abcdef").unwrap();
        assert_eq!(client.object_key(&key), "ab/cd/abcdef");
    }

    #[test]
    fn test_object_key_includes_root_dir() {
        let client = S3Client::new(&options(), "packages", Some("cc".to_string()));
        let key = BlobKey::parse("abcdef").unwrap();
        assert_eq!(client.object_key(&key), "cc/ab/cd/abcdef");
    }

    #[test]
    fn test_copy_source_includes_bucket() {
        let client = S3Client::new(&options(), "packages", None);
        let key = BlobKey::parse("abcdef").unwrap();
        assert_eq!(client.copy_source(&key), "packages/ab/cd/abcdef");
    }

    #[test]
    fn test_timestamp_conversion() {
        let dt = aws_sdk_s3::primitives::DateTime::from_secs(1_700_000_000);
        let converted = to_chrono(&dt).unwrap();
        assert_eq!(converted.timestamp(), 1_700_000_000);
    }

    #[tokio::test]
    async fn test_signing_expiry_must_be_valid() {
        let client = S3Client::new(&options(), "packages", None);
        let key = BlobKey::parse("abcdef").unwrap();

        // Presigning rejects expiries longer than one week before any
        // request is sent.
        let result = client
            .signed_url(&key, SignedMethod::Get, Duration::from_secs(60 * 60 * 24 * 30))
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
