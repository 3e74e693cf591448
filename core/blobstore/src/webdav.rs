//! WebDAV blobstore client.
//!
//! Talks to a WebDAV blobstore server over HTTPS with basic auth, an
//! optional private CA, and an optional mutual-TLS identity. Objects live
//! under `{endpoint}/{directory_key}/{root_dir?}/{sharded_key}`; bulk
//! deletes go through the server's admin collection; URL signing is
//! delegated to the server's `/sign` endpoint.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::{header, Certificate, Client, Identity, Method, RequestBuilder, StatusCode};
use std::time::Duration;
use url::Url;

use blobshed_common::{partition_prefix, BlobKey, Error, Result};

use crate::client::{storage_key, Blob, BlobstoreClient, ByteStream, SignedMethod};
use crate::config::WebdavOptions;

/// WebDAV blobstore client.
pub struct WebdavClient {
    http: Client,
    endpoint: Url,
    directory_key: String,
    root_dir: Option<String>,
    username: String,
    password: String,
}

impl WebdavClient {
    /// Create a new WebDAV client.
    ///
    /// # Errors
    /// - Endpoint is not a valid base URL
    /// - Certificate or key material cannot be read or parsed
    pub fn new(
        options: &WebdavOptions,
        directory_key: &str,
        root_dir: Option<String>,
    ) -> Result<Self> {
        let endpoint = Url::parse(&options.endpoint)
            .map_err(|e| Error::Config(format!("Invalid WebDAV endpoint: {}", e)))?;
        if endpoint.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "WebDAV endpoint cannot be used as a base URL: {}",
                endpoint
            )));
        }

        let mut builder = Client::builder().user_agent("Blobshed/0.1");

        if let Some(path) = &options.ca_cert_path {
            let pem = std::fs::read(path)?;
            let ca = Certificate::from_pem(&pem)
                .map_err(|e| Error::Config(format!("Invalid CA certificate: {}", e)))?;
            builder = builder.add_root_certificate(ca);
        }

        if let (Some(cert_path), Some(key_path)) =
            (&options.client_cert_path, &options.client_key_path)
        {
            let mut pem = std::fs::read(cert_path)?;
            pem.extend(std::fs::read(key_path)?);
            let identity = Identity::from_pem(&pem)
                .map_err(|e| Error::Config(format!("Invalid client identity: {}", e)))?;
            builder = builder.identity(identity);
        }

        let http = builder
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint,
            directory_key: directory_key.to_string(),
            root_dir,
            username: options.username.clone(),
            password: options.password.clone(),
        })
    }

    fn url_with_segments<'a>(
        &self,
        segments: impl IntoIterator<Item = &'a str>,
    ) -> Result<Url> {
        let mut url = self.endpoint.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| Error::Config("WebDAV endpoint cannot be a base".to_string()))?;
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    /// URL of one stored object.
    fn object_url(&self, key: &BlobKey) -> Result<Url> {
        let storage_key = storage_key(self.root_dir.as_deref(), key);
        let mut segments = vec![self.directory_key.as_str()];
        segments.extend(storage_key.split('/'));
        self.url_with_segments(segments)
    }

    /// URL of the admin collection used for bulk deletes.
    fn admin_url(&self, prefix: Option<&str>) -> Result<Url> {
        let mut segments = vec!["admin", self.directory_key.as_str()];
        if let Some(root) = self.root_dir.as_deref() {
            if !root.is_empty() {
                segments.push(root);
            }
        }
        let sharded = prefix.map(partition_prefix).unwrap_or_default();
        if !sharded.is_empty() {
            segments.extend(sharded.split('/'));
        }
        self.url_with_segments(segments)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password))
    }

    async fn send(&self, request: RequestBuilder, context: &str) -> Result<reqwest::Response> {
        request
            .send()
            .await
            .map_err(|e| Error::Network(format!("{}: {}", context, e)))
    }

    async fn check(&self, response: reqwest::Response, context: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, context, &body))
    }

    fn blob_from_headers(&self, key: &BlobKey, response: &reqwest::Response) -> Blob {
        let headers = response.headers();
        let size = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let etag = headers
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_matches('"').to_string());
        let last_modified = headers
            .get(header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
            .map(|dt| dt.with_timezone(&Utc));
        Blob {
            key: storage_key(self.root_dir.as_deref(), key),
            size,
            etag,
            last_modified,
        }
    }
}

fn status_error(status: StatusCode, context: &str, body: &str) -> Error {
    match status {
        StatusCode::NOT_FOUND => Error::NotFound(context.to_string()),
        StatusCode::UNAUTHORIZED => {
            Error::Authentication("Credentials rejected by WebDAV server".to_string())
        }
        StatusCode::FORBIDDEN => {
            Error::PermissionDenied("Access denied by WebDAV server".to_string())
        }
        _ => Error::Network(format!("{}: {} - {}", context, status, body)),
    }
}

fn copy_method() -> Method {
    Method::from_bytes(b"COPY").expect("COPY is a valid method")
}

#[async_trait]
impl BlobstoreClient for WebdavClient {
    fn backend(&self) -> &str {
        "webdav"
    }

    fn root_dir(&self) -> Option<&str> {
        self.root_dir.as_deref()
    }

    async fn exists(&self, key: &BlobKey) -> Result<bool> {
        let url = self.object_url(key)?;
        let response = self
            .send(self.request(Method::HEAD, url), "Failed to check blob")
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(status_error(status, "Failed to check blob", &body))
            }
        }
    }

    async fn download(&self, key: &BlobKey) -> Result<Vec<u8>> {
        let url = self.object_url(key)?;
        let context = format!("Failed to download {}", key);
        let response = self
            .send(self.request(Method::GET, url), &context)
            .await?;
        let response = self.check(response, &context).await?;
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| Error::Network(format!("{}: {}", context, e)))
    }

    async fn download_stream(&self, key: &BlobKey) -> Result<ByteStream> {
        let url = self.object_url(key)?;
        let context = format!("Failed to download {}", key);
        let response = self
            .send(self.request(Method::GET, url), &context)
            .await?;
        let response = self.check(response, &context).await?;
        let stream = response.bytes_stream().map(|chunk| {
            chunk
                .map(|b| b.to_vec())
                .map_err(|e| Error::Network(format!("Stream read error: {}", e)))
        });
        Ok(Box::pin(stream))
    }

    async fn put(&self, key: &BlobKey, data: Vec<u8>) -> Result<Blob> {
        let url = self.object_url(key)?;
        let size = data.len() as u64;
        let context = format!("Failed to upload {}", key);
        let response = self
            .send(self.request(Method::PUT, url).body(data), &context)
            .await?;
        let response = self.check(response, &context).await?;
        let mut blob = self.blob_from_headers(key, &response);
        blob.size = blob.size.or(Some(size));
        Ok(blob)
    }

    async fn put_stream(&self, key: &BlobKey, stream: ByteStream) -> Result<Blob> {
        let url = self.object_url(key)?;
        let context = format!("Failed to upload {}", key);
        let body = reqwest::Body::wrap_stream(stream);
        let response = self
            .send(self.request(Method::PUT, url).body(body), &context)
            .await?;
        let response = self.check(response, &context).await?;
        Ok(self.blob_from_headers(key, &response))
    }

    async fn copy(&self, src: &BlobKey, dest: &BlobKey) -> Result<()> {
        let src_url = self.object_url(src)?;
        let dest_url = self.object_url(dest)?;
        let context = format!("Failed to copy {} to {}", src, dest);
        let request = self
            .request(copy_method(), src_url)
            .header("Destination", dest_url.as_str());
        let response = self.send(request, &context).await?;
        self.check(response, &context).await?;
        Ok(())
    }

    async fn delete(&self, key: &BlobKey) -> Result<()> {
        let url = self.object_url(key)?;
        let context = format!("Failed to delete {}", key);
        let response = self
            .send(self.request(Method::DELETE, url), &context)
            .await?;
        self.check(response, &context).await?;
        Ok(())
    }

    async fn delete_all(&self) -> Result<()> {
        let url = self.admin_url(None)?;
        let context = "Failed to delete store contents".to_string();
        let response = self
            .send(self.request(Method::DELETE, url), &context)
            .await?;
        match response.status() {
            // An empty collection is success, matching the other backends.
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(status_error(status, &context, &body))
            }
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        let url = self.admin_url(Some(prefix))?;
        let context = format!("Failed to delete prefix {}", prefix);
        let response = self
            .send(self.request(Method::DELETE, url), &context)
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(status_error(status, &context, &body))
            }
        }
    }

    async fn blob(&self, key: &BlobKey) -> Result<Blob> {
        let url = self.object_url(key)?;
        let context = format!("Blob not found: {}", key);
        let response = self
            .send(self.request(Method::HEAD, url), &context)
            .await?;
        let response = self.check(response, &context).await?;
        Ok(self.blob_from_headers(key, &response))
    }

    async fn list(&self, _prefix: &str) -> Result<Vec<Blob>> {
        Err(Error::Unsupported(
            "webdav blobstore does not support listing".to_string(),
        ))
    }

    async fn signed_url(
        &self,
        key: &BlobKey,
        method: SignedMethod,
        expires_in: Duration,
    ) -> Result<String> {
        let sign_url = self.url_with_segments(["sign"])?;
        let expires = sign_expiry(expires_in);
        let path = format!(
            "/{}/{}",
            self.directory_key,
            storage_key(self.root_dir.as_deref(), key)
        );
        let context = format!("Failed to sign URL for {}", key);
        let request = self.request(Method::GET, sign_url).query(&[
            ("path", path.as_str()),
            ("method", method.as_str()),
            ("expires", expires.to_string().as_str()),
        ]);
        let response = self.send(request, &context).await?;
        let response = self.check(response, &context).await?;
        response
            .text()
            .await
            .map(|body| body.trim().to_string())
            .map_err(|e| Error::Network(format!("{}: {}", context, e)))
    }
}

/// Unix timestamp at which a signed URL created now should expire.
fn sign_expiry(expires_in: Duration) -> i64 {
    Utc::now().timestamp() + expires_in.as_secs() as i64
}
