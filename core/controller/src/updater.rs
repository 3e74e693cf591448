//! Resource state updates.
//!
//! Uploads are tracked by the controller as resource state transitions:
//! `PROCESSING_UPLOAD` when the copy starts, `READY` with the content
//! checksums when it lands, `FAILED` with the error otherwise. The updater
//! PATCHes `{endpoint}/internal/v4/{resource}/{guid}`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use url::Url;

use blobshed_common::{Checksum, Error, Result};

use crate::mtls::{build_mtls_client, MtlsConfig};
use crate::retry::RetryPolicy;

fn default_resource() -> String {
    "packages".to_string()
}

/// Connection settings for the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Base URL of the controller, e.g. "https://controller.internal:9023".
    pub endpoint: String,
    /// Resource segment in update paths.
    #[serde(default = "default_resource")]
    pub resource: String,
    /// Client identity for mutual TLS. Without it the updater connects
    /// unauthenticated, which only makes sense against test servers.
    #[serde(default)]
    pub mtls: Option<MtlsConfig>,
}

/// Processing state of an uploaded resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceState {
    ProcessingUpload,
    Ready,
    Failed,
}

#[derive(Debug, Serialize)]
struct UpdatePayload<'a> {
    state: ResourceState,
    #[serde(skip_serializing_if = "Option::is_none")]
    checksums: Option<&'a [Checksum]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

/// Reports upload outcomes for a resource.
#[async_trait]
pub trait StateUpdater: Send + Sync {
    /// The upload for `guid` has started processing.
    async fn processing_upload(&self, guid: &str) -> Result<()>;

    /// The upload for `guid` is stored; `checksums` describe the content.
    async fn ready(&self, guid: &str, checksums: &[Checksum]) -> Result<()>;

    /// The upload for `guid` failed.
    async fn failed(&self, guid: &str, error: &str) -> Result<()>;
}

/// Updater that PATCHes resource state over HTTP.
pub struct HttpUpdater {
    http: Client,
    endpoint: Url,
    resource: String,
    retry: RetryPolicy,
}

impl HttpUpdater {
    /// Create an updater for the configured controller.
    ///
    /// # Errors
    /// - Endpoint is not a valid base URL
    /// - mTLS material cannot be loaded
    pub fn new(config: &ControllerConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint)
            .map_err(|e| Error::Config(format!("Invalid controller endpoint: {}", e)))?;
        if endpoint.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "Controller endpoint cannot be used as a base URL: {}",
                endpoint
            )));
        }

        let http = match &config.mtls {
            Some(mtls) => build_mtls_client(mtls)?,
            None => Client::builder()
                .user_agent("Blobshed/0.1")
                .build()
                .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?,
        };

        Ok(Self {
            http,
            endpoint,
            resource: config.resource.clone(),
            retry: RetryPolicy::default(),
        })
    }

    /// Override the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn update_url(&self, guid: &str) -> Result<Url> {
        let mut url = self.endpoint.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| Error::Config("Controller endpoint cannot be a base".to_string()))?;
            path.extend(["internal", "v4", self.resource.as_str(), guid]);
        }
        Ok(url)
    }

    async fn send_update(&self, guid: &str, payload: UpdatePayload<'_>) -> Result<()> {
        let url = self.update_url(guid)?;
        debug!(%guid, state = ?payload.state, "controller update");

        self.retry
            .run(|| async {
                let response = self
                    .http
                    .patch(url.clone())
                    .json(&payload)
                    .send()
                    .await
                    .map_err(|e| Error::Network(format!("Failed to reach controller: {}", e)))?;

                let status = response.status();
                if status.is_success() {
                    return Ok(());
                }
                let body = response.text().await.unwrap_or_default();
                Err(status_error(status, guid, &body))
            })
            .await
    }
}

fn status_error(status: StatusCode, guid: &str, body: &str) -> Error {
    match status {
        StatusCode::NOT_FOUND => Error::NotFound(format!("Resource not found: {}", guid)),
        StatusCode::UNPROCESSABLE_ENTITY => Error::Conflict(format!(
            "Controller rejected state transition for {}: {}",
            guid, body
        )),
        StatusCode::UNAUTHORIZED => {
            Error::Authentication("Credentials rejected by controller".to_string())
        }
        StatusCode::FORBIDDEN => {
            Error::PermissionDenied("Access denied by controller".to_string())
        }
        _ => Error::Network(format!(
            "Controller update for {} failed: {} - {}",
            guid, status, body
        )),
    }
}

#[async_trait]
impl StateUpdater for HttpUpdater {
    async fn processing_upload(&self, guid: &str) -> Result<()> {
        self.send_update(
            guid,
            UpdatePayload {
                state: ResourceState::ProcessingUpload,
                checksums: None,
                error: None,
            },
        )
        .await
    }

    async fn ready(&self, guid: &str, checksums: &[Checksum]) -> Result<()> {
        self.send_update(
            guid,
            UpdatePayload {
                state: ResourceState::Ready,
                checksums: Some(checksums),
                error: None,
            },
        )
        .await
    }

    async fn failed(&self, guid: &str, error: &str) -> Result<()> {
        self.send_update(
            guid,
            UpdatePayload {
                state: ResourceState::Failed,
                checksums: None,
                error: Some(error),
            },
        )
        .await
    }
}

/// Updater that accepts every update and reports nothing.
///
/// Used when controller updates are not configured.
#[derive(Debug, Default)]
pub struct NullUpdater;

#[async_trait]
impl StateUpdater for NullUpdater {
    async fn processing_upload(&self, _guid: &str) -> Result<()> {
        Ok(())
    }

    async fn ready(&self, _guid: &str, _checksums: &[Checksum]) -> Result<()> {
        Ok(())
    }

    async fn failed(&self, _guid: &str, _error: &str) -> Result<()> {
        Ok(())
    }
}

/// Build the updater for the given configuration.
///
/// Without a controller section, updates go to a null updater and are
/// silently accepted.
pub fn create_updater(config: Option<&ControllerConfig>) -> Result<Arc<dyn StateUpdater>> {
    match config {
        Some(config) => Ok(Arc::new(HttpUpdater::new(config)?)),
        None => Ok(Arc::new(NullUpdater)),
    }
}
