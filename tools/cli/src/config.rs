//! Service configuration.
//!
//! One YAML file configures everything the tool needs: the named
//! blobstores, optional metrics emission, and the optional controller to
//! report upload outcomes to.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use blobshed_blobstore::BlobstoreConfig;
use blobshed_common::{Error, Result};
use blobshed_controller::ControllerConfig;
use blobshed_metrics::{null_handle, prometheus_handle, MetricsHandle};

/// Metrics emission settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Namespace metric names are prefixed with.
    pub namespace: String,
}

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Named blobstores.
    pub blobstores: HashMap<String, BlobstoreConfig>,
    /// Metrics emission; omitted means metrics are dropped.
    #[serde(default)]
    pub metrics: Option<MetricsConfig>,
    /// Controller to report upload outcomes to; omitted means updates are
    /// silently accepted.
    #[serde(default)]
    pub controller: Option<ControllerConfig>,
}

impl Config {
    /// Parse and validate a YAML configuration.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)
            .map_err(|e| Error::Config(format!("Invalid configuration: {}", e)))?;
        for (name, store) in &config.blobstores {
            store
                .validate()
                .map_err(|e| Error::Config(format!("Blobstore '{}': {}", name, e)))?;
        }
        Ok(config)
    }

    /// Load a configuration file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_yaml(&content)
    }

    /// Look up a blobstore by name.
    pub fn blobstore(&self, name: &str) -> Result<&BlobstoreConfig> {
        self.blobstores
            .get(name)
            .ok_or_else(|| Error::Config(format!("No blobstore named '{}' configured", name)))
    }

    /// The metrics emitter this configuration asks for.
    pub fn metrics_handle(&self) -> MetricsHandle {
        match &self.metrics {
            Some(metrics) => prometheus_handle(metrics.namespace.clone()),
            None => null_handle(),
        }
    }
}
