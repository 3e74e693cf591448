//! Blobstore configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use blobshed_common::{Error, Result};

use crate::wrapper::SizeLimits;

/// Options for the WebDAV backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebdavOptions {
    /// Base URL of the WebDAV server, e.g. "https://blobstore.internal:4443".
    pub endpoint: String,
    /// Basic-auth username.
    pub username: String,
    /// Basic-auth password.
    pub password: String,
    /// PEM file with the private CA that signed the server certificate.
    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,
    /// PEM file with the client certificate for mutual TLS.
    #[serde(default)]
    pub client_cert_path: Option<PathBuf>,
    /// PEM file with the client key for mutual TLS.
    #[serde(default)]
    pub client_key_path: Option<PathBuf>,
}

/// Options for the S3-compatible backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Options {
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Custom endpoint for S3-compatible servers (MinIO and friends).
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Use path-style addressing instead of virtual-hosted buckets.
    #[serde(default)]
    pub path_style: bool,
}

/// Options for the local filesystem backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalOptions {
    /// Directory all blobstores share; each store lives under its
    /// directory key inside it.
    pub root: PathBuf,
}

/// Backend selection plus backend-specific options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum BackendOptions {
    Webdav(WebdavOptions),
    S3(S3Options),
    Local(LocalOptions),
    Memory,
    Null,
}

impl BackendOptions {
    /// Registry name of the selected backend.
    pub fn name(&self) -> &'static str {
        match self {
            BackendOptions::Webdav(_) => "webdav",
            BackendOptions::S3(_) => "s3",
            BackendOptions::Local(_) => "local",
            BackendOptions::Memory => "memory",
            BackendOptions::Null => "null",
        }
    }
}

/// Configuration for one blobstore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobstoreConfig {
    /// Store name: the S3 bucket, the WebDAV collection, the directory
    /// under the local root.
    pub directory_key: String,
    /// Scoping prefix within the store. Bulk deletes require it.
    #[serde(default)]
    pub root_dir: Option<String>,
    /// Smallest blob accepted for upload, in bytes.
    #[serde(default)]
    pub min_size: Option<u64>,
    /// Largest blob accepted for upload, in bytes.
    #[serde(default)]
    pub max_size: Option<u64>,
    #[serde(flatten)]
    pub backend: BackendOptions,
}

impl BlobstoreConfig {
    /// Validate invariants that serde cannot express.
    ///
    /// # Errors
    /// - Empty directory key
    /// - `min_size` larger than `max_size`
    pub fn validate(&self) -> Result<()> {
        if self.directory_key.trim().is_empty() {
            return Err(Error::Config(
                "Blobstore directory_key cannot be empty".to_string(),
            ));
        }
        if let (Some(min), Some(max)) = (self.min_size, self.max_size) {
            if min > max {
                return Err(Error::Config(format!(
                    "min_size {} exceeds max_size {}",
                    min, max
                )));
            }
        }
        Ok(())
    }

    /// Size limits for the wrapper.
    pub fn limits(&self) -> SizeLimits {
        SizeLimits {
            min_size: self.min_size,
            max_size: self.max_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config() -> BlobstoreConfig {
        BlobstoreConfig {
            directory_key: "packages".to_string(),
            root_dir: Some("cc".to_string()),
            min_size: None,
            max_size: None,
            backend: BackendOptions::Memory,
        }
    }

    #[test]
    fn test_validate_rejects_empty_directory_key() {
        let mut config = memory_config();
        config.directory_key = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_limits() {
        let mut config = memory_config();
        config.min_size = Some(100);
        config.max_size = Some(10);
        assert!(config.validate().is_err());

        config.max_size = Some(100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_webdav_yaml_round_trip() {
        let yaml = r#"
backend: webdav
directory_key: droplets
root_dir: cc
endpoint: https://blobstore.internal:4443
username: blobstore
password: secret
ca_cert_path: /etc/blobshed/ca.pem
"#;
        let config: BlobstoreConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.backend.name(), "webdav");
        assert_eq!(config.directory_key, "droplets");
        match &config.backend {
            BackendOptions::Webdav(options) => {
                assert_eq!(options.username, "blobstore");
                assert_eq!(
                    options.ca_cert_path.as_deref(),
                    Some(std::path::Path::new("/etc/blobshed/ca.pem"))
                );
                assert!(options.client_cert_path.is_none());
            }
            other => panic!("Unexpected backend: {:?}", other),
        }

        let rendered = serde_yaml::to_string(&config).unwrap();
        let restored: BlobstoreConfig = serde_yaml::from_str(&rendered).unwrap();
        assert_eq!(restored.backend.name(), "webdav");
    }

    #[test]
    fn test_s3_yaml_with_limits() {
        let yaml = r#"
backend: s3
directory_key: packages
region: us-east-1
access_key_id: AKIA
secret_access_key: secret
endpoint: http://127.0.0.1:9000
path_style: true
min_size: 1
max_size: 536870912
"#;
        let config: BlobstoreConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.backend.name(), "s3");
        assert_eq!(config.min_size, Some(1));
        assert_eq!(config.max_size, Some(536_870_912));
        match &config.backend {
            BackendOptions::S3(options) => {
                assert!(options.path_style);
                assert_eq!(options.endpoint.as_deref(), Some("http://127.0.0.1:9000"));
            }
            other => panic!("Unexpected backend: {:?}", other),
        }
    }

    #[test]
    fn test_unit_backends_parse() {
        let memory: BlobstoreConfig =
            serde_yaml::from_str("backend: memory\ndirectory_key: stash\n").unwrap();
        assert_eq!(memory.backend.name(), "memory");

        let null: BlobstoreConfig =
            serde_yaml::from_str("backend: \"null\"\ndirectory_key: stash\n").unwrap();
        assert_eq!(null.backend.name(), "null");
    }

    #[test]
    fn test_unknown_backend_fails() {
        let result: std::result::Result<BlobstoreConfig, _> =
            serde_yaml::from_str("backend: gcs\ndirectory_key: stash\n");
        assert!(result.is_err());
    }
}
