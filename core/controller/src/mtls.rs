//! Mutual-TLS HTTP client construction.

use reqwest::{Certificate, Client, Identity};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use blobshed_common::{Error, Result};

/// Client identity and trust anchors for mutual TLS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MtlsConfig {
    /// PEM file with the client certificate.
    pub cert_path: PathBuf,
    /// PEM file with the client private key.
    pub key_path: PathBuf,
    /// PEM file with the private CA that signed the server certificate.
    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,
}

/// Build an HTTP client that presents the configured identity.
///
/// # Errors
/// - PEM material cannot be read or parsed
pub fn build_mtls_client(config: &MtlsConfig) -> Result<Client> {
    let mut pem = read_pem(&config.cert_path)?;
    pem.extend(read_pem(&config.key_path)?);
    let identity = Identity::from_pem(&pem)
        .map_err(|e| Error::Config(format!("Invalid client identity: {}", e)))?;

    let mut builder = Client::builder()
        .user_agent("Blobshed/0.1")
        .identity(identity);

    if let Some(path) = &config.ca_cert_path {
        let ca = Certificate::from_pem(&read_pem(path)?)
            .map_err(|e| Error::Config(format!("Invalid CA certificate: {}", e)))?;
        builder = builder.add_root_certificate(ca);
    }

    builder
        .build()
        .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))
}

fn read_pem(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_cert_file_is_config_error() {
        let config = MtlsConfig {
            cert_path: PathBuf::from("/nonexistent/client.pem"),
            key_path: PathBuf::from("/nonexistent/client.key"),
            ca_cert_path: None,
        };

        assert!(matches!(build_mtls_client(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_garbage_pem_rejected() {
        let temp = TempDir::new().unwrap();
        let cert = temp.path().join("client.pem");
        let key = temp.path().join("client.key");
        std::fs::write(&cert, "not a certificate").unwrap();
        std::fs::write(&key, "not a key").unwrap();

        let config = MtlsConfig {
            cert_path: cert,
            key_path: key,
            ca_cert_path: None,
        };

        assert!(matches!(build_mtls_client(&config), Err(Error::Config(_))));
    }
}
