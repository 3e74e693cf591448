//! Client registry and blobstore provider.
//!
//! Backends register as named factories; `provide` resolves the configured
//! backend and wraps it in the layers every store gets: the safe-delete
//! decorator and the instrumented wrapper.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use blobshed_common::{Error, Result};
use blobshed_metrics::MetricsHandle;

use crate::client::BlobstoreClient;
use crate::config::{BackendOptions, BlobstoreConfig};
use crate::local::LocalClient;
use crate::memory::MemoryClient;
use crate::null::NullClient;
use crate::s3::S3Client;
use crate::safe_delete::SafeDeleteClient;
use crate::webdav::WebdavClient;
use crate::wrapper::Blobstore;

/// Factory function type for creating backend clients.
pub type ClientFactory = Box<dyn Fn(Value) -> Result<Arc<dyn BlobstoreClient>> + Send + Sync>;

/// Registry for blobstore backend factories.
///
/// Allows dynamic registration and resolution of backends by name and
/// configuration.
pub struct ClientRegistry {
    factories: HashMap<String, ClientFactory>,
}

impl ClientRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a backend factory.
    ///
    /// # Errors
    /// - Returns error if the name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: ClientFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::Config(format!(
                "Backend '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Resolve a backend by name and configuration.
    ///
    /// # Errors
    /// - Backend not registered
    /// - Configuration invalid for the backend
    pub fn resolve(&self, name: &str, config: Value) -> Result<Arc<dyn BlobstoreClient>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::Config(format!("Backend '{}' is not registered", name)))?;
        factory(config)
    }

    /// Get the list of registered backend names.
    pub fn backends(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a backend is registered.
    pub fn has_backend(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_config(value: Value) -> Result<BlobstoreConfig> {
    let config: BlobstoreConfig = serde_json::from_value(value)
        .map_err(|e| Error::Config(format!("Invalid blobstore configuration: {}", e)))?;
    config.validate()?;
    Ok(config)
}

/// Create a registry with all built-in backends.
pub fn default_registry() -> ClientRegistry {
    let mut registry = ClientRegistry::new();

    registry
        .register("memory", Box::new(|value| {
            let config = parse_config(value)?;
            Ok(Arc::new(MemoryClient::new(config.root_dir)))
        }))
        .expect("Failed to register memory backend");

    registry
        .register("null", Box::new(|value| {
            parse_config(value)?;
            Ok(Arc::new(NullClient::new()))
        }))
        .expect("Failed to register null backend");

    registry
        .register("local", Box::new(|value| {
            let config = parse_config(value)?;
            let BackendOptions::Local(options) = &config.backend else {
                return Err(Error::Config(
                    "local backend requires local options".to_string(),
                ));
            };
            let base = options.root.join(&config.directory_key);
            Ok(Arc::new(LocalClient::new(base, config.root_dir)?))
        }))
        .expect("Failed to register local backend");

    registry
        .register("webdav", Box::new(|value| {
            let config = parse_config(value)?;
            let BackendOptions::Webdav(options) = &config.backend else {
                return Err(Error::Config(
                    "webdav backend requires webdav options".to_string(),
                ));
            };
            Ok(Arc::new(WebdavClient::new(
                options,
                &config.directory_key,
                config.root_dir.clone(),
            )?))
        }))
        .expect("Failed to register webdav backend");

    registry
        .register("s3", Box::new(|value| {
            let config = parse_config(value)?;
            let BackendOptions::S3(options) = &config.backend else {
                return Err(Error::Config(
                    "s3 backend requires s3 options".to_string(),
                ));
            };
            Ok(Arc::new(S3Client::new(
                options,
                &config.directory_key,
                config.root_dir.clone(),
            )))
        }))
        .expect("Failed to register s3 backend");

    registry
}

/// Build a ready-to-use blobstore from configuration.
///
/// The resolved backend is always wrapped `backend -> safe delete ->
/// instrumented handle`, so every store gets bulk-delete protection and
/// metrics regardless of backend.
pub fn provide(config: &BlobstoreConfig, metrics: MetricsHandle) -> Result<Blobstore> {
    provide_with(&default_registry(), config, metrics)
}

/// Like [`provide`], but resolving through a caller-supplied registry.
pub fn provide_with(
    registry: &ClientRegistry,
    config: &BlobstoreConfig,
    metrics: MetricsHandle,
) -> Result<Blobstore> {
    config.validate()?;
    let value = serde_json::to_value(config)
        .map_err(|e| Error::Serialization(format!("Failed to encode configuration: {}", e)))?;
    let client = registry.resolve(config.backend.name(), value)?;
    let safe = Arc::new(SafeDeleteClient::new(client));
    Ok(Blobstore::new(safe, metrics, config.limits()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use blobshed_common::BlobKey;
    use blobshed_metrics::null_handle;

    fn memory_config(root_dir: Option<&str>) -> BlobstoreConfig {
        BlobstoreConfig {
            directory_key: "packages".to_string(),
            root_dir: root_dir.map(String::from),
            min_size: None,
            max_size: None,
            backend: BackendOptions::Memory,
        }
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = ClientRegistry::new();

        registry
            .register("test", Box::new(|_| Ok(Arc::new(MemoryClient::new(None)))))
            .unwrap();

        let client = registry.resolve("test", Value::Null).unwrap();
        assert_eq!(client.backend(), "memory");
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = ClientRegistry::new();

        registry
            .register("test", Box::new(|_| Ok(Arc::new(MemoryClient::new(None)))))
            .unwrap();

        let result =
            registry.register("test", Box::new(|_| Ok(Arc::new(MemoryClient::new(None)))));
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_unknown_fails() {
        let registry = ClientRegistry::new();
        assert!(registry.resolve("unknown", Value::Null).is_err());
    }

    #[test]
    fn test_default_registry_backends() {
        let registry = default_registry();
        for backend in ["webdav", "s3", "local", "memory", "null"] {
            assert!(registry.has_backend(backend), "missing {}", backend);
        }
        assert_eq!(registry.backends().len(), 5);
    }

    #[tokio::test]
    async fn test_provide_builds_working_store() {
        let store = provide(&memory_config(Some("cc")), null_handle()).unwrap();
        let key = BlobKey::parse("abcdef").unwrap();

        store.put(&key, vec![1, 2, 3]).await.unwrap();
        assert_eq!(store.download(&key).await.unwrap(), vec![1, 2, 3]);
        assert_eq!(store.backend(), "memory");
        assert_eq!(store.root_dir(), Some("cc"));
    }

    #[tokio::test]
    async fn test_provide_always_inserts_safe_delete() {
        let store = provide(&memory_config(None), null_handle()).unwrap();

        assert!(matches!(
            store.delete_all().await,
            Err(Error::UnsafeDelete(_))
        ));
    }

    #[test]
    fn test_provide_validates_config() {
        let mut config = memory_config(None);
        config.directory_key = String::new();

        assert!(provide(&config, null_handle()).is_err());
    }

    #[tokio::test]
    async fn test_provide_local_backend() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = BlobstoreConfig {
            directory_key: "packages".to_string(),
            root_dir: Some("cc".to_string()),
            min_size: None,
            max_size: None,
            backend: BackendOptions::Local(crate::config::LocalOptions {
                root: temp.path().to_path_buf(),
            }),
        };

        let store = provide(&config, null_handle()).unwrap();
        let key = BlobKey::parse("abcdef").unwrap();
        store.put(&key, vec![7]).await.unwrap();

        assert!(temp.path().join("packages/cc/ab/cd/abcdef").is_file());
        assert!(store.local());
    }

    #[test]
    fn test_provide_null_backend() {
        let config = BlobstoreConfig {
            directory_key: "stash".to_string(),
            root_dir: None,
            min_size: None,
            max_size: None,
            backend: BackendOptions::Null,
        };

        let store = provide(&config, null_handle()).unwrap();
        assert_eq!(store.backend(), "null");
    }
}
