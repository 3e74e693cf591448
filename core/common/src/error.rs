//! Common error types for Blobshed.

use thiserror::Error;

/// Top-level error type for Blobshed operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Generic blobstore failure that does not fit a more specific variant.
    #[error("Blobstore error: {0}")]
    Blobstore(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network or remote API failure.
    #[error("Network error: {0}")]
    Network(String),

    /// Blob or resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Authentication failed or credentials rejected.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Operation forbidden by the remote end.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Bulk delete refused because it would wipe an unscoped store.
    #[error("Unsafe delete: {0}")]
    UnsafeDelete(String),

    /// Remote state conflict (e.g. an invalid state transition).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Operation not supported by this backend.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
