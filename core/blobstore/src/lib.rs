//! Blobstore client abstraction for Blobshed.
//!
//! This module provides a trait-based interface for blob storage backends
//! (WebDAV, S3-compatible object stores, local filesystem, in-memory, null)
//! plus the layers every backend is served through: a safe-delete decorator
//! guarding bulk deletes, an instrumented wrapper, and a client registry for
//! dynamic backend resolution.
//!
//! # Design Principles
//! - Backend isolation: no backend-specific logic outside its own module
//! - Async operations: all I/O operations are async
//! - Streaming support: large blobs are handled via streams
//! - Unified error semantics: consistent error types across backends

pub mod client;
pub mod config;
pub mod local;
pub mod memory;
pub mod null;
pub mod provider;
pub mod s3;
pub mod safe_delete;
pub mod webdav;
pub mod wrapper;

pub use client::{Blob, BlobstoreClient, ByteStream, SignedMethod};
pub use config::{BackendOptions, BlobstoreConfig, LocalOptions, S3Options, WebdavOptions};
pub use local::LocalClient;
pub use memory::MemoryClient;
pub use null::NullClient;
pub use provider::{default_registry, provide, provide_with, ClientFactory, ClientRegistry};
pub use s3::S3Client;
pub use safe_delete::SafeDeleteClient;
pub use webdav::WebdavClient;
pub use wrapper::{Blobstore, SizeLimits};
