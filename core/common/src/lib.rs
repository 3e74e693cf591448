//! Common utilities and types shared across Blobshed modules.
//!
//! This module provides foundational types that are used throughout the codebase,
//! ensuring consistency and type safety.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{partition_prefix, BlobKey, ByteStream, Checksum};
