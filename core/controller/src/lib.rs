//! External controller integration for Blobshed.
//!
//! The controller owns the resources whose payloads land in the blobstore.
//! After an upload is staged and copied, the controller is told what
//! happened: processing started, the blob is ready (with its checksums), or
//! the upload failed. Updates travel over a mutually-authenticated HTTPS
//! connection.

pub mod mtls;
pub mod retry;
pub mod updater;

pub use mtls::{build_mtls_client, MtlsConfig};
pub use retry::RetryPolicy;
pub use updater::{
    create_updater, ControllerConfig, HttpUpdater, NullUpdater, ResourceState, StateUpdater,
};
