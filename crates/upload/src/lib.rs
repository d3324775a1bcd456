//! Chunked uploads over a shared Ferry connection.
//!
//! [`UploadCoordinator::start`] registers a transfer, announces it and hands
//! back an [`UploadHandle`] with its feeds. A state machine task per transfer
//! then waits for `ready`, streams the source one chunk at a time and waits
//! for the server's verdict.
//!
//! A dropped connection never fails a transfer. It stays registered until the
//! server answers or the consumer calls [`UploadCoordinator::abandon`].

pub mod coordinator;
pub mod error;
pub mod handle;
mod machine;

pub use coordinator::UploadCoordinator;
pub use error::UploadError;
pub use handle::{TransferFailure, UploadHandle};
