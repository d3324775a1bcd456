//! Reference receiver for Ferry uploads.
//!
//! Accepts any number of WebSocket connections. Each connection tracks its
//! own uploads: `startUpload` is answered with `ready`, every `chunk` is
//! written at its position under the destination directory and answered with
//! `progress`, and `complete` follows the last byte.

mod server;
mod session;
mod sink;

pub use server::{ReceiverServer, ServerConfig};
pub use session::UploadSession;
pub use sink::{ActivePaths, UploadSink, validate_file_name};

/// Errors produced by the receiver.
#[derive(Debug, thiserror::Error)]
pub enum ReceiverError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ferry_protocol::ProtocolError),

    #[error("invalid file name: {0}")]
    InvalidPath(String),

    #[error("file already being received: {0}")]
    InUse(String),

    #[error("chunk at {position} does not follow received bytes ({received})")]
    OutOfOrder { position: u64, received: u64 },

    #[error("chunk ending at {end} overruns announced size {size}")]
    Overrun { end: u64, size: u64 },
}
