//! Upload error types.

/// Errors produced while starting or waiting on an upload.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("connection unavailable: {0}")]
    ConnectionUnavailable(String),

    #[error("connection error: {0}")]
    Connection(#[from] ferry_connection::ConnectionError),

    #[error("transfer error: {0}")]
    Transfer(#[from] ferry_transfer::TransferError),

    #[error("{0}")]
    ServerReported(String),

    #[error("source read failed: {0}")]
    ReadFailed(String),

    #[error("upload abandoned")]
    Abandoned,

    #[error("upload ended without an outcome")]
    Detached,
}
