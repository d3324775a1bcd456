//! Wire protocol for Ferry chunked uploads.
//!
//! Every named message travels as one WebSocket text frame holding a JSON
//! [`Message`] envelope. Messages are correlated by the `fileId` carried in
//! their payload.

pub mod constants;
pub mod envelope;
pub mod messages;

pub use constants::{CHUNK_SIZE, DEFAULT_ERROR_MESSAGE, MessageType};
pub use envelope::Message;
pub use messages::{
    ChunkData, ClientMessage, Complete, Disconnect, Progress, Ready, ServerMessage, StartUpload,
    TransferFailed,
};

/// Opaque transfer identifier, unique per transfer.
pub type TransferId = String;

/// Errors produced while encoding or decoding messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing payload for {0}")]
    MissingPayload(MessageType),

    #[error("unexpected message type: {0}")]
    UnexpectedType(MessageType),
}
