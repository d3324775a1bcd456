use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Fixed chunk size: 256 KiB. The final chunk of a source may be shorter.
pub const CHUNK_SIZE: usize = 256 * 1024;

/// How often to send keepalive pings.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(5);

/// Time to wait for any incoming frame before the connection is considered dead.
///
/// Acts as a read deadline: pongs, progress events and acknowledgements all
/// reset it.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// Maximum message size in bytes (16 MB).
///
/// A 256 KiB chunk encoded as a JSON byte array stays around 1 MB.
pub const WS_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Capacity of the outbound frame queue feeding the write pump.
pub const SEND_BUFFER_SIZE: usize = 256;

/// Message reported when the server sends an `error` without one.
pub const DEFAULT_ERROR_MESSAGE: &str = "Upload failed";

/// Named message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    // Client to server
    #[serde(rename = "startUpload")]
    StartUpload,
    #[serde(rename = "chunk")]
    Chunk,

    // Server to client
    #[serde(rename = "ready")]
    Ready,
    #[serde(rename = "progress")]
    Progress,
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "disconnect")]
    Disconnect,

    /// Forward compatibility: unknown message names deserialize here.
    #[serde(other)]
    Unknown,
}

impl MessageType {
    /// Returns the wire name of this message.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::StartUpload => "startUpload",
            MessageType::Chunk => "chunk",
            MessageType::Ready => "ready",
            MessageType::Progress => "progress",
            MessageType::Complete => "complete",
            MessageType::Error => "error",
            MessageType::Disconnect => "disconnect",
            MessageType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
