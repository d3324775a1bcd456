use serde::{Deserialize, Deserializer, Serialize};

use crate::ProtocolError;
use crate::constants::MessageType;
use crate::envelope::Message;

// ---------------------------------------------------------------------------
// Client to server payloads
// ---------------------------------------------------------------------------

/// Announces a new transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartUpload {
    pub file_id: String,
    pub file_name: String,
    pub file_size: u64,
}

/// One chunk of file data at a byte offset.
///
/// `chunk` travels as a JSON array of byte values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkData {
    pub file_id: String,
    pub chunk: Vec<u8>,
    pub position: u64,
}

// ---------------------------------------------------------------------------
// Server to client payloads
// ---------------------------------------------------------------------------

/// Server accepted the announcement; the client may begin sending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ready {
    pub file_id: String,
}

/// Informational progress percentage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub file_id: String,
    #[serde(deserialize_with = "percent")]
    pub progress: u8,
}

/// Transfer fully accepted by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Complete {
    pub file_id: String,
}

/// Terminal failure reported by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferFailed {
    #[serde(default)]
    pub file_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Connection-level disconnect notice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Disconnect {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

/// Accepts any JSON number and clamps it into `0..=100`.
fn percent<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    let value = f64::deserialize(deserializer)?;
    Ok(value.clamp(0.0, 100.0) as u8)
}

// ---------------------------------------------------------------------------
// Typed frames
// ---------------------------------------------------------------------------

/// A message the client sends.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    StartUpload(StartUpload),
    Chunk(ChunkData),
}

impl ClientMessage {
    /// Returns the transfer this message belongs to.
    pub fn transfer_id(&self) -> &str {
        match self {
            ClientMessage::StartUpload(m) => &m.file_id,
            ClientMessage::Chunk(m) => &m.file_id,
        }
    }

    /// Returns the wire name of this message.
    pub fn msg_type(&self) -> MessageType {
        match self {
            ClientMessage::StartUpload(_) => MessageType::StartUpload,
            ClientMessage::Chunk(_) => MessageType::Chunk,
        }
    }

    /// Wraps this message in an envelope.
    pub fn to_message(&self) -> Result<Message, ProtocolError> {
        let msg = match self {
            ClientMessage::StartUpload(m) => Message::new(MessageType::StartUpload, Some(m))?,
            ClientMessage::Chunk(m) => Message::new(MessageType::Chunk, Some(m))?,
        };
        Ok(msg)
    }

    /// Decodes an envelope received from a client.
    pub fn from_message(msg: &Message) -> Result<Self, ProtocolError> {
        match msg.msg_type {
            MessageType::StartUpload => Ok(ClientMessage::StartUpload(required(msg)?)),
            MessageType::Chunk => Ok(ClientMessage::Chunk(required(msg)?)),
            other => Err(ProtocolError::UnexpectedType(other)),
        }
    }
}

/// A message the server sends.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Ready(Ready),
    Progress(Progress),
    Complete(Complete),
    Error(TransferFailed),
    Disconnect(Disconnect),
}

impl ServerMessage {
    /// Returns the transfer this message is addressed to.
    ///
    /// `None` for connection-level messages.
    pub fn transfer_id(&self) -> Option<&str> {
        match self {
            ServerMessage::Ready(m) => Some(&m.file_id),
            ServerMessage::Progress(m) => Some(&m.file_id),
            ServerMessage::Complete(m) => Some(&m.file_id),
            ServerMessage::Error(m) => Some(&m.file_id),
            ServerMessage::Disconnect(_) => None,
        }
    }

    /// Returns the wire name of this message.
    pub fn msg_type(&self) -> MessageType {
        match self {
            ServerMessage::Ready(_) => MessageType::Ready,
            ServerMessage::Progress(_) => MessageType::Progress,
            ServerMessage::Complete(_) => MessageType::Complete,
            ServerMessage::Error(_) => MessageType::Error,
            ServerMessage::Disconnect(_) => MessageType::Disconnect,
        }
    }

    /// Wraps this message in an envelope.
    pub fn to_message(&self) -> Result<Message, ProtocolError> {
        let msg = match self {
            ServerMessage::Ready(m) => Message::new(MessageType::Ready, Some(m))?,
            ServerMessage::Progress(m) => Message::new(MessageType::Progress, Some(m))?,
            ServerMessage::Complete(m) => Message::new(MessageType::Complete, Some(m))?,
            ServerMessage::Error(m) => Message::new(MessageType::Error, Some(m))?,
            ServerMessage::Disconnect(m) => Message::new(MessageType::Disconnect, Some(m))?,
        };
        Ok(msg)
    }

    /// Decodes an envelope received from the server.
    pub fn from_message(msg: &Message) -> Result<Self, ProtocolError> {
        match msg.msg_type {
            MessageType::Ready => Ok(ServerMessage::Ready(required(msg)?)),
            MessageType::Progress => Ok(ServerMessage::Progress(required(msg)?)),
            MessageType::Complete => Ok(ServerMessage::Complete(required(msg)?)),
            MessageType::Error => Ok(ServerMessage::Error(required(msg)?)),
            MessageType::Disconnect => Ok(ServerMessage::Disconnect(
                msg.parse_payload()?.unwrap_or_default(),
            )),
            other => Err(ProtocolError::UnexpectedType(other)),
        }
    }
}

fn required<T: for<'de> Deserialize<'de>>(msg: &Message) -> Result<T, ProtocolError> {
    msg.parse_payload()?
        .ok_or(ProtocolError::MissingPayload(msg.msg_type))
}
