//! Connection adapter for Ferry uploads.
//!
//! Wraps one persistent bidirectional channel shared by every transfer of a
//! client session. Outgoing messages are sent as-is; incoming messages are
//! routed by their embedded transfer id to the single subscriber registered
//! for that id. Connection loss is broadcast to everyone and is final: the
//! adapter never reconnects on its own.

pub mod config;
pub mod dispatch;
pub mod memory;
mod pumps;
pub mod ws_client;

use std::future::Future;
use std::pin::Pin;

use tokio::sync::{broadcast, mpsc};

use ferry_protocol::{ClientMessage, ServerMessage};

pub use config::ConnectionConfig;
pub use dispatch::{DisconnectReason, Dispatcher};
pub use memory::{MemoryConnection, MemoryPeer};
pub use ws_client::WsConnection;

/// A boxed future returned by [`Connection::send`].
pub type SendFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ConnectionError>> + Send + 'a>>;

/// Stream of server messages addressed to one transfer.
pub type TransferEvents = mpsc::UnboundedReceiver<ServerMessage>;

/// Errors from the connection adapter.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("connection unavailable: {0}")]
    Unavailable(String),

    #[error("connection closed")]
    Closed,

    #[error("transfer already subscribed: {0}")]
    AlreadySubscribed(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ferry_protocol::ProtocolError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The persistent channel used by the upload state machines.
///
/// Implementations only provide the transport (`send`) and their
/// [`Dispatcher`]; routing and disconnect fan-out are shared.
pub trait Connection: Send + Sync {
    /// Sends one named message.
    fn send(&self, message: ClientMessage) -> SendFuture<'_>;

    /// Routing table for incoming messages.
    fn dispatcher(&self) -> &Dispatcher;

    /// Registers the sole subscriber for messages addressed to `transfer_id`.
    fn subscribe(&self, transfer_id: &str) -> Result<TransferEvents, ConnectionError> {
        self.dispatcher().subscribe(transfer_id)
    }

    /// Releases the subscription for `transfer_id`. Idempotent.
    fn unsubscribe(&self, transfer_id: &str) {
        self.dispatcher().unsubscribe(transfer_id);
    }

    /// Connection-level disconnect notifications.
    fn disconnects(&self) -> broadcast::Receiver<DisconnectReason> {
        self.dispatcher().disconnects()
    }

    /// `false` once the connection failed to open or has dropped.
    fn is_connected(&self) -> bool {
        self.dispatcher().is_connected()
    }
}
