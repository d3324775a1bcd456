//! In-process [`Connection`] for driving uploads without a socket.
//!
//! [`pair`] returns the client half, handed to the upload coordinator, and a
//! [`MemoryPeer`] that plays the server: it observes every client message and
//! injects server messages and disconnects.

use std::sync::Arc;

use tokio::sync::mpsc;

use ferry_protocol::{
    ClientMessage, Complete, Disconnect, Progress, Ready, ServerMessage, TransferFailed,
};

use crate::{Connection, ConnectionError, DisconnectReason, Dispatcher, SendFuture};

/// Client half of an in-memory connection.
pub struct MemoryConnection {
    dispatcher: Arc<Dispatcher>,
    /// `None` when the connection never came up.
    outbound: Option<mpsc::UnboundedSender<ClientMessage>>,
}

/// Server half of an in-memory connection.
pub struct MemoryPeer {
    dispatcher: Arc<Dispatcher>,
    inbound: mpsc::UnboundedReceiver<ClientMessage>,
}

/// Creates a connected client/server pair.
pub fn pair() -> (MemoryConnection, MemoryPeer) {
    let dispatcher = Arc::new(Dispatcher::new());
    let (outbound, inbound) = mpsc::unbounded_channel();
    (
        MemoryConnection {
            dispatcher: dispatcher.clone(),
            outbound: Some(outbound),
        },
        MemoryPeer {
            dispatcher,
            inbound,
        },
    )
}

impl MemoryConnection {
    /// A connection that never came up. It has no peer.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            dispatcher: Arc::new(Dispatcher::unavailable(reason)),
            outbound: None,
        }
    }
}

impl Connection for MemoryConnection {
    /// Fails only once the peer is dropped.
    ///
    /// A disconnect signal alone does not stop delivery, so tests can observe
    /// what the client does after one.
    fn send(&self, message: ClientMessage) -> SendFuture<'_> {
        Box::pin(async move {
            let Some(outbound) = &self.outbound else {
                let reason = self.dispatcher.down_reason().unwrap_or_default();
                return Err(ConnectionError::Unavailable(reason));
            };
            outbound.send(message).map_err(|_| ConnectionError::Closed)
        })
    }

    fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

impl MemoryPeer {
    /// Waits for the next client message. `None` once the client is dropped.
    pub async fn recv(&mut self) -> Option<ClientMessage> {
        self.inbound.recv().await
    }

    /// Returns the next client message if one is queued.
    pub fn try_recv(&mut self) -> Option<ClientMessage> {
        self.inbound.try_recv().ok()
    }

    /// Returns every queued client message.
    pub fn drain(&mut self) -> Vec<ClientMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = self.inbound.try_recv() {
            out.push(msg);
        }
        out
    }

    /// Delivers a server message as if it had arrived on the socket.
    pub fn deliver(&self, message: ServerMessage) {
        self.dispatcher.dispatch(message);
    }

    pub fn ready(&self, transfer_id: &str) {
        self.deliver(ServerMessage::Ready(Ready {
            file_id: transfer_id.into(),
        }));
    }

    pub fn progress(&self, transfer_id: &str, progress: u8) {
        self.deliver(ServerMessage::Progress(Progress {
            file_id: transfer_id.into(),
            progress,
        }));
    }

    pub fn complete(&self, transfer_id: &str) {
        self.deliver(ServerMessage::Complete(Complete {
            file_id: transfer_id.into(),
        }));
    }

    /// Reports a terminal failure. `None` sends an `error` without a message.
    pub fn error(&self, transfer_id: &str, message: Option<&str>) {
        self.deliver(ServerMessage::Error(TransferFailed {
            file_id: transfer_id.into(),
            message: message.map(str::to_string),
        }));
    }

    /// Sends an explicit `disconnect` notice.
    pub fn notify_disconnect(&self, reason: &str) {
        self.deliver(ServerMessage::Disconnect(Disconnect {
            reason: reason.into(),
        }));
    }

    /// Drops the link from the transport side.
    pub fn disconnect(&self, reason: DisconnectReason) {
        self.dispatcher.disconnect(reason);
    }

    /// Number of transfers the client is currently subscribed for.
    pub fn subscriptions(&self) -> usize {
        self.dispatcher.subscriptions()
    }
}
