//! Per-transfer routing of incoming messages.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace, warn};

use ferry_protocol::{ServerMessage, TransferId};

use crate::{ConnectionError, TransferEvents};

/// Why the connection went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The server sent a close frame.
    ServerClosed,
    /// The server sent an explicit `disconnect` message.
    ServerNotice(String),
    /// The stream ended without a close frame.
    TransportClosed,
    /// Reading or writing the socket failed.
    TransportError(String),
    /// Nothing arrived within the keepalive window.
    PingTimeout,
    /// The client closed the connection.
    ClientClosed,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::ServerClosed => f.write_str("server closed the connection"),
            DisconnectReason::ServerNotice(r) if r.is_empty() => f.write_str("server disconnect"),
            DisconnectReason::ServerNotice(r) => write!(f, "server disconnect: {r}"),
            DisconnectReason::TransportClosed => f.write_str("transport closed"),
            DisconnectReason::TransportError(e) => write!(f, "transport error: {e}"),
            DisconnectReason::PingTimeout => f.write_str("ping timeout"),
            DisconnectReason::ClientClosed => f.write_str("client closed the connection"),
        }
    }
}

enum LinkState {
    Connected,
    Down(String),
}

/// Subscription table plus connection-wide disconnect fan-out.
///
/// Each transfer id has at most one subscriber. Messages for ids with no
/// subscriber are stale or foreign and are dropped.
pub struct Dispatcher {
    routes: Mutex<HashMap<TransferId, mpsc::UnboundedSender<ServerMessage>>>,
    link: Mutex<LinkState>,
    disconnect_tx: broadcast::Sender<DisconnectReason>,
}

impl Dispatcher {
    /// Creates a dispatcher for a live connection.
    pub fn new() -> Self {
        let (disconnect_tx, _) = broadcast::channel(16);
        Self {
            routes: Mutex::new(HashMap::new()),
            link: Mutex::new(LinkState::Connected),
            disconnect_tx,
        }
    }

    /// Creates a dispatcher for a connection that never came up.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        let dispatcher = Self::new();
        *dispatcher.link() = LinkState::Down(reason.into());
        dispatcher
    }

    fn routes(&self) -> MutexGuard<'_, HashMap<TransferId, mpsc::UnboundedSender<ServerMessage>>> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn link(&self) -> MutexGuard<'_, LinkState> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers the subscriber for `transfer_id`.
    pub fn subscribe(&self, transfer_id: &str) -> Result<TransferEvents, ConnectionError> {
        let mut routes = self.routes();
        if routes.get(transfer_id).is_some_and(|tx| !tx.is_closed()) {
            return Err(ConnectionError::AlreadySubscribed(transfer_id.to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        routes.insert(transfer_id.to_string(), tx);
        Ok(rx)
    }

    /// Drops the subscriber for `transfer_id`, closing its stream.
    pub fn unsubscribe(&self, transfer_id: &str) {
        self.routes().remove(transfer_id);
    }

    /// Number of live subscriptions.
    pub fn subscriptions(&self) -> usize {
        self.routes().len()
    }

    /// Routes an incoming message to its subscriber.
    pub fn dispatch(&self, message: ServerMessage) {
        if let ServerMessage::Disconnect(notice) = message {
            self.disconnect(DisconnectReason::ServerNotice(notice.reason));
            return;
        }

        let Some(id) = message.transfer_id() else {
            return;
        };

        let mut routes = self.routes();
        match routes.get(id) {
            Some(tx) => {
                if tx.send(message.clone()).is_err() {
                    debug!(transfer = %id, "subscriber gone, removing route");
                    routes.remove(id);
                }
            }
            None => {
                trace!(transfer = %id, msg_type = %message.msg_type(), "no subscriber, dropping message");
            }
        }
    }

    /// Marks the connection as down and notifies every listener.
    ///
    /// Only the first call has an effect. Returns `true` if it was that call.
    pub fn disconnect(&self, reason: DisconnectReason) -> bool {
        {
            let mut link = self.link();
            if let LinkState::Down(_) = *link {
                return false;
            }
            *link = LinkState::Down(reason.to_string());
        }
        warn!(reason = %reason, "connection lost");
        let _ = self.disconnect_tx.send(reason);
        true
    }

    /// Subscribes to connection-level disconnects.
    pub fn disconnects(&self) -> broadcast::Receiver<DisconnectReason> {
        self.disconnect_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        matches!(*self.link(), LinkState::Connected)
    }

    /// Why the connection is down, if it is.
    pub fn down_reason(&self) -> Option<String> {
        match &*self.link() {
            LinkState::Connected => None,
            LinkState::Down(reason) => Some(reason.clone()),
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
