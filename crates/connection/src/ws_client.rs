//! WebSocket implementation of [`Connection`].
//!
//! One socket per client session. Three tasks run per socket: a read pump
//! routing incoming messages through the [`Dispatcher`], a write pump
//! draining the outbound queue, and a ping pump for keepalive.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ferry_protocol::ClientMessage;
use ferry_protocol::constants::SEND_BUFFER_SIZE;

use crate::{
    Connection, ConnectionConfig, ConnectionError, DisconnectReason, Dispatcher, SendFuture,
};

/// A persistent WebSocket connection to an upload server.
///
/// The connection never reconnects. Once it drops, sends fail with
/// [`ConnectionError::Closed`] and new transfers are refused.
pub struct WsConnection {
    dispatcher: Arc<Dispatcher>,
    /// `None` when the socket never opened.
    write_tx: Option<mpsc::Sender<tungstenite::Message>>,
    tasks: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl WsConnection {
    /// Opens the socket and spawns its pumps.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self, ConnectionError> {
        let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(config.max_message_size);
        ws_config.max_frame_size = Some(config.max_message_size);
        let (ws_stream, _) =
            tokio_tungstenite::connect_async_with_config(config.url.as_str(), Some(ws_config), false)
                .await?;
        let (write, read) = ws_stream.split();

        let dispatcher = Arc::new(Dispatcher::new());
        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(SEND_BUFFER_SIZE);
        let cancel = CancellationToken::new();

        let write_handle = tokio::spawn(crate::pumps::write::write_pump(
            write,
            write_rx,
            dispatcher.clone(),
            cancel.clone(),
        ));

        let read_handle = tokio::spawn(crate::pumps::read::read_pump(
            read,
            dispatcher.clone(),
            write_tx.clone(),
            config.pong_wait(),
            cancel.clone(),
        ));

        let ping_handle = tokio::spawn(crate::pumps::ping::ping_pump(
            write_tx.clone(),
            config.ping_period(),
            cancel.clone(),
        ));

        info!(url = %config.url, "connected");

        Ok(Self {
            dispatcher,
            write_tx: Some(write_tx),
            tasks: vec![read_handle, write_handle, ping_handle],
            cancel,
        })
    }

    /// Like [`connect`](Self::connect), but a failed open yields an
    /// unavailable connection instead of an error.
    ///
    /// Callers can then hold a connection unconditionally and have every
    /// transfer start fail with `ConnectionUnavailable`.
    pub async fn open(config: &ConnectionConfig) -> Self {
        match Self::connect(config).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(url = %config.url, "connection failed: {e}");
                Self::unavailable(e.to_string())
            }
        }
    }

    /// A connection that never came up.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            dispatcher: Arc::new(Dispatcher::unavailable(reason)),
            write_tx: None,
            tasks: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Closes the socket. Every listener sees [`DisconnectReason::ClientClosed`].
    pub async fn close(&self) {
        self.dispatcher.disconnect(DisconnectReason::ClientClosed);
        self.cancel.cancel();
    }
}

impl Connection for WsConnection {
    fn send(&self, message: ClientMessage) -> SendFuture<'_> {
        Box::pin(async move {
            let Some(write_tx) = &self.write_tx else {
                let reason = self.dispatcher.down_reason().unwrap_or_default();
                return Err(ConnectionError::Unavailable(reason));
            };
            if !self.dispatcher.is_connected() {
                return Err(ConnectionError::Closed);
            }

            let json = serde_json::to_string(&message.to_message()?)?;
            write_tx
                .send(tungstenite::Message::Text(json.into()))
                .await
                .map_err(|_| ConnectionError::Closed)
        })
    }

    fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
        for task in &self.tasks {
            task.abort();
        }
    }
}
