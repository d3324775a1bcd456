//! Receiver WebSocket server.
//!
//! Listens on a TCP port and runs one [`UploadSession`] per accepted
//! connection.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::accept_async_with_config;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ferry_protocol::constants::WS_MAX_MESSAGE_SIZE;
use ferry_protocol::{ClientMessage, Disconnect, Message, ServerMessage};

use crate::{ActivePaths, ReceiverError, UploadSession};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
    /// Directory uploads are written into.
    pub dest_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            dest_dir: PathBuf::from("received"),
        }
    }
}

/// The upload receiver.
pub struct ReceiverServer {
    config: ServerConfig,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
    connections: AtomicUsize,
    active_paths: ActivePaths,
}

impl ReceiverServer {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
            connections: AtomicUsize::new(0),
            active_paths: ActivePaths::new(),
        })
    }

    /// Returns the local address once [`run`](Self::run) has bound.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    /// Number of open client connections.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// Stops accepting and closes every connection with a `disconnect` notice.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the server until [`shutdown`](Self::shutdown).
    pub async fn run(self: &Arc<Self>) -> Result<(), ReceiverError> {
        let addr: SocketAddr = ([0, 0, 0, 0], self.config.port).into();
        let listener = TcpListener::bind(addr).await?;

        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        info!(dest = %self.config.dest_dir.display(), "receiver listening on {local_addr}");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("receiver shutting down");
                    break Ok(());
                }

                result = listener.accept() => match result {
                    Ok((stream, peer_addr)) => {
                        let server = Arc::clone(self);
                        tokio::spawn(async move {
                            server.connections.fetch_add(1, Ordering::Relaxed);
                            if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                warn!(%peer_addr, "connection error: {e}");
                            }
                            server.connections.fetch_sub(1, Ordering::Relaxed);
                        });
                    }
                    Err(e) => error!("accept error: {e}"),
                },
            }
        }
    }

    async fn handle_connection(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), ReceiverError> {
        let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let ws_stream = accept_async_with_config(stream, Some(ws_config)).await?;
        info!(%peer_addr, "client connected");

        let (mut write, mut read) = ws_stream.split();
        let mut session =
            UploadSession::with_active_paths(&self.config.dest_dir, self.active_paths.clone());

        loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => {
                    let notice = ServerMessage::Disconnect(Disconnect {
                        reason: "server shutting down".into(),
                    });
                    let _ = send(&mut write, &notice).await;
                    let _ = write.send(tungstenite::Message::Close(None)).await;
                    break;
                }
                frame = read.next() => frame,
            };

            let text = match frame {
                Some(Ok(tungstenite::Message::Text(text))) => text,
                Some(Ok(tungstenite::Message::Close(_))) | None => break,
                // Pongs for pings are queued by tungstenite itself.
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            };

            let message = match decode(&text) {
                Ok(m) => m,
                Err(e) => {
                    warn!(%peer_addr, "dropping frame: {e}");
                    continue;
                }
            };

            for reply in session.handle(message).await {
                send(&mut write, &reply).await?;
            }
        }

        if session.active() > 0 {
            info!(%peer_addr, unfinished = session.active(), "client disconnected mid-upload");
        } else {
            debug!(%peer_addr, "client disconnected");
        }
        Ok(())
    }
}

fn decode(text: &str) -> Result<ClientMessage, ReceiverError> {
    let envelope: Message = serde_json::from_str(text)?;
    Ok(ClientMessage::from_message(&envelope)?)
}

async fn send<S>(write: &mut S, message: &ServerMessage) -> Result<(), ReceiverError>
where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    let json = serde_json::to_string(&message.to_message()?)?;
    write.send(tungstenite::Message::Text(json.into())).await?;
    Ok(())
}
