//! Reads frames off the socket and routes them.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use ferry_protocol::{Message, ServerMessage};

use crate::{DisconnectReason, Dispatcher};

/// Reads frames until the connection ends, then reports why.
///
/// Any incoming frame resets the `pong_wait` deadline; silence past it is
/// treated as a dead peer. Cancellation is a local close and reports
/// nothing.
pub(crate) async fn read_pump<S>(
    mut read: S,
    dispatcher: Arc<Dispatcher>,
    write_tx: mpsc::Sender<tungstenite::Message>,
    pong_wait: Duration,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let deadline = tokio::time::sleep(pong_wait);
    tokio::pin!(deadline);

    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => return,

            () = &mut deadline => {
                warn!("no frame within {}s, closing", pong_wait.as_secs());
                break DisconnectReason::PingTimeout;
            }

            frame = read.next() => {
                let frame = match frame {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        break DisconnectReason::TransportError(e.to_string());
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break DisconnectReason::TransportClosed;
                    }
                };

                deadline.as_mut().reset(tokio::time::Instant::now() + pong_wait);

                match frame {
                    tungstenite::Message::Text(text) => handle_text(&text, &dispatcher),
                    tungstenite::Message::Ping(data) => {
                        trace!("received ping");
                        let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                    }
                    tungstenite::Message::Pong(_) => trace!("received pong"),
                    tungstenite::Message::Close(_) => {
                        debug!("received close frame");
                        break DisconnectReason::ServerClosed;
                    }
                    _ => trace!("ignoring non-text frame"),
                }
            }
        }
    };

    dispatcher.disconnect(reason);
    cancel.cancel();
}

/// Decodes one text frame and hands it to the dispatcher.
fn handle_text(text: &str, dispatcher: &Dispatcher) {
    let envelope: Message = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("failed to parse message: {e}");
            return;
        }
    };

    match ServerMessage::from_message(&envelope) {
        Ok(msg) => {
            trace!(msg_type = %msg.msg_type(), transfer = ?msg.transfer_id(), "received");
            dispatcher.dispatch(msg);
        }
        Err(e) => debug!(msg_type = %envelope.msg_type, "ignoring message: {e}"),
    }
}
