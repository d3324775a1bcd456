//! Serialises outbound frames onto the socket.

use std::sync::Arc;

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::{DisconnectReason, Dispatcher};

/// Writes queued frames until cancelled, the queue closes, or a write fails.
///
/// A failed write takes the whole connection down.
pub(crate) async fn write_pump<S>(
    mut write: S,
    mut write_rx: mpsc::Receiver<tungstenite::Message>,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = write_rx.recv() => {
                let Some(msg) = msg else { break };
                if let Err(e) = write.send(msg).await {
                    error!("WebSocket write error: {e}");
                    dispatcher.disconnect(DisconnectReason::TransportError(e.to_string()));
                    cancel.cancel();
                    return;
                }
            }
        }
    }

    let _ = write.send(tungstenite::Message::Close(None)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::sink;

    #[tokio::test]
    async fn sends_close_on_cancel() {
        let (sink_tx, mut sink_rx) = mpsc::channel::<tungstenite::Message>(16);
        let sink = Box::pin(sink::unfold(sink_tx, |tx, msg: tungstenite::Message| async move {
            let _ = tx.send(msg).await;
            Ok::<_, tungstenite::Error>(tx)
        }));

        let (write_tx, write_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let dispatcher = Arc::new(Dispatcher::new());
        let handle = tokio::spawn(write_pump(sink, write_rx, dispatcher.clone(), cancel.clone()));

        write_tx
            .send(tungstenite::Message::Text("hello".to_string().into()))
            .await
            .unwrap();
        assert!(matches!(sink_rx.recv().await, Some(tungstenite::Message::Text(_))));

        cancel.cancel();
        handle.await.unwrap();
        assert!(matches!(sink_rx.recv().await, Some(tungstenite::Message::Close(_))));
        assert!(dispatcher.is_connected());
    }

    #[tokio::test]
    async fn write_failure_disconnects() {
        let sink = Box::pin(sink::unfold((), |(), _msg: tungstenite::Message| async move {
            Err::<(), _>(tungstenite::Error::ConnectionClosed)
        }));

        let (write_tx, write_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let dispatcher = Arc::new(Dispatcher::new());
        let mut disconnects = dispatcher.disconnects();
        let handle = tokio::spawn(write_pump(sink, write_rx, dispatcher.clone(), cancel.clone()));

        write_tx
            .send(tungstenite::Message::Text("hello".to_string().into()))
            .await
            .unwrap();
        handle.await.unwrap();

        assert!(matches!(
            disconnects.recv().await.unwrap(),
            DisconnectReason::TransportError(_)
        ));
        assert!(cancel.is_cancelled());
    }
}
