//! Keepalive pings.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;

/// Queues a ping every `period` until cancelled or the writer is gone.
pub(crate) async fn ping_pump(
    write_tx: mpsc::Sender<tungstenite::Message>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // first tick is immediate

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                if write_tx.send(tungstenite::Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pings_on_every_period() {
        tokio::time::pause();
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(ping_pump(tx, Duration::from_secs(5), cancel.clone()));

        tokio::time::advance(Duration::from_secs(11)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(matches!(rx.try_recv(), Ok(tungstenite::Message::Ping(_))));
        assert!(matches!(rx.try_recv(), Ok(tungstenite::Message::Ping(_))));
        assert!(rx.try_recv().is_err());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn stops_when_writer_gone() {
        tokio::time::pause();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let handle = tokio::spawn(ping_pump(tx, Duration::from_secs(1), CancellationToken::new()));
        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("should stop")
            .expect("no panic");
    }
}
