//! Per-transfer state machine.
//!
//! ```text
//! Idle -> Announcing -> Sending -> AwaitingOutcome -> Completed | Failed
//! ```
//!
//! `Sending` loops one chunk at a time: read at the registry offset, send,
//! advance, yield. Reaching the end of the source only means every byte was
//! handed to the connection; the transfer completes when the server says so.
//! A disconnect is reported on its own feed and changes nothing else.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::mpsc::error::TryRecvError as EventTryRecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use ferry_connection::{ConnectionError, DisconnectReason, TransferEvents};
use ferry_protocol::{
    CHUNK_SIZE, ChunkData, ClientMessage, DEFAULT_ERROR_MESSAGE, ServerMessage, StartUpload,
    TransferId,
};
use ferry_transfer::{SourceHandle, read_chunk};

use crate::coordinator::Session;
use crate::handle::{Feeds, TransferFailure, UploadHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Idle,
    Announcing,
    Sending,
    AwaitingOutcome,
}

/// How the machine stopped.
#[derive(Debug)]
enum Outcome {
    Completed,
    Failed(TransferFailure),
    /// The subscription went away without a terminal message.
    Detached,
}

pub(crate) struct TransferMachine {
    id: TransferId,
    source: SourceHandle,
    session: Arc<Session>,
    events: TransferEvents,
    disconnects: broadcast::Receiver<DisconnectReason>,
    disconnect_seen: bool,
    feeds: Feeds,
    abandon: CancellationToken,
    phase: Phase,
}

impl TransferMachine {
    pub(crate) fn new(
        id: TransferId,
        source: SourceHandle,
        session: Arc<Session>,
        events: TransferEvents,
        disconnects: broadcast::Receiver<DisconnectReason>,
        abandon: CancellationToken,
    ) -> (Self, UploadHandle) {
        let (feeds, handle) = Feeds::new(&id);
        let machine = Self {
            id,
            source,
            session,
            events,
            disconnects,
            disconnect_seen: false,
            feeds,
            abandon,
            phase: Phase::Idle,
        };
        (machine, handle)
    }

    /// Sends `startUpload`. The record must already be registered.
    pub(crate) async fn announce(&mut self) -> Result<(), ConnectionError> {
        debug_assert_eq!(self.phase, Phase::Idle);
        let size = self.source.size();
        self.session
            .connection
            .send(ClientMessage::StartUpload(StartUpload {
                file_id: self.id.clone(),
                file_name: self.source.name().to_string(),
                file_size: size,
            }))
            .await?;
        info!(transfer = %self.id, name = %self.source.name(), size, "announced");
        self.phase = Phase::Announcing;
        Ok(())
    }

    /// Drives the transfer until a terminal outcome.
    pub(crate) async fn run(mut self) {
        let outcome = loop {
            if self.phase == Phase::Sending {
                if let Some(outcome) = self.poll_signals() {
                    break outcome;
                }
                if self.phase == Phase::Sending {
                    if let Some(outcome) = self.send_next_chunk().await {
                        break outcome;
                    }
                    tokio::task::yield_now().await;
                }
                continue;
            }

            tokio::select! {
                biased;

                _ = self.abandon.cancelled() => break Outcome::Failed(TransferFailure::Abandoned),

                event = self.events.recv() => match event {
                    Some(msg) => {
                        if let Some(outcome) = self.on_message(msg) {
                            break outcome;
                        }
                    }
                    None => break self.detached(),
                },

                reason = self.disconnects.recv(), if !self.disconnect_seen => match reason {
                    Ok(reason) => self.on_disconnect(reason),
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => self.disconnect_seen = true,
                },
            }
        };

        self.finish(outcome);
    }

    /// Handles whatever arrived while sending, without waiting.
    fn poll_signals(&mut self) -> Option<Outcome> {
        if self.abandon.is_cancelled() {
            return Some(Outcome::Failed(TransferFailure::Abandoned));
        }

        while !self.disconnect_seen {
            match self.disconnects.try_recv() {
                Ok(reason) => self.on_disconnect(reason),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Closed) => self.disconnect_seen = true,
                Err(TryRecvError::Empty) => break,
            }
        }

        loop {
            match self.events.try_recv() {
                Ok(msg) => {
                    if let Some(outcome) = self.on_message(msg) {
                        return Some(outcome);
                    }
                }
                Err(EventTryRecvError::Empty) => return None,
                Err(EventTryRecvError::Disconnected) => return Some(self.detached()),
            }
        }
    }

    fn on_message(&mut self, msg: ServerMessage) -> Option<Outcome> {
        match msg {
            ServerMessage::Ready(_) if self.phase == Phase::Announcing => {
                info!(transfer = %self.id, "server ready, sending");
                self.phase = Phase::Sending;
                None
            }
            ServerMessage::Ready(_) => {
                trace!(transfer = %self.id, phase = ?self.phase, "ignoring duplicate ready");
                None
            }
            ServerMessage::Progress(p) => {
                trace!(transfer = %self.id, progress = p.progress, "progress");
                self.session.statuses.set_progress(&self.id, p.progress);
                let _ = self.feeds.progress.send(p.progress);
                None
            }
            ServerMessage::Complete(_) => Some(Outcome::Completed),
            ServerMessage::Error(e) => {
                let message = e
                    .message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string());
                Some(Outcome::Failed(TransferFailure::Server(message)))
            }
            ServerMessage::Disconnect(_) => None,
        }
    }

    fn on_disconnect(&mut self, reason: DisconnectReason) {
        self.disconnect_seen = true;
        warn!(transfer = %self.id, %reason, "disconnected, transfer left pending");
        let _ = self.feeds.disconnect.send(reason);
    }

    /// Sends the chunk at the current offset.
    ///
    /// Stops sending (without failing) when the connection rejects the chunk;
    /// the transfer then waits for a terminal message or abandonment.
    async fn send_next_chunk(&mut self) -> Option<Outcome> {
        let Some(offset) = self.session.registry.offset(&self.id) else {
            self.phase = Phase::AwaitingOutcome;
            return None;
        };

        let size = self.source.size();
        if offset >= size {
            info!(transfer = %self.id, size, "all bytes sent, awaiting outcome");
            self.phase = Phase::AwaitingOutcome;
            return None;
        }

        let chunk = match read_chunk(self.source.as_ref(), offset, CHUNK_SIZE).await {
            Ok(chunk) if !chunk.data.is_empty() => chunk,
            Ok(_) => {
                let message = format!("source ended at {offset} of {size} bytes");
                return Some(Outcome::Failed(TransferFailure::Source(message)));
            }
            Err(e) => return Some(Outcome::Failed(TransferFailure::Source(e.to_string()))),
        };
        let end = chunk.end();
        let bytes = chunk.data.len();

        let msg = ClientMessage::Chunk(ChunkData {
            file_id: self.id.clone(),
            chunk: chunk.data,
            position: offset,
        });
        if let Err(e) = self.session.connection.send(msg).await {
            warn!(transfer = %self.id, offset, "chunk send failed, waiting for outcome: {e}");
            self.phase = Phase::AwaitingOutcome;
            return None;
        }

        if let Err(e) = self.session.registry.advance(&self.id, end) {
            debug!(transfer = %self.id, "offset not advanced: {e}");
            self.phase = Phase::AwaitingOutcome;
            return None;
        }
        debug!(transfer = %self.id, offset, bytes, "chunk sent");
        None
    }

    fn detached(&self) -> Outcome {
        if self.abandon.is_cancelled() {
            Outcome::Failed(TransferFailure::Abandoned)
        } else {
            Outcome::Detached
        }
    }

    /// Applies the terminal outcome exactly once, then drops the feeds.
    fn finish(self, outcome: Outcome) {
        let id = &self.id;
        let session = &self.session;

        if let Outcome::Detached = outcome {
            debug!(transfer = %id, "subscription closed, stopping");
            return;
        }

        // Whoever evicts the record owns the terminal transition. If it is
        // already gone the transfer was abandoned under us.
        let outcome = match outcome {
            Outcome::Failed(TransferFailure::Abandoned) => outcome,
            _ if !session.registry.close(id) => Outcome::Failed(TransferFailure::Abandoned),
            _ => outcome,
        };

        match outcome {
            Outcome::Completed => {
                session.statuses.complete(id);
                info!(transfer = %id, "upload complete");
                let _ = self.feeds.completion.send(());
            }
            Outcome::Failed(TransferFailure::Abandoned) => {
                info!(transfer = %id, "upload abandoned");
                let _ = self.feeds.error.send(TransferFailure::Abandoned);
            }
            Outcome::Failed(failure) => {
                session.statuses.fail(id, failure.message());
                warn!(transfer = %id, error = %failure, "upload failed");
                let _ = self.feeds.error.send(failure);
            }
            Outcome::Detached => {}
        }

        session.connection.unsubscribe(id);
        session.forget(id);
    }
}
