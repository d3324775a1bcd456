//! Per-transfer event feeds.

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use ferry_connection::DisconnectReason;
use ferry_protocol::TransferId;

use crate::error::UploadError;

const PROGRESS_CAPACITY: usize = 64;

/// Why a transfer failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferFailure {
    /// The server sent `error`.
    Server(String),
    /// The source could not be read.
    Source(String),
    /// The consumer gave up on the transfer.
    Abandoned,
}

impl TransferFailure {
    pub fn message(&self) -> &str {
        match self {
            TransferFailure::Server(m) | TransferFailure::Source(m) => m,
            TransferFailure::Abandoned => "abandoned",
        }
    }
}

impl std::fmt::Display for TransferFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

impl From<TransferFailure> for UploadError {
    fn from(failure: TransferFailure) -> Self {
        match failure {
            TransferFailure::Server(m) => UploadError::ServerReported(m),
            TransferFailure::Source(m) => UploadError::ReadFailed(m),
            TransferFailure::Abandoned => UploadError::Abandoned,
        }
    }
}

/// Sending side of the feeds, owned by the state machine.
///
/// Dropping it closes every feed.
pub(crate) struct Feeds {
    pub(crate) progress: broadcast::Sender<u8>,
    pub(crate) completion: broadcast::Sender<()>,
    pub(crate) error: broadcast::Sender<TransferFailure>,
    pub(crate) disconnect: broadcast::Sender<DisconnectReason>,
}

impl Feeds {
    pub(crate) fn new(transfer_id: &str) -> (Self, UploadHandle) {
        let (progress, progress_rx) = broadcast::channel(PROGRESS_CAPACITY);
        let (completion, completion_rx) = broadcast::channel(1);
        let (error, error_rx) = broadcast::channel(1);
        let (disconnect, disconnect_rx) = broadcast::channel(1);
        let handle = UploadHandle {
            transfer_id: transfer_id.to_string(),
            progress: progress_rx,
            completion: completion_rx,
            error: error_rx,
            disconnect: disconnect_rx,
        };
        (
            Self {
                progress,
                completion,
                error,
                disconnect,
            },
            handle,
        )
    }
}

/// Feeds for one started transfer.
///
/// Every feed is push-based with no replay: a receiver sees only what is
/// sent after it subscribed. `completion` and `error` fire at most once
/// between them, after which all feeds close.
#[derive(Debug)]
pub struct UploadHandle {
    pub transfer_id: TransferId,
    /// Server-reported percentage, 0-100.
    pub progress: broadcast::Receiver<u8>,
    pub completion: broadcast::Receiver<()>,
    pub error: broadcast::Receiver<TransferFailure>,
    /// Fires at most once, when the shared connection drops.
    pub disconnect: broadcast::Receiver<DisconnectReason>,
}

impl UploadHandle {
    /// Another set of receivers on the same feeds.
    pub fn resubscribe(&self) -> Self {
        Self {
            transfer_id: self.transfer_id.clone(),
            progress: self.progress.resubscribe(),
            completion: self.completion.resubscribe(),
            error: self.error.resubscribe(),
            disconnect: self.disconnect.resubscribe(),
        }
    }

    /// Waits for the terminal outcome.
    ///
    /// Disconnects do not end the wait: a disconnected transfer stays
    /// pending until the server answers or it is abandoned.
    pub async fn outcome(mut self) -> Result<(), UploadError> {
        let mut completion_open = true;
        let mut error_open = true;
        while completion_open || error_open {
            tokio::select! {
                r = self.completion.recv(), if completion_open => match r {
                    Ok(()) => return Ok(()),
                    Err(RecvError::Closed) => completion_open = false,
                    Err(RecvError::Lagged(_)) => {}
                },
                r = self.error.recv(), if error_open => match r {
                    Ok(failure) => return Err(failure.into()),
                    Err(RecvError::Closed) => error_open = false,
                    Err(RecvError::Lagged(_)) => {}
                },
            }
        }
        Err(UploadError::Detached)
    }
}
