//! Client-side transfer bookkeeping: chunk sources, the in-flight registry,
//! and the status projection shown to consumers.

mod chunked;
mod id;
mod registry;
mod status;

pub use chunked::{Chunk, ChunkSource, FileSource, MemorySource, ReadFuture, SourceHandle, read_chunk};
pub use id::new_transfer_id;
pub use registry::TransferRegistry;
pub use status::{StatusBoard, StatusSlot, TransferState, TransferStatus};

pub use ferry_protocol::{CHUNK_SIZE, TransferId};

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transfer already registered: {0}")]
    DuplicateTransfer(TransferId),

    #[error("unknown transfer: {0}")]
    UnknownTransfer(TransferId),

    #[error("offset {offset} out of range for transfer {id} (current {current}, size {size})")]
    OffsetOutOfRange {
        id: TransferId,
        offset: u64,
        current: u64,
        size: u64,
    },
}
