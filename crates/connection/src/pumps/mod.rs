//! Socket tasks spawned per WebSocket connection.

pub(crate) mod ping;
pub(crate) mod read;
pub(crate) mod write;
