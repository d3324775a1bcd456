use std::collections::HashMap;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use ferry_protocol::{
    ChunkData, ClientMessage, Complete, Progress, Ready, ServerMessage, StartUpload,
    TransferFailed,
};

use crate::{ActivePaths, UploadSink};

/// Uploads in progress on one connection.
///
/// Pure request/reply logic: every client message yields the server
/// messages to send back, in order. Dropping the session releases the
/// destination paths of its unfinished uploads.
pub struct UploadSession {
    dest_dir: PathBuf,
    active_paths: ActivePaths,
    uploads: HashMap<String, UploadSink>,
}

impl UploadSession {
    /// A session with its own set of busy paths.
    pub fn new(dest_dir: impl Into<PathBuf>) -> Self {
        Self::with_active_paths(dest_dir, ActivePaths::new())
    }

    /// A session that shares busy paths with other sessions of one server.
    pub fn with_active_paths(dest_dir: impl Into<PathBuf>, active_paths: ActivePaths) -> Self {
        Self {
            dest_dir: dest_dir.into(),
            active_paths,
            uploads: HashMap::new(),
        }
    }

    /// Number of uploads still receiving.
    pub fn active(&self) -> usize {
        self.uploads.len()
    }

    pub async fn handle(&mut self, message: ClientMessage) -> Vec<ServerMessage> {
        match message {
            ClientMessage::StartUpload(start) => self.on_start(start).await,
            ClientMessage::Chunk(chunk) => self.on_chunk(chunk).await,
        }
    }

    async fn on_start(&mut self, start: StartUpload) -> Vec<ServerMessage> {
        let id = start.file_id;
        if self.uploads.contains_key(&id) {
            warn!(transfer = %id, "duplicate startUpload");
            return vec![failed(&id, "transfer already in progress")];
        }

        let sink = match UploadSink::create(
            &self.dest_dir,
            &start.file_name,
            start.file_size,
            &self.active_paths,
        )
        .await
        {
            Ok(sink) => sink,
            Err(e) => {
                warn!(transfer = %id, name = %start.file_name, "cannot accept upload: {e}");
                return vec![failed(&id, e.to_string())];
            }
        };

        info!(transfer = %id, path = %sink.path().display(), size = start.file_size, "receiving");
        let mut replies = vec![ServerMessage::Ready(Ready {
            file_id: id.clone(),
        })];

        if sink.is_complete() {
            info!(transfer = %id, "empty upload complete");
            replies.push(ServerMessage::Complete(Complete { file_id: id }));
        } else {
            self.uploads.insert(id, sink);
        }
        replies
    }

    async fn on_chunk(&mut self, chunk: ChunkData) -> Vec<ServerMessage> {
        let id = chunk.file_id;
        let Some(sink) = self.uploads.get_mut(&id) else {
            debug!(transfer = %id, "chunk for unknown transfer");
            return vec![failed(&id, "unknown transfer")];
        };

        if let Err(e) = sink.write_at(chunk.position, &chunk.chunk).await {
            warn!(transfer = %id, position = chunk.position, "upload failed: {e}");
            self.uploads.remove(&id);
            return vec![failed(&id, e.to_string())];
        }

        debug!(transfer = %id, received = sink.received(), "chunk written");
        let mut replies = vec![ServerMessage::Progress(Progress {
            file_id: id.clone(),
            progress: sink.progress(),
        })];

        if sink.is_complete() {
            info!(transfer = %id, "upload complete");
            self.uploads.remove(&id);
            replies.push(ServerMessage::Complete(Complete { file_id: id }));
        }
        replies
    }
}

fn failed(id: &str, message: impl Into<String>) -> ServerMessage {
    ServerMessage::Error(TransferFailed {
        file_id: id.to_string(),
        message: Some(message.into()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn start(id: &str, name: &str, size: u64) -> ClientMessage {
        ClientMessage::StartUpload(StartUpload {
            file_id: id.into(),
            file_name: name.into(),
            file_size: size,
        })
    }

    fn chunk(id: &str, position: u64, data: &[u8]) -> ClientMessage {
        ClientMessage::Chunk(ChunkData {
            file_id: id.into(),
            chunk: data.to_vec(),
            position,
        })
    }

    fn error_message(replies: &[ServerMessage]) -> Option<&str> {
        match replies {
            [ServerMessage::Error(e)] => e.message.as_deref(),
            _ => None,
        }
    }

    #[tokio::test]
    async fn full_exchange() {
        let tmp = TempDir::new().unwrap();
        let mut session = UploadSession::new(tmp.path());

        let replies = session.handle(start("t1", "a.txt", 6)).await;
        assert_eq!(replies, vec![ServerMessage::Ready(Ready { file_id: "t1".into() })]);

        let replies = session.handle(chunk("t1", 0, b"abc")).await;
        assert_eq!(
            replies,
            vec![ServerMessage::Progress(Progress {
                file_id: "t1".into(),
                progress: 50
            })]
        );

        let replies = session.handle(chunk("t1", 3, b"def")).await;
        assert_eq!(replies.len(), 2);
        assert!(matches!(&replies[0], ServerMessage::Progress(p) if p.progress == 100));
        assert!(matches!(&replies[1], ServerMessage::Complete(c) if c.file_id == "t1"));
        assert_eq!(session.active(), 0);
        assert_eq!(std::fs::read(tmp.path().join("a.txt")).unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn empty_file_completes_after_ready() {
        let tmp = TempDir::new().unwrap();
        let mut session = UploadSession::new(tmp.path());
        let replies = session.handle(start("t1", "empty", 0)).await;
        assert!(matches!(replies.as_slice(), [ServerMessage::Ready(_), ServerMessage::Complete(_)]));
        assert_eq!(session.active(), 0);
        assert!(tmp.path().join("empty").exists());
    }

    #[tokio::test]
    async fn unknown_transfer_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let mut session = UploadSession::new(tmp.path());
        let replies = session.handle(chunk("ghost", 0, b"x")).await;
        assert_eq!(error_message(&replies), Some("unknown transfer"));
    }

    #[tokio::test]
    async fn duplicate_start_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut session = UploadSession::new(tmp.path());
        session.handle(start("t1", "a.txt", 5)).await;
        let replies = session.handle(start("t1", "b.txt", 5)).await;
        assert_eq!(error_message(&replies), Some("transfer already in progress"));
        assert_eq!(session.active(), 1);
    }

    #[tokio::test]
    async fn traversal_name_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut session = UploadSession::new(tmp.path().join("dest"));
        let replies = session.handle(start("t1", "../escape.txt", 5)).await;
        assert!(error_message(&replies).unwrap().contains("invalid file name"));
        assert!(!tmp.path().join("escape.txt").exists());
        assert_eq!(session.active(), 0);
    }

    #[tokio::test]
    async fn out_of_order_chunk_ends_upload() {
        let tmp = TempDir::new().unwrap();
        let mut session = UploadSession::new(tmp.path());
        session.handle(start("t1", "a.txt", 10)).await;
        let replies = session.handle(chunk("t1", 4, b"late")).await;
        assert!(error_message(&replies).is_some());
        assert_eq!(session.active(), 0);

        // Further chunks are for an unknown transfer.
        let replies = session.handle(chunk("t1", 0, b"x")).await;
        assert_eq!(error_message(&replies), Some("unknown transfer"));
    }

    #[tokio::test]
    async fn transfers_are_independent() {
        let tmp = TempDir::new().unwrap();
        let mut session = UploadSession::new(tmp.path());
        session.handle(start("a", "a.txt", 2)).await;
        session.handle(start("b", "b.txt", 2)).await;

        session.handle(chunk("b", 0, b"bb")).await;
        assert_eq!(session.active(), 1);
        let replies = session.handle(chunk("a", 0, b"aa")).await;
        assert!(matches!(replies.last(), Some(ServerMessage::Complete(_))));
        assert_eq!(std::fs::read(tmp.path().join("b.txt")).unwrap(), b"bb");
    }

    #[tokio::test]
    async fn same_name_is_refused_while_receiving() {
        let tmp = TempDir::new().unwrap();
        let mut session = UploadSession::new(tmp.path());
        session.handle(start("a", "x.txt", 4)).await;
        session.handle(chunk("a", 0, b"ab")).await;

        let replies = session.handle(start("b", "x.txt", 4)).await;
        assert!(error_message(&replies).unwrap().contains("already being received"));

        let replies = session.handle(chunk("a", 2, b"cd")).await;
        assert!(matches!(replies.last(), Some(ServerMessage::Complete(c)) if c.file_id == "a"));
        assert_eq!(std::fs::read(tmp.path().join("x.txt")).unwrap(), b"abcd");

        // Free again once the first upload finished.
        let replies = session.handle(start("c", "x.txt", 1)).await;
        assert!(matches!(replies.as_slice(), [ServerMessage::Ready(_)]));
    }

    #[tokio::test]
    async fn busy_paths_are_shared_between_sessions() {
        let tmp = TempDir::new().unwrap();
        let active = ActivePaths::new();
        let mut first = UploadSession::with_active_paths(tmp.path(), active.clone());
        let mut second = UploadSession::with_active_paths(tmp.path(), active.clone());

        first.handle(start("a", "x.txt", 4)).await;
        first.handle(chunk("a", 0, b"ab")).await;
        let replies = second.handle(start("b", "x.txt", 4)).await;
        assert!(error_message(&replies).is_some());
        assert_eq!(std::fs::read(tmp.path().join("x.txt")).unwrap(), b"ab");

        // A dropped connection gives its paths back.
        drop(first);
        assert!(active.is_empty());
        let replies = second.handle(start("b", "x.txt", 4)).await;
        assert!(matches!(replies.as_slice(), [ServerMessage::Ready(_)]));
    }
}
