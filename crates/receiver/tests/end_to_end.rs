//! Uploads over a real WebSocket into the reference receiver.

use std::sync::Arc;
use std::time::Duration;

use ferry_connection::{Connection, ConnectionConfig, WsConnection};
use ferry_receiver::{ReceiverServer, ServerConfig};
use ferry_transfer::{FileSource, MemorySource, SourceHandle, TransferState};
use ferry_upload::{UploadCoordinator, UploadError};

struct Harness {
    server: Arc<ReceiverServer>,
    coordinator: UploadCoordinator,
    dest: tempfile::TempDir,
}

async fn harness() -> Harness {
    let dest = tempfile::tempdir().unwrap();
    let server = ReceiverServer::new(ServerConfig {
        port: 0,
        dest_dir: dest.path().to_path_buf(),
    });
    tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.run().await }
    });

    let mut port = 0;
    for _ in 0..100 {
        port = server.port().await;
        if port > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(port > 0, "receiver did not bind");

    let config = ConnectionConfig::with_url(format!("ws://127.0.0.1:{port}"));
    let connection = WsConnection::connect(&config).await.unwrap();
    Harness {
        server,
        coordinator: UploadCoordinator::new(Arc::new(connection)),
        dest,
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 256) as u8).collect()
}

async fn within<T>(fut: impl std::future::Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(20), fut)
        .await
        .expect("timed out")
}

#[tokio::test]
async fn uploads_memory_source() {
    let h = harness().await;
    let data = pattern(600_000);
    let src: SourceHandle = Arc::new(MemorySource::new("video.bin", data.clone()));

    let handle = h.coordinator.start(src, "video.bin", Some(600_000)).await.unwrap();
    let id = handle.transfer_id.clone();
    let mut progress = handle.progress.resubscribe();

    within(handle.outcome()).await.unwrap();

    assert_eq!(std::fs::read(h.dest.path().join("video.bin")).unwrap(), data);
    assert!(h.coordinator.list_active().is_empty());
    assert_eq!(h.coordinator.status(&id).unwrap().state, TransferState::Completed);

    let mut last = None;
    while let Ok(p) = progress.try_recv() {
        last = Some(p);
    }
    assert_eq!(last, Some(100));
}

#[tokio::test]
async fn uploads_file_and_empty_sources_concurrently() {
    let h = harness().await;
    let input = tempfile::tempdir().unwrap();
    let path = input.path().join("archive.tar");
    let data = pattern(3 * 262_144 + 17);
    std::fs::write(&path, &data).unwrap();

    let file: SourceHandle = Arc::new(FileSource::open(&path).unwrap());
    let empty: SourceHandle = Arc::new(MemorySource::new("empty.txt", Vec::new()));

    let a = h.coordinator.start(file, "archive.tar", None).await.unwrap();
    let b = h.coordinator.start(empty, "empty.txt", None).await.unwrap();

    within(b.outcome()).await.unwrap();
    within(a.outcome()).await.unwrap();

    assert_eq!(std::fs::read(h.dest.path().join("archive.tar")).unwrap(), data);
    assert_eq!(
        std::fs::metadata(h.dest.path().join("empty.txt")).unwrap().len(),
        0
    );
    assert_eq!(h.coordinator.statuses().completed().len(), 2);
}

#[tokio::test]
async fn rejected_name_fails_the_transfer() {
    let h = harness().await;
    let src: SourceHandle = Arc::new(MemorySource::new("../escape.txt", b"nope".to_vec()));
    let handle = h.coordinator.start(src, "escape", None).await.unwrap();

    let err = within(handle.outcome()).await.unwrap_err();
    assert!(matches!(err, UploadError::ServerReported(ref m) if m.contains("invalid file name")));
    assert!(h.coordinator.list_active().is_empty());
    assert_eq!(h.coordinator.statuses().failed().len(), 1);
}

#[tokio::test]
async fn server_shutdown_closes_the_connection() {
    let h = harness().await;
    let src: SourceHandle = Arc::new(MemorySource::new("first.bin", pattern(10)));
    let handle = h.coordinator.start(src, "first.bin", None).await.unwrap();
    let id = handle.transfer_id.clone();
    within(handle.outcome()).await.unwrap();

    h.server.shutdown();
    within(async {
        while h.coordinator.is_connected() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    // Finished transfers keep their verdict.
    assert_eq!(h.coordinator.status(&id).unwrap().state, TransferState::Completed);

    let src: SourceHandle = Arc::new(MemorySource::new("late.bin", vec![1]));
    let start = h.coordinator.start(src, "late.bin", None).await;
    assert!(matches!(start, Err(UploadError::ConnectionUnavailable(_))));
}

#[tokio::test]
async fn unavailable_server_refuses_starts() {
    let connection = WsConnection::open(&ConnectionConfig::with_url("ws://127.0.0.1:1")).await;
    assert!(!connection.is_connected());
    let coordinator = UploadCoordinator::new(Arc::new(connection));
    let err = coordinator
        .start(Arc::new(MemorySource::new("a", vec![1])), "a", None)
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::ConnectionUnavailable(_)));
}
