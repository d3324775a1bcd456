use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, SeekFrom};

use crate::ReceiverError;

/// Checks that `name` is a single plain file name.
///
/// Rejects empty names, separators, `.`/`..` and anything absolute, so the
/// joined path always stays directly inside the destination directory.
pub fn validate_file_name(name: &str) -> Result<(), ReceiverError> {
    if name.is_empty() {
        return Err(ReceiverError::InvalidPath("empty name".into()));
    }
    if name.contains(['/', '\\']) {
        return Err(ReceiverError::InvalidPath(format!(
            "separators not allowed: {name}"
        )));
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(ReceiverError::InvalidPath(format!("not a plain file name: {name}"))),
    }
}

/// Destination paths currently being written, shared by every connection
/// of a server.
#[derive(Debug, Clone, Default)]
pub struct ActivePaths(Arc<Mutex<HashSet<PathBuf>>>);

impl ActivePaths {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of paths held by running uploads.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.lock().contains(path)
    }

    /// Reserves `path` until the returned claim drops. `None` if it is taken.
    fn claim(&self, path: &Path) -> Option<PathClaim> {
        if !self.lock().insert(path.to_path_buf()) {
            return None;
        }
        Some(PathClaim {
            paths: self.clone(),
            path: path.to_path_buf(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive hold on one destination path.
#[derive(Debug)]
struct PathClaim {
    paths: ActivePaths,
    path: PathBuf,
}

impl Drop for PathClaim {
    fn drop(&mut self) {
        self.paths.lock().remove(&self.path);
    }
}

/// Destination file of one incoming upload.
///
/// Chunks must arrive in order: each write has to start exactly where the
/// previous one ended and may not run past the announced size. The sink
/// holds its path in [`ActivePaths`] for as long as it lives.
pub struct UploadSink {
    path: PathBuf,
    file: File,
    size: u64,
    received: u64,
    // Dropped last, after the file handle closes.
    _claim: PathClaim,
}

impl UploadSink {
    /// Creates (or truncates) `<dest>/<name>`.
    ///
    /// Fails without touching the file when another upload is still writing
    /// the same path.
    pub async fn create(
        dest: &Path,
        name: &str,
        size: u64,
        active: &ActivePaths,
    ) -> Result<Self, ReceiverError> {
        validate_file_name(name)?;
        let path = dest.join(name);
        let claim = active
            .claim(&path)
            .ok_or_else(|| ReceiverError::InUse(name.to_string()))?;

        tokio::fs::create_dir_all(dest).await?;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            _claim: claim,
            file,
            size,
            received: 0,
        })
    }

    /// Writes `data` at `position` and returns the bytes received so far.
    pub async fn write_at(&mut self, position: u64, data: &[u8]) -> Result<u64, ReceiverError> {
        if position != self.received {
            return Err(ReceiverError::OutOfOrder {
                position,
                received: self.received,
            });
        }
        let end = position + data.len() as u64;
        if end > self.size {
            return Err(ReceiverError::Overrun {
                end,
                size: self.size,
            });
        }

        self.file.seek(SeekFrom::Start(position)).await?;
        self.file.write_all(data).await?;
        self.received = end;

        if self.is_complete() {
            self.file.flush().await?;
            self.file.sync_all().await?;
        }
        Ok(end)
    }

    /// Whole-number percentage received. An empty upload is at 100.
    pub fn progress(&self) -> u8 {
        if self.size == 0 {
            return 100;
        }
        (self.received.saturating_mul(100) / self.size).min(100) as u8
    }

    pub fn is_complete(&self) -> bool {
        self.received == self.size
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn accepts_plain_names() {
        assert!(validate_file_name("movie.mkv").is_ok());
        assert!(validate_file_name("no extension").is_ok());
        assert!(validate_file_name(".hidden").is_ok());
    }

    #[test]
    fn rejects_paths() {
        for name in ["", ".", "..", "../etc/passwd", "a/b.txt", "/abs", "dir\\file", "C:\\x"] {
            assert!(validate_file_name(name).is_err(), "{name:?} should be rejected");
        }
    }

    #[tokio::test]
    async fn writes_sequential_chunks() {
        let tmp = TempDir::new().unwrap();
        let mut sink = UploadSink::create(tmp.path(), "out.bin", 10, &ActivePaths::new()).await.unwrap();

        assert_eq!(sink.write_at(0, b"hello").await.unwrap(), 5);
        assert_eq!(sink.progress(), 50);
        assert!(!sink.is_complete());
        assert_eq!(sink.write_at(5, b"world").await.unwrap(), 10);
        assert!(sink.is_complete());

        let data = std::fs::read(tmp.path().join("out.bin")).unwrap();
        assert_eq!(data, b"helloworld");
    }

    #[tokio::test]
    async fn rejects_gap_and_replay() {
        let tmp = TempDir::new().unwrap();
        let mut sink = UploadSink::create(tmp.path(), "out.bin", 10, &ActivePaths::new()).await.unwrap();
        sink.write_at(0, b"abc").await.unwrap();

        assert!(matches!(
            sink.write_at(5, b"x").await,
            Err(ReceiverError::OutOfOrder { position: 5, received: 3 })
        ));
        assert!(matches!(
            sink.write_at(0, b"abc").await,
            Err(ReceiverError::OutOfOrder { .. })
        ));
        assert_eq!(sink.received(), 3);
    }

    #[tokio::test]
    async fn rejects_overrun() {
        let tmp = TempDir::new().unwrap();
        let mut sink = UploadSink::create(tmp.path(), "out.bin", 4, &ActivePaths::new()).await.unwrap();
        assert!(matches!(
            sink.write_at(0, b"too long").await,
            Err(ReceiverError::Overrun { end: 8, size: 4 })
        ));
    }

    #[tokio::test]
    async fn empty_upload_is_complete_on_create() {
        let tmp = TempDir::new().unwrap();
        let sink = UploadSink::create(tmp.path(), "empty.txt", 0, &ActivePaths::new()).await.unwrap();
        assert!(sink.is_complete());
        assert_eq!(sink.progress(), 100);
        assert_eq!(std::fs::metadata(sink.path()).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn create_makes_destination_dir() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("nested").join("dest");
        UploadSink::create(&dest, "a.txt", 1, &ActivePaths::new()).await.unwrap();
        assert!(dest.join("a.txt").exists());
    }

    #[tokio::test]
    async fn busy_path_is_left_untouched() {
        let tmp = TempDir::new().unwrap();
        let active = ActivePaths::new();
        let mut first = UploadSink::create(tmp.path(), "x.txt", 4, &active).await.unwrap();
        first.write_at(0, b"ab").await.unwrap();

        let second = UploadSink::create(tmp.path(), "x.txt", 4, &active).await;
        assert!(matches!(second, Err(ReceiverError::InUse(ref n)) if n == "x.txt"));
        assert_eq!(std::fs::read(tmp.path().join("x.txt")).unwrap(), b"ab");

        drop(first);
        assert!(active.is_empty());
        UploadSink::create(tmp.path(), "x.txt", 4, &active).await.unwrap();
        assert_eq!(active.len(), 1);
    }
}
