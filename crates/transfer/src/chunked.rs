use std::fs::File;
use std::future::Future;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use crate::TransferError;

/// A boxed future returned by [`ChunkSource::slice`].
pub type ReadFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u8>, TransferError>> + Send + 'a>>;

/// Shared handle to a byte source owned by the registry.
pub type SourceHandle = Arc<dyn ChunkSource>;

/// A file-like byte source that can be read in slices.
///
/// Reads must be deterministic: the same offset always yields the same bytes.
pub trait ChunkSource: Send + Sync {
    /// Display name announced to the server.
    fn name(&self) -> &str;

    /// Total size in bytes.
    fn size(&self) -> u64;

    /// Reads up to `max_len` bytes starting at `offset`.
    ///
    /// Returns fewer bytes only at the end of the source, and an empty
    /// buffer when `offset >= size()`.
    fn slice(&self, offset: u64, max_len: usize) -> ReadFuture<'_>;
}

/// A chunk of source data ready to be sent.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Byte offset within the source.
    pub offset: u64,
    /// Raw chunk data.
    pub data: Vec<u8>,
}

impl Chunk {
    /// Offset immediately after this chunk.
    pub fn end(&self) -> u64 {
        self.offset + self.data.len() as u64
    }
}

/// Reads the chunk starting at `offset`, bounded by `chunk_size`.
pub async fn read_chunk(
    source: &dyn ChunkSource,
    offset: u64,
    chunk_size: usize,
) -> Result<Chunk, TransferError> {
    let data = source.slice(offset, chunk_size).await?;
    Ok(Chunk { offset, data })
}

fn bounded_len(size: u64, offset: u64, max_len: usize) -> usize {
    let remaining = size.saturating_sub(offset);
    std::cmp::min(remaining, max_len as u64) as usize
}

// ---------------------------------------------------------------------------
// FileSource
// ---------------------------------------------------------------------------

/// A file on disk. Reads run on the blocking pool.
pub struct FileSource {
    path: PathBuf,
    name: String,
    size: u64,
    file: Arc<Mutex<File>>,
}

impl FileSource {
    /// Opens `path` and records its current size.
    pub fn open(path: &Path) -> Result<Self, TransferError> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Ok(Self {
            path: path.to_path_buf(),
            name,
            size,
            file: Arc::new(Mutex::new(file)),
        })
    }

    /// Path this source was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ChunkSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn slice(&self, offset: u64, max_len: usize) -> ReadFuture<'_> {
        let len = bounded_len(self.size, offset, max_len);
        let file = Arc::clone(&self.file);
        Box::pin(async move {
            if len == 0 {
                return Ok(Vec::new());
            }
            tokio::task::spawn_blocking(move || read_at(&file, offset, len))
                .await
                .map_err(|e| TransferError::Io(std::io::Error::other(e)))?
        })
    }
}

fn read_at(file: &Mutex<File>, offset: u64, len: usize) -> Result<Vec<u8>, TransferError> {
    let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
    file.seek(SeekFrom::Start(offset))?;

    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

// ---------------------------------------------------------------------------
// MemorySource
// ---------------------------------------------------------------------------

/// An in-memory byte buffer.
pub struct MemorySource {
    name: String,
    data: Vec<u8>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

impl ChunkSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn slice(&self, offset: u64, max_len: usize) -> ReadFuture<'_> {
        let len = bounded_len(self.size(), offset, max_len);
        let start = offset.min(self.size()) as usize;
        let bytes = self.data[start..start + len].to_vec();
        Box::pin(async move { Ok(bytes) })
    }
}
