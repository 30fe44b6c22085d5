//! Storage medium abstraction.
//!
//! The stores never touch the filesystem directly. They address blobs by
//! slash-separated relative paths (`<bucket>/<id>/binaryData`) through the
//! [`BlobRepository`] trait, which has two implementations:
//!
//! - [`FileSystemRepository`]: the real thing, rooted at a directory.
//! - [`InMemoryRepository`]: a [`DashMap`]-backed stand-in for tests.
//!
//! Writes are atomic per blob: a reader sees either the previous content or
//! the new content in full, never a mixture.

use std::fmt;
use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::{S3MockError, S3MockResult};

/// A boxed, sendable byte stream.
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// Suffix of in-flight temporary files; such entries are never listed.
const TEMP_SUFFIX: &str = ".tmp";

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A hierarchical blob store addressed by relative paths.
#[async_trait]
pub trait BlobRepository: Send + Sync + fmt::Debug {
    /// Read a whole blob. `None` if it does not exist.
    async fn get(&self, path: &str) -> S3MockResult<Option<Bytes>>;

    /// Open a blob for streaming. `None` if it does not exist.
    async fn open(&self, path: &str) -> S3MockResult<Option<ByteStream>>;

    /// Open `len` bytes of a blob starting at `start`.
    async fn open_range(&self, path: &str, start: u64, len: u64)
    -> S3MockResult<Option<ByteStream>>;

    /// Atomically replace the blob at `path` with everything `reader`
    /// yields. Returns the number of bytes written.
    async fn put(&self, path: &str, reader: &mut (dyn AsyncRead + Send + Unpin))
    -> S3MockResult<u64>;

    /// Atomically replace the blob at `path` with `data`.
    async fn put_bytes(&self, path: &str, data: Bytes) -> S3MockResult<()> {
        let mut reader: &[u8] = &data;
        self.put(path, &mut reader).await.map(|_| ())
    }

    /// Remove the blob at `path` or everything beneath it. Absent paths are
    /// not an error.
    async fn delete(&self, path: &str) -> S3MockResult<()>;

    /// Sorted names of the direct children of `dir` (`""` is the root).
    async fn list(&self, dir: &str) -> S3MockResult<Vec<String>>;

    /// The physical location of `path`, for metadata and diagnostics.
    fn locate(&self, path: &str) -> PathBuf;
}

/// Join relative path segments with `/`.
#[must_use]
pub fn join_path(segments: &[&str]) -> String {
    segments
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("/")
}

/// Serialize `value` as pretty JSON and store it at `path`.
pub async fn put_json<T: Serialize + Sync>(
    repo: &dyn BlobRepository,
    path: &str,
    value: &T,
) -> S3MockResult<()> {
    let json = serde_json::to_vec_pretty(value)
        .with_context(|| format!("failed to serialize {path}"))?;
    repo.put_bytes(path, Bytes::from(json)).await
}

/// Read and deserialize the JSON document at `path`. `None` if absent.
pub async fn get_json<T: DeserializeOwned>(
    repo: &dyn BlobRepository,
    path: &str,
) -> S3MockResult<Option<T>> {
    let Some(raw) = repo.get(path).await? else {
        return Ok(None);
    };
    let value = serde_json::from_slice(&raw).with_context(|| format!("failed to parse {path}"))?;
    Ok(Some(value))
}

// ---------------------------------------------------------------------------
// FileSystemRepository
// ---------------------------------------------------------------------------

/// Repository backed by a directory tree.
#[derive(Debug, Clone)]
pub struct FileSystemRepository {
    root: PathBuf,
}

impl FileSystemRepository {
    /// Create a repository rooted at `root`, creating the directory if
    /// needed.
    pub async fn open(root: impl Into<PathBuf>) -> S3MockResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("failed to create root directory {}", root.display()))?;
        debug!(root = %root.display(), "opened filesystem repository");
        Ok(Self { root })
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a relative path under the root. Every segment must be a plain
    /// name so that no path can leave the root.
    fn resolve(&self, path: &str) -> S3MockResult<PathBuf> {
        let mut full = self.root.clone();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let mut components = Path::new(segment).components();
            if !matches!(
                (components.next(), components.next()),
                (Some(Component::Normal(_)), None)
            ) {
                return Err(S3MockError::invalid_argument(format!(
                    "Invalid path segment {segment:?} in {path}"
                )));
            }
            full.push(segment);
        }
        Ok(full)
    }
}

#[async_trait]
impl BlobRepository for FileSystemRepository {
    async fn get(&self, path: &str) -> S3MockResult<Option<Bytes>> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("failed to read {}", full.display()))
                .into()),
        }
    }

    async fn open(&self, path: &str) -> S3MockResult<Option<ByteStream>> {
        let full = self.resolve(path)?;
        match tokio::fs::File::open(&full).await {
            Ok(file) => Ok(Some(Box::pin(file))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("failed to open {}", full.display()))
                .into()),
        }
    }

    async fn open_range(
        &self,
        path: &str,
        start: u64,
        len: u64,
    ) -> S3MockResult<Option<ByteStream>> {
        let full = self.resolve(path)?;
        let mut file = match tokio::fs::File::open(&full).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("failed to open {}", full.display()))
                    .into());
            }
        };
        file.seek(SeekFrom::Start(start))
            .await
            .with_context(|| format!("failed to seek {}", full.display()))?;
        Ok(Some(Box::pin(file.take(len))))
    }

    async fn put(
        &self,
        path: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> S3MockResult<u64> {
        let full = self.resolve(path)?;
        let parent = full
            .parent()
            .map_or_else(|| self.root.clone(), Path::to_path_buf);
        tokio::fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("failed to create directory {}", parent.display()))?;

        let file_name = full
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = parent.join(format!(".{file_name}.{}{TEMP_SUFFIX}", Uuid::new_v4().simple()));

        let written = async {
            let mut file = tokio::fs::File::create(&temp).await?;
            let written = tokio::io::copy(reader, &mut file).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok::<_, std::io::Error>(written)
        }
        .await;

        let written = match written {
            Ok(n) => n,
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp).await;
                return Err(e.into());
            }
        };

        tokio::fs::rename(&temp, &full)
            .await
            .with_context(|| format!("failed to move blob into {}", full.display()))?;
        trace!(path = %full.display(), bytes = written, "blob written");
        Ok(written)
    }

    async fn delete(&self, path: &str) -> S3MockResult<()> {
        let full = self.resolve(path)?;
        let meta = match tokio::fs::metadata(&full).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("failed to stat {}", full.display()))
                    .into());
            }
        };
        let result = if meta.is_dir() {
            tokio::fs::remove_dir_all(&full).await
        } else {
            tokio::fs::remove_file(&full).await
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("failed to delete {}", full.display()))
                .into()),
        }
    }

    async fn list(&self, dir: &str) -> S3MockResult<Vec<String>> {
        let full = self.resolve(dir)?;
        let mut entries = match tokio::fs::read_dir(&full).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("failed to list {}", full.display()))
                    .into());
            }
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("failed to list {}", full.display()))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(TEMP_SUFFIX) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn locate(&self, path: &str) -> PathBuf {
        self.resolve(path).unwrap_or_else(|_| self.root.clone())
    }
}

// ---------------------------------------------------------------------------
// InMemoryRepository
// ---------------------------------------------------------------------------

/// Repository keeping every blob in memory.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    blobs: DashMap<String, Bytes>,
}

impl InMemoryRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blobs stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Whether no blob is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl BlobRepository for InMemoryRepository {
    async fn get(&self, path: &str) -> S3MockResult<Option<Bytes>> {
        Ok(self.blobs.get(path).map(|b| b.value().clone()))
    }

    async fn open(&self, path: &str) -> S3MockResult<Option<ByteStream>> {
        Ok(self
            .blobs
            .get(path)
            .map(|b| Box::pin(std::io::Cursor::new(b.value().clone())) as ByteStream))
    }

    async fn open_range(
        &self,
        path: &str,
        start: u64,
        len: u64,
    ) -> S3MockResult<Option<ByteStream>> {
        Ok(self.blobs.get(path).map(|b| {
            let data = b.value();
            let from = usize::try_from(start).unwrap_or(usize::MAX).min(data.len());
            let to = usize::try_from(start.saturating_add(len))
                .unwrap_or(usize::MAX)
                .min(data.len());
            Box::pin(std::io::Cursor::new(data.slice(from..to))) as ByteStream
        }))
    }

    async fn put(
        &self,
        path: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> S3MockResult<u64> {
        let mut data = Vec::new();
        let written = reader.read_to_end(&mut data).await?;
        self.blobs.insert(path.to_owned(), Bytes::from(data));
        Ok(written as u64)
    }

    async fn delete(&self, path: &str) -> S3MockResult<()> {
        let nested = format!("{path}/");
        self.blobs
            .retain(|key, _| key != path && !key.starts_with(&nested));
        Ok(())
    }

    async fn list(&self, dir: &str) -> S3MockResult<Vec<String>> {
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{dir}/")
        };
        let mut names: Vec<String> = self
            .blobs
            .iter()
            .filter_map(|entry| {
                entry
                    .key()
                    .strip_prefix(&prefix)
                    .and_then(|rest| rest.split('/').next())
                    .map(str::to_owned)
            })
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn locate(&self, path: &str) -> PathBuf {
        PathBuf::from(path)
    }
}
