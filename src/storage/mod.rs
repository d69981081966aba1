//! Storage backend abstraction shared by every configured server.
//!
//! Backends address objects by normalized, root-relative keys
//! (see [`crate::utils::security::normalize_path`]). Directories are
//! whatever the backend makes of them: real folders on disk, key prefixes
//! in an object store.

pub mod local;
pub mod memory;

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::common::config::{AppConfig, FilesystemConfig, FilesystemKind};
use crate::utils::security::PathValidationError;

pub use local::LocalBackend;
pub use memory::MemoryBackend;

/// Readable object content handed out by [`StorageBackend::read_stream`].
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid path '{path}': {reason}")]
    InvalidPath {
        path: String,
        reason: PathValidationError,
    },

    #[error("refusing to operate on backend root")]
    Root,

    #[error("unknown filesystem '{0}'")]
    UnknownFilesystem(String),

    #[error("misconfigured filesystem: {0}")]
    Misconfigured(String),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub(crate) fn invalid_path(path: &str, reason: PathValidationError) -> Self {
        StorageError::InvalidPath {
            path: path.to_string(),
            reason,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

/// What a backend knows about one stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub path: String,
    pub basename: String,
    pub size: u64,
    pub mime_type: String,
}

/// Capability interface the transfer manager depends on.
///
/// Implementations must tolerate concurrent calls for distinct keys. Nothing
/// here serializes calls on the same key.
#[async_trait]
pub trait StorageBackend: Send + Sync + fmt::Debug {
    async fn has(&self, path: &str) -> Result<bool, StorageError>;

    /// Create a directory and any missing parents. Succeeds if it exists.
    async fn create_dir(&self, path: &str) -> Result<(), StorageError>;

    /// Create or replace an object, creating parent directories.
    async fn write(&self, path: &str, contents: Bytes) -> Result<(), StorageError>;

    async fn read_stream(&self, path: &str) -> Result<ByteStream, StorageError>;

    async fn delete(&self, path: &str) -> Result<(), StorageError>;

    /// Recursively delete a directory.
    async fn delete_dir(&self, path: &str) -> Result<(), StorageError>;

    async fn rename(&self, from: &str, to: &str) -> Result<(), StorageError>;

    /// Direct child objects of `dir`. Subdirectories are not listed.
    async fn list_contents(&self, dir: &str) -> Result<Vec<ObjectMeta>, StorageError>;

    async fn metadata(&self, path: &str) -> Result<ObjectMeta, StorageError>;

    /// Store a local file (usually a spooled upload) under `path`.
    async fn write_file(&self, path: &str, source: &Path) -> Result<(), StorageError> {
        let contents = tokio::fs::read(source).await?;
        self.write(path, Bytes::from(contents)).await
    }

    async fn read(&self, path: &str) -> Result<Bytes, StorageError> {
        let mut stream = self.read_stream(path).await?;
        let mut buffer = Vec::new();
        stream.read_to_end(&mut buffer).await?;
        Ok(Bytes::from(buffer))
    }
}

/// Named backends, addressable by filesystem ident.
#[derive(Debug, Default, Clone)]
pub struct Mounts {
    backends: HashMap<String, Arc<dyn StorageBackend>>,
}

impl Mounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one backend per configured filesystem.
    pub fn from_config(config: &AppConfig) -> Result<Self, StorageError> {
        let mut mounts = Self::new();
        for (ident, filesystem) in &config.filesystems {
            mounts.mount(ident.clone(), build_backend(filesystem)?);
        }
        Ok(mounts)
    }

    pub fn mount(&mut self, ident: impl Into<String>, backend: Arc<dyn StorageBackend>) {
        self.backends.insert(ident.into(), backend);
    }

    pub fn with(mut self, ident: impl Into<String>, backend: Arc<dyn StorageBackend>) -> Self {
        self.mount(ident, backend);
        self
    }

    pub fn get(&self, ident: &str) -> Result<Arc<dyn StorageBackend>, StorageError> {
        self.backends
            .get(ident)
            .cloned()
            .ok_or_else(|| StorageError::UnknownFilesystem(ident.to_string()))
    }

    pub fn contains(&self, ident: &str) -> bool {
        self.backends.contains_key(ident)
    }

    /// Copy one object between (possibly different) mounts.
    /// The source is left untouched.
    pub async fn copy(
        &self,
        from_ident: &str,
        from_path: &str,
        to_ident: &str,
        to_path: &str,
    ) -> Result<(), StorageError> {
        let source = self.get(from_ident)?;
        let destination = self.get(to_ident)?;

        let contents = source.read(from_path).await?;
        destination.write(to_path, contents).await
    }
}

fn build_backend(filesystem: &FilesystemConfig) -> Result<Arc<dyn StorageBackend>, StorageError> {
    match filesystem.kind {
        FilesystemKind::Local => {
            let root = filesystem.root.clone().ok_or_else(|| {
                StorageError::Misconfigured("local filesystem requires a root".to_string())
            })?;
            Ok(Arc::new(LocalBackend::new(root)))
        }
        FilesystemKind::Memory => Ok(Arc::new(MemoryBackend::new())),
    }
}

/// Mime type from the file extension. Unknown extensions are
/// `application/octet-stream`.
pub fn guess_mime_type(name: &str) -> String {
    mime_guess::from_path(name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guess_mime_type_by_extension() {
        assert_eq!(guess_mime_type("a.txt"), "text/plain");
        assert_eq!(guess_mime_type("photo.JPG"), "image/jpeg");
        assert_eq!(guess_mime_type("noext"), "application/octet-stream");
        assert_eq!(guess_mime_type(".metadata"), "application/octet-stream");
    }

    #[tokio::test]
    async fn copy_between_mounts_keeps_source() {
        let left: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let right: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        left.write("tmp/a.txt", Bytes::from_static(b"hello"))
            .await
            .unwrap();

        let mounts = Mounts::new()
            .with("left", left.clone())
            .with("right", right.clone());

        mounts
            .copy("left", "tmp/a.txt", "right", "final/a.txt")
            .await
            .unwrap();

        assert_eq!(right.read("final/a.txt").await.unwrap(), "hello");
        assert!(left.has("tmp/a.txt").await.unwrap());
    }

    #[tokio::test]
    async fn unknown_mount_is_an_error() {
        let mounts = Mounts::new();
        assert!(matches!(
            mounts.get("nope"),
            Err(StorageError::UnknownFilesystem(_))
        ));
    }
}
