//! Local-disk backend rooted at one directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;

use super::{guess_mime_type, ByteStream, ObjectMeta, StorageBackend, StorageError};
use crate::utils::security::{basename, normalize_path};

#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Normalized key plus the absolute on-disk location for it.
    fn resolve(&self, path: &str) -> Result<(String, PathBuf), StorageError> {
        let key = normalize_path(path).map_err(|e| StorageError::invalid_path(path, e))?;
        let full = if key.is_empty() {
            self.root.clone()
        } else {
            self.root.join(&key)
        };
        Ok((key, full))
    }

    async fn ensure_parent(full: &Path) -> Result<(), StorageError> {
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

fn map_io(key: &str, e: std::io::Error) -> StorageError {
    if e.kind() == ErrorKind::NotFound {
        StorageError::NotFound(key.to_string())
    } else {
        StorageError::Io(e)
    }
}

fn object_meta(key: String, size: u64) -> ObjectMeta {
    let name = basename(&key).to_string();
    ObjectMeta {
        mime_type: guess_mime_type(&name),
        basename: name,
        path: key,
        size,
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    async fn has(&self, path: &str) -> Result<bool, StorageError> {
        let (_, full) = self.resolve(path)?;
        Ok(tokio::fs::try_exists(&full).await?)
    }

    async fn create_dir(&self, path: &str) -> Result<(), StorageError> {
        let (_, full) = self.resolve(path)?;
        tokio::fs::create_dir_all(&full).await?;
        Ok(())
    }

    async fn write(&self, path: &str, contents: Bytes) -> Result<(), StorageError> {
        let (key, full) = self.resolve(path)?;
        if key.is_empty() {
            return Err(StorageError::Root);
        }
        Self::ensure_parent(&full).await?;
        tokio::fs::write(&full, &contents).await?;
        Ok(())
    }

    async fn write_file(&self, path: &str, source: &Path) -> Result<(), StorageError> {
        let (key, full) = self.resolve(path)?;
        if key.is_empty() {
            return Err(StorageError::Root);
        }
        Self::ensure_parent(&full).await?;
        tokio::fs::copy(source, &full).await?;
        Ok(())
    }

    async fn read_stream(&self, path: &str) -> Result<ByteStream, StorageError> {
        let (key, full) = self.resolve(path)?;
        let file = tokio::fs::File::open(&full)
            .await
            .map_err(|e| map_io(&key, e))?;
        Ok(Box::new(file))
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let (key, full) = self.resolve(path)?;
        tokio::fs::remove_file(&full)
            .await
            .map_err(|e| map_io(&key, e))
    }

    async fn delete_dir(&self, path: &str) -> Result<(), StorageError> {
        let (key, full) = self.resolve(path)?;
        if key.is_empty() {
            return Err(StorageError::Root);
        }
        tokio::fs::remove_dir_all(&full)
            .await
            .map_err(|e| map_io(&key, e))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), StorageError> {
        let (from_key, from_full) = self.resolve(from)?;
        let (to_key, to_full) = self.resolve(to)?;
        if from_key.is_empty() || to_key.is_empty() {
            return Err(StorageError::Root);
        }
        Self::ensure_parent(&to_full).await?;
        tokio::fs::rename(&from_full, &to_full)
            .await
            .map_err(|e| map_io(&from_key, e))
    }

    async fn list_contents(&self, dir: &str) -> Result<Vec<ObjectMeta>, StorageError> {
        let (key, full) = self.resolve(dir)?;
        let mut entries = tokio::fs::read_dir(&full)
            .await
            .map_err(|e| map_io(&key, e))?;

        let mut objects = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                tracing::warn!(dir = %key, "Skipping non UTF-8 file name");
                continue;
            };
            let child = if key.is_empty() {
                name
            } else {
                format!("{key}/{name}")
            };
            objects.push(object_meta(child, metadata.len()));
        }

        objects.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(objects)
    }

    async fn metadata(&self, path: &str) -> Result<ObjectMeta, StorageError> {
        let (key, full) = self.resolve(path)?;
        let metadata = tokio::fs::metadata(&full)
            .await
            .map_err(|e| map_io(&key, e))?;
        if !metadata.is_file() {
            return Err(StorageError::NotFound(key));
        }
        Ok(object_meta(key, metadata.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn backend() -> (TempDir, LocalBackend) {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path());
        (dir, backend)
    }

    #[tokio::test]
    async fn write_then_read_creates_parents() {
        let (dir, backend) = backend();
        backend
            .write("uploads/tmp/a.txt", Bytes::from_static(b"hello"))
            .await
            .unwrap();

        assert!(dir.path().join("uploads/tmp/a.txt").exists());
        assert_eq!(backend.read("uploads/tmp/a.txt").await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn paths_cannot_escape_root() {
        let (_dir, backend) = backend();
        let result = backend
            .write("../escape.txt", Bytes::from_static(b"x"))
            .await;
        assert!(matches!(result, Err(StorageError::InvalidPath { .. })));
        assert!(backend.has("../../etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let (_dir, backend) = backend();
        let err = backend.metadata("missing/path").await.unwrap_err();
        assert!(err.is_not_found());
        let err = backend.read_stream("missing/path").await.err().unwrap();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn refuses_to_delete_root() {
        let (dir, backend) = backend();
        assert!(matches!(
            backend.delete_dir("/").await,
            Err(StorageError::Root)
        ));
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn list_contents_skips_directories() {
        let (_dir, backend) = backend();
        backend
            .write("t/b.txt", Bytes::from_static(b"bb"))
            .await
            .unwrap();
        backend
            .write("t/a.png", Bytes::from_static(b"a"))
            .await
            .unwrap();
        backend.create_dir("t/nested").await.unwrap();

        let listed = backend.list_contents("t").await.unwrap();
        let names: Vec<_> = listed.iter().map(|o| o.basename.as_str()).collect();
        assert_eq!(names, vec!["a.png", "b.txt"]);
        assert_eq!(listed[0].path, "t/a.png");
        assert_eq!(listed[0].mime_type, "image/png");
        assert_eq!(listed[1].size, 2);
    }

    #[tokio::test]
    async fn rename_moves_within_root() {
        let (dir, backend) = backend();
        backend
            .write("tmp/a.txt", Bytes::from_static(b"x"))
            .await
            .unwrap();
        backend.rename("tmp/a.txt", "final/a.txt").await.unwrap();

        assert!(!dir.path().join("tmp/a.txt").exists());
        assert!(dir.path().join("final/a.txt").exists());
    }
}
