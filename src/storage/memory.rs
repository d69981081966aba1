//! In-process object store. Directories are implicit key prefixes, plus
//! explicitly created (possibly empty) directory markers.

use std::io::Cursor;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};

use super::{guess_mime_type, ByteStream, ObjectMeta, StorageBackend, StorageError};
use crate::utils::security::{basename, normalize_path};

#[derive(Debug, Default)]
pub struct MemoryBackend {
    objects: DashMap<String, Bytes>,
    dirs: DashSet<String>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(path: &str) -> Result<String, StorageError> {
        normalize_path(path).map_err(|e| StorageError::invalid_path(path, e))
    }

    fn is_dir(&self, key: &str) -> bool {
        if key.is_empty() || self.dirs.contains(key) {
            return true;
        }
        let prefix = format!("{key}/");
        self.objects.iter().any(|entry| entry.key().starts_with(&prefix))
    }

    fn meta(key: &str, contents: &Bytes) -> ObjectMeta {
        let name = basename(key).to_string();
        ObjectMeta {
            path: key.to_string(),
            mime_type: guess_mime_type(&name),
            basename: name,
            size: contents.len() as u64,
        }
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn has(&self, path: &str) -> Result<bool, StorageError> {
        let key = Self::key(path)?;
        Ok(self.objects.contains_key(&key) || self.is_dir(&key))
    }

    async fn create_dir(&self, path: &str) -> Result<(), StorageError> {
        let key = Self::key(path)?;
        if !key.is_empty() {
            self.dirs.insert(key);
        }
        Ok(())
    }

    async fn write(&self, path: &str, contents: Bytes) -> Result<(), StorageError> {
        let key = Self::key(path)?;
        if key.is_empty() {
            return Err(StorageError::Root);
        }
        self.objects.insert(key, contents);
        Ok(())
    }

    async fn read_stream(&self, path: &str) -> Result<ByteStream, StorageError> {
        let contents = self.read(path).await?;
        Ok(Box::new(Cursor::new(contents)))
    }

    async fn read(&self, path: &str) -> Result<Bytes, StorageError> {
        let key = Self::key(path)?;
        self.objects
            .get(&key)
            .map(|entry| entry.value().clone())
            .ok_or(StorageError::NotFound(key))
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let key = Self::key(path)?;
        self.objects
            .remove(&key)
            .map(|_| ())
            .ok_or(StorageError::NotFound(key))
    }

    async fn delete_dir(&self, path: &str) -> Result<(), StorageError> {
        let key = Self::key(path)?;
        if key.is_empty() {
            return Err(StorageError::Root);
        }
        if !self.is_dir(&key) {
            return Err(StorageError::NotFound(key));
        }

        let prefix = format!("{key}/");
        self.objects.retain(|k, _| !k.starts_with(&prefix));
        self.dirs.retain(|d| d != &key && !d.starts_with(&prefix));
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), StorageError> {
        let from_key = Self::key(from)?;
        let to_key = Self::key(to)?;
        if to_key.is_empty() {
            return Err(StorageError::Root);
        }
        let (_, contents) = self
            .objects
            .remove(&from_key)
            .ok_or(StorageError::NotFound(from_key))?;
        self.objects.insert(to_key, contents);
        Ok(())
    }

    async fn list_contents(&self, dir: &str) -> Result<Vec<ObjectMeta>, StorageError> {
        let key = Self::key(dir)?;
        if !self.is_dir(&key) {
            return Err(StorageError::NotFound(key));
        }

        let prefix = if key.is_empty() {
            String::new()
        } else {
            format!("{key}/")
        };

        let mut objects: Vec<ObjectMeta> = self
            .objects
            .iter()
            .filter(|entry| {
                entry
                    .key()
                    .strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
            })
            .map(|entry| Self::meta(entry.key(), entry.value()))
            .collect();

        objects.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(objects)
    }

    async fn metadata(&self, path: &str) -> Result<ObjectMeta, StorageError> {
        let key = Self::key(path)?;
        self.objects
            .get(&key)
            .map(|entry| Self::meta(&key, entry.value()))
            .ok_or(StorageError::NotFound(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn directories_are_implicit_prefixes() {
        let backend = MemoryBackend::new();
        backend
            .write("a/b/c.txt", Bytes::from_static(b"c"))
            .await
            .unwrap();

        assert!(backend.has("a").await.unwrap());
        assert!(backend.has("a/b").await.unwrap());
        assert!(!backend.has("a/c").await.unwrap());
    }

    #[tokio::test]
    async fn delete_dir_is_recursive() {
        let backend = MemoryBackend::new();
        backend
            .write("t/x/1.txt", Bytes::from_static(b"1"))
            .await
            .unwrap();
        backend
            .write("t/x/sub/2.txt", Bytes::from_static(b"2"))
            .await
            .unwrap();
        backend
            .write("t/xy.txt", Bytes::from_static(b"keep"))
            .await
            .unwrap();

        backend.delete_dir("t/x").await.unwrap();

        assert!(!backend.has("t/x").await.unwrap());
        assert!(backend.has("t/xy.txt").await.unwrap());
        assert_eq!(backend.object_count(), 1);
    }

    #[tokio::test]
    async fn delete_dir_missing_is_not_found() {
        let backend = MemoryBackend::new();
        assert!(backend.delete_dir("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn empty_created_dir_exists_and_lists_empty() {
        let backend = MemoryBackend::new();
        backend.create_dir("staging/abc").await.unwrap();

        assert!(backend.has("staging/abc").await.unwrap());
        assert!(backend.list_contents("staging/abc").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_contents_returns_direct_children_only() {
        let backend = MemoryBackend::new();
        backend
            .write("d/a.txt", Bytes::from_static(b"a"))
            .await
            .unwrap();
        backend
            .write("d/sub/b.txt", Bytes::from_static(b"b"))
            .await
            .unwrap();

        let listed = backend.list_contents("d").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].basename, "a.txt");
        assert_eq!(listed[0].mime_type, "text/plain");
    }

    #[tokio::test]
    async fn rename_missing_source_is_not_found() {
        let backend = MemoryBackend::new();
        assert!(backend
            .rename("nope.txt", "there.txt")
            .await
            .unwrap_err()
            .is_not_found());
    }
}
