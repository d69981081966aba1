//! Staging and commit of transfers on top of the storage mounts.
//!
//! Every id-driven path goes through [`is_valid_transfer_id`] before it is
//! joined onto a staging root. No locking happens here: two requests racing on
//! the same id get whatever the backend gives them.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

use super::encoded::EncodedFile;
use super::entry::{FileEntry, FileSource};
use super::id::is_valid_transfer_id;
use super::model::{Metadata, Transfer, TransferLookup};
use super::post::{Post, RequestPayload};
use crate::storage::{ByteStream, Mounts, StorageBackend, StorageError};
use crate::utils::security::{join_path, PathValidationError};

/// Sidecar holding a transfer's metadata, next to its primary file.
pub const METADATA_FILENAME: &str = ".metadata";

/// Names a staged file may not take.
pub fn is_reserved_name(name: &str) -> bool {
    name == METADATA_FILENAME
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("transfer has no primary file")]
    MissingPrimaryFile,

    #[error("upload failed with error code {code}")]
    UploadFailed { code: u32 },

    #[error("'{name}' is a reserved file name")]
    ReservedName { name: String },

    #[error("failed to move '{name}'")]
    MoveFailed { name: String },

    #[error("invalid path: {0}")]
    InvalidPath(#[from] PathValidationError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A readable file resolved for a load request.
pub struct LoadedFile {
    pub name: String,
    pub mime_type: String,
    pub length: u64,
    pub content: ByteStream,
}

impl fmt::Debug for LoadedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedFile")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

/// Result of committing one submitted value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Value did not resolve to a staged transfer and is handed back as is.
    Passthrough(String),
    /// Final path on the target backend.
    Committed(String),
    /// Name of a file that could not be moved.
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct TransferManager {
    mounts: Arc<Mounts>,
    current: String,
    target: Option<String>,
}

impl TransferManager {
    pub fn new(mounts: Arc<Mounts>, current: impl Into<String>) -> Self {
        Self {
            mounts,
            current: current.into(),
            target: None,
        }
    }

    /// Commit into another named backend than the one staging happens on.
    pub fn with_target(mut self, ident: impl Into<String>) -> Self {
        self.target = Some(ident.into());
        self
    }

    //-- Accessors
    pub fn current_ident(&self) -> &str {
        &self.current
    }

    pub fn target_ident(&self) -> &str {
        self.target.as_deref().unwrap_or(&self.current)
    }

    pub fn is_cross_backend(&self) -> bool {
        self.target_ident() != self.current
    }

    fn current(&self) -> Result<Arc<dyn StorageBackend>, StorageError> {
        self.mounts.get(&self.current)
    }

    fn target(&self) -> Result<Arc<dyn StorageBackend>, StorageError> {
        self.mounts.get(self.target_ident())
    }

    pub fn is_valid_transfer_id(&self, id: &str) -> bool {
        is_valid_transfer_id(id)
    }

    //===============
    // Staging
    //===============

    /// Persist `transfer` under `base/<id>` on the current backend.
    ///
    /// Directory creation is idempotent. The metadata sidecar is best-effort.
    /// Variants are not persisted.
    pub async fn store_transfer(&self, base: &str, transfer: &Transfer) -> Result<(), TransferError> {
        let primary = transfer.primary().ok_or(TransferError::MissingPrimaryFile)?;
        if !primary.is_ok() {
            return Err(TransferError::UploadFailed {
                code: primary.error_code,
            });
        }
        if is_reserved_name(&primary.name) {
            return Err(TransferError::ReservedName {
                name: primary.name.clone(),
            });
        }

        let backend = self.current()?;
        let dir = join_path(base, transfer.id())?;

        if !backend.has(&dir).await? {
            backend.create_dir(&dir).await?;
        }

        if !transfer.metadata().is_empty() {
            self.write_metadata(backend.as_ref(), &dir, transfer.metadata())
                .await;
        }

        let path = self.move_entry(primary, &dir).await?;
        tracing::info!(
            transfer_id = %transfer.id(),
            path = %path,
            size = primary.length,
            "Stored transfer"
        );

        Ok(())
    }

    async fn write_metadata(&self, backend: &dyn StorageBackend, dir: &str, metadata: &Metadata) {
        let result = match serde_json::to_vec(metadata) {
            Ok(json) => match join_path(dir, METADATA_FILENAME) {
                Ok(path) => backend
                    .write(&path, Bytes::from(json))
                    .await
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            },
            Err(e) => Err(e.to_string()),
        };

        if let Err(error) = result {
            tracing::warn!(dir = %dir, error = %error, "Failed to write transfer metadata");
        }
    }

    /// Rehydrate the transfer staged under `base/<id>`.
    pub async fn get_transfer(&self, base: &str, id: &str) -> TransferLookup {
        if !is_valid_transfer_id(id) {
            return TransferLookup::Invalid;
        }

        match self.load_transfer(base, id).await {
            Ok(Some(transfer)) => TransferLookup::Found(transfer),
            Ok(None) => TransferLookup::NotFound,
            Err(e) if e.is_not_found() => TransferLookup::NotFound,
            Err(e) => {
                tracing::warn!(transfer_id = %id, error = %e, "Failed to read staged transfer");
                TransferLookup::NotFound
            }
        }
    }

    async fn load_transfer(&self, base: &str, id: &str) -> Result<Option<Transfer>, StorageError> {
        let backend = self.current()?;
        let dir = join_path(base, id).map_err(|e| StorageError::invalid_path(base, e))?;

        let mut objects = backend.list_contents(&dir).await?;
        objects.sort_by(|a, b| a.basename.cmp(&b.basename));

        let sidecar = objects
            .iter()
            .position(|o| o.basename == METADATA_FILENAME)
            .map(|index| objects.remove(index));

        // no variant recovery; the first remaining file is the primary
        let Some(primary) = objects.into_iter().next() else {
            return Ok(None);
        };

        let metadata = match sidecar {
            Some(meta) => read_metadata(backend.as_ref(), &meta.path).await,
            None => Metadata::new(),
        };

        let mut transfer = Transfer::new(id);
        transfer.restore(FileEntry::from_object(primary), Vec::new(), metadata);
        Ok(Some(transfer))
    }

    /// Recursively delete `base/<id>`. Malformed ids never reach the backend.
    pub async fn remove_transfer_directory(&self, base: &str, id: &str) -> bool {
        if !is_valid_transfer_id(id) {
            return false;
        }

        let result = async {
            let dir = join_path(base, id).map_err(|e| StorageError::invalid_path(base, e))?;
            self.current()?.delete_dir(&dir).await
        }
        .await;

        match result {
            Ok(()) => {
                tracing::debug!(transfer_id = %id, "Removed transfer directory");
                true
            }
            Err(e) => {
                tracing::debug!(transfer_id = %id, error = %e, "Transfer directory not removed");
                false
            }
        }
    }

    //===============
    // Moves
    //===============

    /// Move one file into `dest_dir`, keeping its name. Last write wins.
    ///
    /// Spooled uploads are written to the current backend. Backend-resident
    /// files are renamed within one backend, or copied to the target and then
    /// deleted from the source when the target differs; a failed copy leaves
    /// the source untouched.
    pub async fn move_file(&self, file: &FileEntry, dest_dir: &str) -> bool {
        match self.move_entry(file, dest_dir).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(name = %file.name, dest = %dest_dir, error = %e, "Move failed");
                false
            }
        }
    }

    async fn move_entry(&self, file: &FileEntry, dest_dir: &str) -> Result<String, TransferError> {
        let dest = join_path(dest_dir, &file.name)?;

        match &file.source {
            FileSource::Uploaded(temp) => {
                self.current()?.write_file(&dest, temp).await?;
            }
            FileSource::Stored(source) => {
                self.move_stored(source, &dest).await?;
            }
        }

        Ok(dest)
    }

    async fn move_stored(&self, source: &str, dest: &str) -> Result<(), TransferError> {
        let current = self.current()?;
        let target = self.target()?;
        let cross = self.is_cross_backend();

        if !cross && source == dest {
            return Ok(());
        }

        // overwrite
        match target.delete(dest).await {
            Ok(()) => tracing::debug!(path = %dest, "Replacing existing file"),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        if !cross {
            current.rename(source, dest).await?;
            return Ok(());
        }

        self.mounts
            .copy(&self.current, source, self.target_ident(), dest)
            .await?;

        // at-least-once: a failure here leaves a duplicate, never a loss
        if let Err(e) = current.delete(source).await {
            tracing::warn!(path = %source, error = %e, "Copied file but failed to delete source");
        }

        Ok(())
    }

    //===============
    // Loading
    //===============

    /// Resolve `path` on the current backend for streaming back to a client.
    pub async fn read_file(&self, path: &str) -> Result<LoadedFile, StorageError> {
        let backend = self.current()?;
        let meta = backend.metadata(path).await?;
        let content = backend.read_stream(&meta.path).await?;

        Ok(LoadedFile {
            name: meta.basename,
            mime_type: meta.mime_type,
            length: meta.size,
            content,
        })
    }

    //===============
    // Commit
    //===============

    /// Move every staged transfer in `ids` to `upload_path` on the target.
    ///
    /// Ids that do not resolve come back as [`CommitOutcome::Passthrough`].
    /// The staging directory is removed once all of its files moved; after a
    /// failed move it stays so the commit can be retried.
    pub async fn commit_transfer_ids<S: AsRef<str>>(
        &self,
        transfer_dir: &str,
        ids: &[S],
        upload_path: &str,
    ) -> Vec<CommitOutcome> {
        let mut out = Vec::new();

        for id in ids {
            let id = id.as_ref();
            let Some(transfer) = self.get_transfer(transfer_dir, id).await.found() else {
                out.push(CommitOutcome::Passthrough(id.to_string()));
                continue;
            };

            let mut all_moved = true;
            for file in transfer.files() {
                match self.move_entry(file, upload_path).await {
                    Ok(path) => out.push(CommitOutcome::Committed(path)),
                    Err(e) => {
                        tracing::warn!(transfer_id = %id, name = %file.name, error = %e, "Commit failed");
                        all_moved = false;
                        out.push(CommitOutcome::Failed(file.name.clone()));
                    }
                }
            }

            if all_moved {
                self.remove_transfer_directory(transfer_dir, id).await;
                tracing::info!(transfer_id = %id, "Committed transfer");
            }
        }

        out
    }

    /// Commit one classified field straight to `upload_path` on the target.
    pub async fn commit_post(
        &self,
        post: &Post,
        transfer_dir: &str,
        upload_path: &str,
    ) -> Vec<CommitOutcome> {
        match post {
            Post::TransferIds(ids) => {
                let ids: Vec<&str> = ids.iter().map(|id| id.trim()).collect();
                self.commit_transfer_ids(transfer_dir, &ids, upload_path).await
            }
            Post::EncodedFiles(values) => {
                let mut out = Vec::with_capacity(values.len());
                for raw in values {
                    out.push(self.commit_encoded(raw, upload_path).await);
                }
                out
            }
            Post::FileObjects(files) => {
                let mut out = Vec::with_capacity(files.len());
                for file in files {
                    out.push(self.commit_upload(file, upload_path).await);
                }
                out
            }
        }
    }

    async fn commit_encoded(&self, raw: &str, upload_path: &str) -> CommitOutcome {
        let file = match EncodedFile::decode(raw) {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping undecodable file object");
                return CommitOutcome::Failed(String::new());
            }
        };

        let result: Result<String, TransferError> = async {
            let dest = join_path(upload_path, &file.name)?;
            self.target()?.write(&dest, file.contents.clone()).await?;
            Ok(dest)
        }
        .await;

        match result {
            Ok(path) => CommitOutcome::Committed(path),
            Err(e) => {
                tracing::warn!(name = %file.name, error = %e, "Failed to write decoded file");
                CommitOutcome::Failed(file.name)
            }
        }
    }

    async fn commit_upload(&self, file: &FileEntry, upload_path: &str) -> CommitOutcome {
        let result: Result<String, TransferError> = async {
            if !file.is_ok() {
                return Err(TransferError::UploadFailed {
                    code: file.error_code,
                });
            }
            let FileSource::Uploaded(temp) = &file.source else {
                return Err(TransferError::MoveFailed {
                    name: file.name.clone(),
                });
            };
            let dest = join_path(upload_path, &file.name)?;
            self.target()?.write_file(&dest, temp).await?;
            Ok(dest)
        }
        .await;

        match result {
            Ok(path) => CommitOutcome::Committed(path),
            Err(e) => {
                tracing::warn!(name = %file.name, error = %e, "Failed to commit upload");
                CommitOutcome::Failed(file.name.clone())
            }
        }
    }
}

/// First field among `entries` that was submitted, classified.
pub fn parse_post_files<S: AsRef<str>>(payload: &RequestPayload, entries: &[S]) -> Option<Post> {
    entries
        .iter()
        .find_map(|entry| Post::classify(payload, entry.as_ref()))
}

async fn read_metadata(backend: &dyn StorageBackend, path: &str) -> Metadata {
    let raw = match backend.read(path).await {
        Ok(raw) => raw,
        Err(e) => {
            tracing::debug!(path = %path, error = %e, "Unreadable metadata sidecar");
            return Metadata::new();
        }
    };

    match serde_json::from_slice(&raw) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => {
            tracing::debug!(path = %path, "Metadata sidecar is not a JSON object");
            Metadata::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;
    use crate::transfer::entry::UPLOAD_ERR_PARTIAL;

    const ID: &str = "0123456789abcdef0123456789abcdef";

    fn manager() -> (Arc<MemoryBackend>, TransferManager) {
        let backend = Arc::new(MemoryBackend::new());
        let mounts = Mounts::new().with("private", backend.clone());
        (backend, TransferManager::new(Arc::new(mounts), "private"))
    }

    #[tokio::test]
    async fn store_rejects_missing_primary() {
        let (backend, manager) = manager();
        let result = manager
            .store_transfer("uploads/tmp", &Transfer::new(ID))
            .await;

        assert!(matches!(result, Err(TransferError::MissingPrimaryFile)));
        assert!(!backend.has("uploads/tmp").await.unwrap());
    }

    #[tokio::test]
    async fn store_rejects_failed_upload() {
        let (backend, manager) = manager();
        let entry = FileEntry::uploaded("/nonexistent", "a.txt", "text/plain", 0)
            .with_error(UPLOAD_ERR_PARTIAL);
        let result = manager
            .store_transfer("uploads/tmp", &Transfer::new(ID).with_primary(entry))
            .await;

        assert!(matches!(
            result,
            Err(TransferError::UploadFailed { code: UPLOAD_ERR_PARTIAL })
        ));
        assert!(!backend.has("uploads/tmp").await.unwrap());
    }

    #[tokio::test]
    async fn get_transfer_reads_primary_and_sidecar() {
        let (backend, manager) = manager();
        let dir = format!("uploads/tmp/{ID}");
        backend
            .write(&format!("{dir}/a.txt"), Bytes::from_static(b"0123456789"))
            .await
            .unwrap();
        backend
            .write(&format!("{dir}/.metadata"), Bytes::from_static(br#"{"k":"v"}"#))
            .await
            .unwrap();

        let transfer = manager
            .get_transfer("uploads/tmp", ID)
            .await
            .found()
            .unwrap();

        let primary = transfer.primary().unwrap();
        assert_eq!(primary.name, "a.txt");
        assert_eq!(primary.length, 10);
        assert_eq!(primary.source, FileSource::Stored(format!("{dir}/a.txt")));
        assert_eq!(transfer.metadata()["k"], "v");
    }

    #[tokio::test]
    async fn corrupt_sidecar_yields_empty_metadata() {
        let (backend, manager) = manager();
        let dir = format!("uploads/tmp/{ID}");
        backend
            .write(&format!("{dir}/a.txt"), Bytes::from_static(b"x"))
            .await
            .unwrap();
        backend
            .write(&format!("{dir}/.metadata"), Bytes::from_static(b"not json"))
            .await
            .unwrap();

        let transfer = manager
            .get_transfer("uploads/tmp", ID)
            .await
            .found()
            .unwrap();
        assert!(transfer.metadata().is_empty());
    }

    #[tokio::test]
    async fn sidecar_alone_is_not_a_transfer() {
        let (backend, manager) = manager();
        backend
            .write(&format!("uploads/tmp/{ID}/.metadata"), Bytes::from_static(b"{}"))
            .await
            .unwrap();

        assert_eq!(
            manager.get_transfer("uploads/tmp", ID).await,
            TransferLookup::NotFound
        );
    }

    #[tokio::test]
    async fn lookup_states() {
        let (_backend, manager) = manager();
        assert_eq!(
            manager.get_transfer("uploads/tmp", "../../etc").await,
            TransferLookup::Invalid
        );
        assert_eq!(
            manager.get_transfer("uploads/tmp", ID).await,
            TransferLookup::NotFound
        );
    }

    #[tokio::test]
    async fn same_backend_move_onto_itself_is_untouched() {
        let (backend, manager) = manager();
        backend
            .write("uploads/a.txt", Bytes::from_static(b"x"))
            .await
            .unwrap();
        let entry = FileEntry::from_object(backend.metadata("uploads/a.txt").await.unwrap());

        assert!(manager.move_file(&entry, "uploads").await);
        assert_eq!(backend.read("uploads/a.txt").await.unwrap(), "x");
    }

    #[tokio::test]
    async fn move_overwrites_existing_destination() {
        let (backend, manager) = manager();
        backend
            .write("tmp/a.txt", Bytes::from_static(b"new"))
            .await
            .unwrap();
        backend
            .write("final/a.txt", Bytes::from_static(b"old"))
            .await
            .unwrap();
        let entry = FileEntry::from_object(backend.metadata("tmp/a.txt").await.unwrap());

        assert!(manager.move_file(&entry, "final").await);
        assert_eq!(backend.read("final/a.txt").await.unwrap(), "new");
        assert!(!backend.has("tmp/a.txt").await.unwrap());
    }

    #[tokio::test]
    async fn parse_post_files_takes_first_submitted_entry() {
        let payload = RequestPayload::new()
            .with_value("gallery", ID)
            .with_value("avatar", r#"{"name":"a.txt","data":"aGk="}"#);

        let post = parse_post_files(&payload, &["missing", "avatar", "gallery"]).unwrap();
        assert!(matches!(post, Post::EncodedFiles(_)));
        assert!(parse_post_files(&payload, &["missing"]).is_none());
    }

    #[tokio::test]
    async fn commit_encoded_files_writes_to_upload_path() {
        let (backend, manager) = manager();
        let post = Post::EncodedFiles(vec![
            r#"{"name":"a.txt","data":"aGk="}"#.to_string(),
            r#"{"name":"b.txt","data":"!!"}"#.to_string(),
        ]);

        let outcomes = manager.commit_post(&post, "uploads/tmp", "uploads").await;
        assert_eq!(
            outcomes,
            vec![
                CommitOutcome::Committed("uploads/a.txt".to_string()),
                // undecodable objects have no usable name
                CommitOutcome::Failed(String::new()),
            ]
        );
        assert_eq!(backend.read("uploads/a.txt").await.unwrap(), "hi");
        assert!(!backend.has("uploads/b.txt").await.unwrap());
    }
}
