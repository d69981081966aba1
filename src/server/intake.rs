//! Turns a POST body into a [`RequestPayload`].
//!
//! File parts stream to `upload-<uuid>.part` files in the spool directory.
//! The returned [`SpoolGuard`] deletes them when it drops, so spooled parts
//! never outlive the request whether or not they were moved into storage.

use std::path::{Path, PathBuf};

use anyhow::Context;
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::header::CONTENT_TYPE;
use axum::Form;
use tokio::io::AsyncWriteExt;

use crate::common::errors::AppError;
use crate::storage::guess_mime_type;
use crate::transfer::entry::{FileEntry, UPLOAD_ERR_NO_FILE, UPLOAD_ERR_OK, UPLOAD_ERR_PARTIAL};
use crate::transfer::RequestPayload;
use crate::utils::security::sanitize_upload_name;

// Spooled parts of one request. Removed on drop.
#[derive(Debug, Default)]
pub struct SpoolGuard {
    paths: Vec<PathBuf>,
}

impl SpoolGuard {
    fn track(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl Drop for SpoolGuard {
    fn drop(&mut self) {
        // Drop is sync; unlinking a handful of files is quick
        for path in &self.paths {
            match std::fs::remove_file(path) {
                Ok(()) => tracing::debug!(path = %path.display(), "Removed spooled upload"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to clean up spooled upload"
                ),
            }
        }
    }
}

fn content_type(request: &Request) -> &str {
    request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

/// Read every field of a POST body. Bodies that are neither multipart nor
/// urlencoded yield an empty payload.
pub async fn read_payload(
    request: Request,
    spool_dir: &Path,
) -> Result<(RequestPayload, SpoolGuard), AppError> {
    let mime = content_type(&request).to_ascii_lowercase();

    if mime.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        return read_multipart(multipart, spool_dir).await;
    }

    if mime.starts_with("application/x-www-form-urlencoded") {
        let Form(pairs) = Form::<Vec<(String, String)>>::from_request(request, &())
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;

        let mut payload = RequestPayload::new();
        for (name, value) in pairs {
            payload.push_value(&field_key(&name), value);
        }
        return Ok((payload, SpoolGuard::default()));
    }

    tracing::debug!(content_type = %mime, "POST without form body");
    Ok((RequestPayload::new(), SpoolGuard::default()))
}

// `files[]` and `files` address the same field
fn field_key(name: &str) -> String {
    name.strip_suffix("[]").unwrap_or(name).to_string()
}

pub async fn read_multipart(
    mut multipart: Multipart,
    spool_dir: &Path,
) -> Result<(RequestPayload, SpoolGuard), AppError> {
    let mut payload = RequestPayload::new();
    let mut spool = SpoolGuard::default();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.body_text()))?
    {
        let name = field_key(field.name().unwrap_or_default());

        let Some(raw_name) = field.file_name().map(str::to_string) else {
            let value = field
                .text()
                .await
                .map_err(|e| AppError::BadRequest(e.body_text()))?;
            payload.push_value(&name, value);
            continue;
        };

        // browsers send an empty file part when nothing was picked
        if raw_name.is_empty() {
            payload.push_file(
                &name,
                FileEntry::uploaded(PathBuf::new(), "", "", 0).with_error(UPLOAD_ERR_NO_FILE),
            );
            continue;
        }

        let file_name = sanitize_upload_name(&raw_name)
            .map_err(|e| AppError::BadRequest(format!("Invalid file name: {e}")))?;
        let mime_type = field
            .content_type()
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| guess_mime_type(&file_name));

        tokio::fs::create_dir_all(spool_dir)
            .await
            .context("Failed to create spool directory")?;
        let temp_path = spool_dir.join(format!("upload-{}.part", uuid::Uuid::new_v4()));
        spool.track(temp_path.clone());

        let mut file = tokio::fs::File::create(&temp_path)
            .await
            .context("Failed to create spool file")?;

        let mut size: u64 = 0;
        let mut error_code = UPLOAD_ERR_OK;
        loop {
            match field.chunk().await {
                Ok(Some(chunk)) => {
                    file.write_all(&chunk)
                        .await
                        .context("Failed to write spool file")?;
                    size += chunk.len() as u64;
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(field = %name, error = %e, "Upload interrupted");
                    error_code = UPLOAD_ERR_PARTIAL;
                    break;
                }
            }
        }
        file.flush().await.context("Failed to flush spool file")?;

        tracing::debug!(
            field = %name,
            name = %file_name,
            size,
            "Spooled upload"
        );

        let entry = FileEntry::uploaded(temp_path, file_name, mime_type, size).with_error(error_code);
        payload.push_file(&name, entry);

        // the stream is unusable after a broken part
        if error_code != UPLOAD_ERR_OK {
            break;
        }
    }

    Ok((payload, spool))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_key_strips_array_suffix() {
        assert_eq!(field_key("filepond[]"), "filepond");
        assert_eq!(field_key("filepond"), "filepond");
    }

    #[test]
    fn guard_removes_tracked_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("upload-x.part");
        std::fs::write(&path, b"data").unwrap();

        {
            let mut guard = SpoolGuard::default();
            guard.track(path.clone());
            guard.track(dir.path().join("never-created.part"));
            assert_eq!(guard.len(), 2);
        }

        assert!(!path.exists());
    }
}
