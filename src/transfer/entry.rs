use std::path::PathBuf;

use crate::storage::ObjectMeta;

/// Upload error codes as reported by the multipart intake.
pub const UPLOAD_ERR_OK: u32 = 0;
pub const UPLOAD_ERR_PARTIAL: u32 = 3;
pub const UPLOAD_ERR_NO_FILE: u32 = 4;

/// Where a file's bytes currently live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSource {
    /// Spooled upload on local disk, owned by the current request.
    Uploaded(PathBuf),
    /// Key on the manager's current backend.
    Stored(String),
}

/// One physical file, in flight or at rest.
///
/// `name` is always a single path component; the intake and the backend
/// listing are the only places entries are built from external input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub source: FileSource,
    pub name: String,
    pub mime_type: String,
    pub length: u64,
    pub error_code: u32,
}

impl FileEntry {
    pub fn uploaded(
        temp_path: impl Into<PathBuf>,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        length: u64,
    ) -> Self {
        Self {
            source: FileSource::Uploaded(temp_path.into()),
            name: name.into(),
            mime_type: mime_type.into(),
            length,
            error_code: UPLOAD_ERR_OK,
        }
    }

    /// Entry for an object already resident on a backend.
    pub fn from_object(meta: ObjectMeta) -> Self {
        Self {
            source: FileSource::Stored(meta.path),
            name: meta.basename,
            mime_type: meta.mime_type,
            length: meta.size,
            error_code: UPLOAD_ERR_OK,
        }
    }

    pub fn with_error(mut self, error_code: u32) -> Self {
        self.error_code = error_code;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.error_code == UPLOAD_ERR_OK
    }

    pub fn is_uploaded(&self) -> bool {
        matches!(self.source, FileSource::Uploaded(_))
    }
}
