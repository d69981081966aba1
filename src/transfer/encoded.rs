//! Base64-encoded file objects submitted as plain form values.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::Deserialize;
use thiserror::Error;

use super::manager::is_reserved_name;
use crate::storage::guess_mime_type;
use crate::utils::security::{sanitize_upload_name, PathValidationError};

#[derive(Debug, Error)]
pub enum EncodedFileError {
    #[error("malformed encoded file object: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid file name: {0}")]
    Name(#[from] PathValidationError),

    #[error("'{0}' is a reserved file name")]
    ReservedName(String),
}

#[derive(Debug, Deserialize)]
struct RawEncodedFile {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default, rename = "type")]
    mime_type: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    metadata: serde_json::Map<String, serde_json::Value>,
    data: String,
}

#[derive(Debug, Clone)]
pub struct EncodedFile {
    pub id: Option<String>,
    pub name: String,
    pub mime_type: String,
    /// Declared size. The decoded length is authoritative.
    pub declared_size: Option<u64>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub contents: Bytes,
}

impl EncodedFile {
    pub fn decode(raw: &str) -> Result<Self, EncodedFileError> {
        let parsed: RawEncodedFile = serde_json::from_str(raw)?;
        let name = sanitize_upload_name(&parsed.name)?;
        if is_reserved_name(&name) {
            return Err(EncodedFileError::ReservedName(name));
        }

        // data URLs carry their own prefix
        let data = match parsed.data.split_once(";base64,") {
            Some((prefix, rest)) if prefix.starts_with("data:") => rest,
            _ => parsed.data.as_str(),
        };
        let contents = STANDARD.decode(data.trim())?;

        let mime_type = parsed
            .mime_type
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| guess_mime_type(&name));

        Ok(Self {
            id: parsed.id,
            name,
            mime_type,
            declared_size: parsed.size,
            metadata: parsed.metadata,
            contents: Bytes::from(contents),
        })
    }

    pub fn len(&self) -> u64 {
        self.contents.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }
}
