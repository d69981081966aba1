//! Classification of submitted form fields.
//!
//! The request payload is an explicit, immutable value built once by the HTTP
//! intake. Nothing in here reads request state on its own, so the classifier
//! is a pure function of the payload.

use std::fmt;

use super::entry::FileEntry;

/// Every named field from one request, in submission order.
#[derive(Debug, Clone, Default)]
pub struct RequestPayload {
    files: Vec<(String, Vec<FileEntry>)>,
    fields: Vec<(String, Vec<String>)>,
    order: Vec<String>,
}

impl RequestPayload {
    pub fn new() -> Self {
        Self::default()
    }

    fn touch(&mut self, name: &str) {
        if !self.order.iter().any(|n| n == name) {
            self.order.push(name.to_string());
        }
    }

    pub fn push_file(&mut self, name: &str, entry: FileEntry) {
        self.touch(name);
        match self.files.iter_mut().find(|(n, _)| n == name) {
            Some((_, entries)) => entries.push(entry),
            None => self.files.push((name.to_string(), vec![entry])),
        }
    }

    pub fn push_value(&mut self, name: &str, value: impl Into<String>) {
        self.touch(name);
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| n == name) {
            Some((_, values)) => values.push(value),
            None => self.fields.push((name.to_string(), vec![value])),
        }
    }

    pub fn with_file(mut self, name: &str, entry: FileEntry) -> Self {
        self.push_file(name, entry);
        self
    }

    pub fn with_value(mut self, name: &str, value: impl Into<String>) -> Self {
        self.push_value(name, value);
        self
    }

    /// Distinct field names, first appearance first.
    pub fn field_names(&self) -> &[String] {
        &self.order
    }

    pub fn files(&self, name: &str) -> &[FileEntry] {
        self.files
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, entries)| entries.as_slice())
            .unwrap_or(&[])
    }

    pub fn values(&self, name: &str) -> &[String] {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.order.iter().any(|n| n == name)
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostFormat {
    FileObjects,
    EncodedFileObjects,
    TransferIds,
}

impl fmt::Display for PostFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PostFormat::FileObjects => "FILE_OBJECTS",
            PostFormat::EncodedFileObjects => "BASE64_ENCODED_FILE_OBJECTS",
            PostFormat::TransferIds => "TRANSFER_IDS",
        };
        f.write_str(name)
    }
}

/// One classified field. The shape of the values follows the format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Post {
    FileObjects(Vec<FileEntry>),
    /// Raw JSON documents, see [`super::encoded::EncodedFile`].
    EncodedFiles(Vec<String>),
    TransferIds(Vec<String>),
}

impl Post {
    /// Classify field `name`. `None` when the field was not submitted.
    ///
    /// Uploaded parts win over plain values of the same name. Plain values
    /// are encoded file objects when the first one decodes to a JSON object,
    /// otherwise transfer ids.
    pub fn classify(payload: &RequestPayload, name: &str) -> Option<Post> {
        let files = payload.files(name);
        if !files.is_empty() {
            return Some(Post::FileObjects(files.to_vec()));
        }

        let values = payload.values(name);
        let first = values.first()?;
        if is_encoded_file(first) {
            Some(Post::EncodedFiles(values.to_vec()))
        } else {
            Some(Post::TransferIds(values.to_vec()))
        }
    }

    pub fn format(&self) -> PostFormat {
        match self {
            Post::FileObjects(_) => PostFormat::FileObjects,
            Post::EncodedFiles(_) => PostFormat::EncodedFileObjects,
            Post::TransferIds(_) => PostFormat::TransferIds,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Post::FileObjects(files) => files.len(),
            Post::EncodedFiles(values) | Post::TransferIds(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn is_encoded_file(value: &str) -> bool {
    matches!(
        serde_json::from_str::<serde_json::Value>(value),
        Ok(serde_json::Value::Object(_))
    )
}
