use serde_json::{Map, Value};

use super::entry::FileEntry;
use super::id::IdDispenser;
use super::post::RequestPayload;

pub type Metadata = Map<String, Value>;

/// The unit staged under one id: a primary file, variants, free-form metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    id: String,
    primary: Option<FileEntry>,
    variants: Vec<FileEntry>,
    metadata: Metadata,
}

impl Transfer {
    /// Empty transfer under `id`. No validation: fresh ids come from a
    /// dispenser, restored ids are checked by the manager before lookup.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            primary: None,
            variants: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    pub fn dispense(dispenser: &dyn IdDispenser) -> Self {
        Self::new(dispenser.dispense())
    }

    /// Fill from one submitted field: its file parts become the primary and
    /// variants, its first plain value (if a JSON object) the metadata.
    pub fn populate(&mut self, payload: &RequestPayload, field: &str) {
        let mut files = payload.files(field).iter().cloned();
        self.primary = files.next();
        self.variants = files.collect();

        self.metadata = payload
            .values(field)
            .first()
            .and_then(|raw| match serde_json::from_str(raw) {
                Ok(Value::Object(map)) => Some(map),
                _ => None,
            })
            .unwrap_or_default();
    }

    pub fn restore(&mut self, primary: FileEntry, variants: Vec<FileEntry>, metadata: Metadata) {
        self.primary = Some(primary);
        self.variants = variants;
        self.metadata = metadata;
    }

    pub fn with_primary(mut self, primary: FileEntry) -> Self {
        self.primary = Some(primary);
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    //-- Accessors
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn primary(&self) -> Option<&FileEntry> {
        self.primary.as_ref()
    }

    pub fn variants(&self) -> &[FileEntry] {
        &self.variants
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Primary first, then variants.
    pub fn files(&self) -> Vec<&FileEntry> {
        self.primary.iter().chain(self.variants.iter()).collect()
    }
}

/// Outcome of looking a staged transfer up by id.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferLookup {
    Found(Transfer),
    NotFound,
    /// Malformed id. Storage was never consulted.
    Invalid,
}

impl TransferLookup {
    pub fn found(self) -> Option<Transfer> {
        match self {
            TransferLookup::Found(transfer) => Some(transfer),
            _ => None,
        }
    }
}
