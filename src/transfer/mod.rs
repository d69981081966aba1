pub mod encoded;
pub mod entry;
pub mod id;
pub mod manager;
pub mod model;
pub mod post;

pub use entry::{FileEntry, FileSource};
pub use id::{is_valid_transfer_id, CounterDispenser, IdDispenser};
pub use manager::{CommitOutcome, LoadedFile, TransferError, TransferManager};
pub use model::{Transfer, TransferLookup};
pub use post::{Post, PostFormat, RequestPayload};
