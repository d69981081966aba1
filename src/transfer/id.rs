//! Transfer identifiers: 32 hex characters, dispensed per upload.

use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub const TRANSFER_ID_LEN: usize = 32;

/// True iff `id` is exactly 32 ASCII hex digits.
///
/// This is the guard in front of every storage path built from client input.
pub fn is_valid_transfer_id(id: &str) -> bool {
    id.len() == TRANSFER_ID_LEN && id.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Source of fresh transfer ids.
pub trait IdDispenser: Send + Sync + fmt::Debug {
    fn dispense(&self) -> String;
}

/// Hashes an in-process counter with a wall-clock salt and a per-process
/// random salt. Unique among live transfers, not across all time.
#[derive(Debug)]
pub struct CounterDispenser {
    counter: AtomicU64,
    salt: u64,
}

impl CounterDispenser {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
            salt: rand::random(),
        }
    }
}

impl Default for CounterDispenser {
    fn default() -> Self {
        Self::new()
    }
}

impl IdDispenser for CounterDispenser {
    fn dispense(&self) -> String {
        let count = self.counter.fetch_add(1, Ordering::Relaxed);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(count.to_le_bytes());
        hasher.update(nanos.to_le_bytes());
        hasher.update(self.salt.to_le_bytes());

        hex::encode(hasher.finalize())[..TRANSFER_ID_LEN].to_string()
    }
}
