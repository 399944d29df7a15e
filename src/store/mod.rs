//! Persistence contracts for requests, delivery records, and the stream log.
//!
//! The engine treats storage as a key-value mapping. No operation here is
//! transactional across keys: two writers updating the same request race and
//! the last write wins. A later repair re-derives the right state from the
//! provider, so the race is accepted rather than locked away.
//!
//! # Implementations
//!
//! - [`FileStore`]: one JSON file per key under a state directory, written
//!   atomically (temp file + fsync + rename + directory fsync), with a
//!   [`RequestIndex`] rebuilt on open for webhook lookups
//! - [`MemoryStore`]: in-process maps, for tests

pub mod file;
pub mod index;
pub mod memory;

use std::io;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stream::StreamLog;
use crate::types::{DeliveryId, RepoId, Request, RequestId, Sha};

pub use file::FileStore;
pub use index::RequestIndex;
pub use memory::MemoryStore;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Key is unsafe to use as a file name.
    #[error("invalid key: contains unsafe characters: {0:?}")]
    InvalidKey(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Marker that a webhook delivery has been fully processed.
///
/// Records are permanent: idempotency never expires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub delivery_id: DeliveryId,
    pub request_id: RequestId,
    pub processed_at: DateTime<Utc>,
}

/// Request snapshots keyed by id.
pub trait RequestStore: Send + Sync {
    fn get(&self, id: &RequestId) -> Result<Option<Request>>;

    /// Replaces the stored snapshot (last writer wins).
    fn put(&self, request: &Request) -> Result<()>;

    /// All readable stored requests, in no particular order.
    fn list(&self) -> Result<Vec<Request>>;

    /// Requests on `repo` whose branch is `branch` or whose merge commit is
    /// `head_sha`. May return extra candidates; never misses a match.
    fn find_candidates(
        &self,
        repo: &RepoId,
        branch: Option<&str>,
        head_sha: Option<&Sha>,
    ) -> Result<Vec<Request>>;
}

/// Idempotency markers keyed by delivery id.
pub trait DeliveryStore: Send + Sync {
    /// True if a record exists for the delivery.
    fn head(&self, id: &DeliveryId) -> Result<bool>;

    fn put(&self, record: &DeliveryRecord) -> Result<()>;
}

/// Durable copy of the stream log, so sequence numbers survive restarts.
pub trait StreamStore: Send + Sync {
    fn load_stream(&self) -> Result<Option<StreamLog>>;

    fn save_stream(&self, log: &StreamLog) -> Result<()>;
}

/// Validates that a key is safe to use as a file name.
///
/// A key is unsafe if it:
/// - Is empty
/// - Contains path separators (`/` or `\`) or null bytes
/// - Starts with a dot (hidden file, `.` or `..`)
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty()
        || key.contains('/')
        || key.contains('\\')
        || key.contains('\0')
        || key.starts_with('.')
    {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_keys() {
        validate_key("550e8400-e29b-41d4-a716-446655440000").unwrap();
        validate_key("k7mx2q9pzr4t").unwrap();
    }

    #[test]
    fn rejects_unsafe_keys() {
        for key in ["", "a/b", "a\\b", "a\0b", ".hidden", "..", "."] {
            assert!(
                matches!(validate_key(key), Err(StoreError::InvalidKey(_))),
                "{key:?} should be rejected"
            );
        }
    }
}
