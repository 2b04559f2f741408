use crate::error::StorageError;
use crate::owner::OwnerId;
use crate::pipeline::DeletionStream;
use crate::shortcode::ShortCode;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// A stored URL mapping.
///
/// Records are never physically removed; deletion only flips `deleted`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRecord {
    /// Opaque identifier assigned when the record was created.
    pub id: Uuid,
    /// The short code, unique across live and deleted records.
    pub code: ShortCode,
    /// The original URL that was shortened.
    pub original_url: String,
    /// The user that created the mapping.
    pub owner: OwnerId,
    /// Tombstone flag.
    pub deleted: bool,
}

impl UrlRecord {
    /// Creates a live record with a freshly generated identifier.
    pub fn new(code: ShortCode, original_url: impl Into<String>, owner: OwnerId) -> Self {
        Self {
            id: Uuid::new_v4(),
            code,
            original_url: original_url.into(),
            owner,
            deleted: false,
        }
    }
}

/// One already-coded row of a batch insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    pub code: ShortCode,
    pub original_url: String,
}

/// Aggregate counts over live records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    /// Number of non-deleted records.
    pub urls: u64,
    /// Number of distinct owners among non-deleted records.
    pub users: u64,
}

/// The storage contract shared by every backend.
///
/// Every method is a future; dropping it before completion cancels the
/// operation without committing anything the backend has not already made
/// durable. A write dropped after it reached the backend may still commit
/// in full, so a caller that timed out cannot assume nothing was stored.
/// Retrying is safe: a repeated insert reports `Conflict`.
#[async_trait]
pub trait UrlStore: Send + Sync + 'static {
    /// Inserts one record.
    ///
    /// Returns `Err(Conflict)` if the code already exists, whether or not the
    /// existing record is deleted and regardless of its owner.
    async fn add(&self, code: &ShortCode, original_url: &str, owner: OwnerId) -> Result<()>;

    /// Retrieves the record for a code, including deleted ones.
    ///
    /// Returns `Err(NotFound)` only if the code was never stored. Callers
    /// check [`UrlRecord::deleted`] themselves.
    async fn get(&self, code: &ShortCode) -> Result<UrlRecord>;

    /// Inserts all entries for one owner atomically: either every entry is
    /// stored or none is.
    async fn add_batch(&self, entries: &[BatchEntry], owner: OwnerId) -> Result<()>;

    /// Returns every non-deleted record created by `owner`, in no particular
    /// order. An owner with no records yields an empty vector.
    async fn owned_urls(&self, owner: OwnerId) -> Result<Vec<UrlRecord>>;

    /// Drains `requests` until the producer closes it, tombstoning each
    /// code that exists and is owned by the requesting user. Requests for
    /// unknown or foreign codes are ignored.
    async fn mark_deleted(&self, requests: DeletionStream) -> Result<()>;

    /// Counts live records and their distinct owners.
    async fn stats(&self) -> Result<Stats>;

    /// Verifies the backend is reachable.
    async fn health_check(&self) -> Result<()>;
}
