use crate::owner::OwnerId;
use crate::shortcode::ShortCode;
use crate::store::{Stats, UrlRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

type Result<T> = std::result::Result<T, crate::error::ShortenerError>;

/// Result of creating a single short URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// A new record was stored under this code.
    Created(ShortCode),
    /// A record with this code already existed. Codes are derived from the
    /// URL, so this is still the right code for it.
    Existing(ShortCode),
}

impl CreateOutcome {
    pub fn code(&self) -> &ShortCode {
        match self {
            CreateOutcome::Created(code) | CreateOutcome::Existing(code) => code,
        }
    }

    /// Whether the create collided with an existing record.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CreateOutcome::Existing(_))
    }
}

/// One URL of a batch create, tagged with a caller-chosen correlation token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    pub correlation_id: String,
    pub original_url: String,
}

/// The code assigned to a [`BatchItem`], keyed by its correlation token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub correlation_id: String,
    pub code: ShortCode,
}

/// A live mapping owned by a user, shaped for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnedUrl {
    pub short_url: String,
    pub original_url: String,
}

/// The operations transport handlers call.
#[async_trait]
pub trait Shortener: Send + Sync + 'static {
    /// Shortens `original_url` for `owner`.
    async fn create_short(&self, original_url: &str, owner: OwnerId) -> Result<CreateOutcome>;

    /// Shortens every item as one atomic unit.
    async fn create_batch(&self, items: Vec<BatchItem>, owner: OwnerId)
        -> Result<Vec<BatchResult>>;

    /// Resolves a code to its live record. Deleted records yield `Gone`.
    async fn expand(&self, code: &ShortCode) -> Result<UrlRecord>;

    /// Lists the live mappings created by `owner`.
    async fn list_owned(&self, owner: OwnerId) -> Result<Vec<OwnedUrl>>;

    /// Tombstones the given codes where `owner` created them. Returns once
    /// every request has been applied.
    async fn delete_owned(&self, owner: OwnerId, codes: Vec<ShortCode>) -> Result<()>;

    async fn stats(&self) -> Result<Stats>;

    async fn health_check(&self) -> Result<()>;

    /// Formats the public URL for a code.
    fn short_url(&self, code: &ShortCode) -> String;
}
