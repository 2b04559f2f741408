use thiserror::Error;

/// Errors related to the core domain types of the URL shortener.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("invalid short code: {0}")]
    InvalidShortCode(String),
}

/// Errors produced while deriving a short code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeneratorError {
    #[error("cannot generate a short code for an empty url")]
    EmptyInput,
}

/// Errors surfaced by a [`UrlStore`](crate::store::UrlStore) backend.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("short code already exists: {0}")]
    Conflict(String),
    #[error("short code not found: {0}")]
    NotFound(String),
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage operation timed out: {0}")]
    Timeout(String),
    #[error("storage query failed: {0}")]
    Query(String),
    #[error("stored data is invalid: {0}")]
    InvalidData(String),
    #[error("storage io failed: {0}")]
    Io(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

/// Errors returned by a [`Shortener`](crate::shortener::Shortener).
///
/// A conflicting single create is not an error at this layer, see
/// [`CreateOutcome::Existing`](crate::shortener::CreateOutcome::Existing).
/// A conflicting batch is, since none of its items were stored.
#[derive(Debug, Clone, Error)]
pub enum ShortenerError {
    #[error("url cannot be empty")]
    EmptyInput,
    #[error("invalid short code: {0}")]
    InvalidShortCode(String),
    #[error("short code already exists: {0}")]
    Conflict(String),
    #[error("short code not found: {0}")]
    NotFound(String),
    #[error("short code has been deleted: {0}")]
    Gone(String),
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("operation timed out: {0}")]
    Timeout(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<CoreError> for ShortenerError {
    fn from(value: CoreError) -> Self {
        match value {
            CoreError::InvalidShortCode(message) => Self::InvalidShortCode(message),
        }
    }
}

impl From<GeneratorError> for ShortenerError {
    fn from(value: GeneratorError) -> Self {
        match value {
            GeneratorError::EmptyInput => Self::EmptyInput,
        }
    }
}

impl From<StorageError> for ShortenerError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::Conflict(code) => Self::Conflict(code),
            StorageError::NotFound(code) => Self::NotFound(code),
            StorageError::Unavailable(message) => Self::Unavailable(message),
            StorageError::Timeout(message) => Self::Timeout(message),
            other => Self::Storage(other.to_string()),
        }
    }
}
