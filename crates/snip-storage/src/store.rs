//! Backend selection.
//!
//! [`Store`] is the single handle the rest of the system holds. Which
//! backend it wraps is decided once, from a [`StoreConfig`], when the store
//! is opened.

use crate::file::FileStore;
use crate::mysql::MySqlStore;
use async_trait::async_trait;
use snip_core::store::Result;
use snip_core::{BatchEntry, DeletionStream, OwnerId, ShortCode, Stats, UrlRecord, UrlStore};
use std::path::PathBuf;
use tracing::info;

/// Which backend to open and where it lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    /// Append-only log at `path`, or memory only when `path` is `None`.
    File { path: Option<PathBuf> },
    /// MySQL reachable through `dsn`.
    Relational { dsn: String },
}

/// Storage configuration handed to [`Store::open`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub backend: BackendConfig,
}

impl StoreConfig {
    pub fn new(backend: BackendConfig) -> Self {
        Self { backend }
    }

    /// Builds a configuration from optional settings: a non-empty DSN
    /// selects MySQL, otherwise the file backend is used with `file_path`
    /// (empty or absent meaning memory only).
    pub fn from_settings(file_path: Option<PathBuf>, dsn: Option<String>) -> Self {
        let backend = match dsn.filter(|dsn| !dsn.trim().is_empty()) {
            Some(dsn) => BackendConfig::Relational { dsn },
            None => BackendConfig::File {
                path: file_path.filter(|path| !path.as_os_str().is_empty()),
            },
        };
        Self { backend }
    }

    /// A memory-only file backend.
    pub fn in_memory() -> Self {
        Self::new(BackendConfig::File { path: None })
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// The storage backend chosen at startup.
#[derive(Debug)]
pub enum Store {
    File(FileStore),
    MySql(MySqlStore),
}

impl Store {
    /// Opens the backend described by `config`.
    pub async fn open(config: &StoreConfig) -> Result<Self> {
        let store = match &config.backend {
            BackendConfig::File { path: None } => Store::File(FileStore::in_memory()),
            BackendConfig::File { path: Some(path) } => Store::File(FileStore::open(path).await?),
            BackendConfig::Relational { dsn } => Store::MySql(MySqlStore::connect(dsn).await?),
        };

        info!(backend = store.kind(), "storage backend ready");
        Ok(store)
    }

    /// A short name for the active backend.
    pub fn kind(&self) -> &'static str {
        match self {
            Store::File(store) if store.path().is_some() => "file",
            Store::File(_) => "memory",
            Store::MySql(_) => "mysql",
        }
    }
}

impl From<FileStore> for Store {
    fn from(store: FileStore) -> Self {
        Store::File(store)
    }
}

impl From<MySqlStore> for Store {
    fn from(store: MySqlStore) -> Self {
        Store::MySql(store)
    }
}

#[async_trait]
impl UrlStore for Store {
    async fn add(&self, code: &ShortCode, original_url: &str, owner: OwnerId) -> Result<()> {
        match self {
            Store::File(s) => s.add(code, original_url, owner).await,
            Store::MySql(s) => s.add(code, original_url, owner).await,
        }
    }

    async fn get(&self, code: &ShortCode) -> Result<UrlRecord> {
        match self {
            Store::File(s) => s.get(code).await,
            Store::MySql(s) => s.get(code).await,
        }
    }

    async fn add_batch(&self, entries: &[BatchEntry], owner: OwnerId) -> Result<()> {
        match self {
            Store::File(s) => s.add_batch(entries, owner).await,
            Store::MySql(s) => s.add_batch(entries, owner).await,
        }
    }

    async fn owned_urls(&self, owner: OwnerId) -> Result<Vec<UrlRecord>> {
        match self {
            Store::File(s) => s.owned_urls(owner).await,
            Store::MySql(s) => s.owned_urls(owner).await,
        }
    }

    async fn mark_deleted(&self, requests: DeletionStream) -> Result<()> {
        match self {
            Store::File(s) => s.mark_deleted(requests).await,
            Store::MySql(s) => s.mark_deleted(requests).await,
        }
    }

    async fn stats(&self) -> Result<Stats> {
        match self {
            Store::File(s) => s.stats().await,
            Store::MySql(s) => s.stats().await,
        }
    }

    async fn health_check(&self) -> Result<()> {
        match self {
            Store::File(s) => s.health_check().await,
            Store::MySql(s) => s.health_check().await,
        }
    }
}
