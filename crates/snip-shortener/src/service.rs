use async_trait::async_trait;
use snip_core::{
    BatchEntry, BatchItem, BatchResult, CreateOutcome, DeletionStream, OwnedUrl, OwnerId,
    ShortCode, Shortener, ShortenerError, Stats, StorageError, UrlRecord, UrlStore,
};
use snip_generator::Generator;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_DELETION_CAPACITY: usize = 64;

/// Settings for a [`ShortenerService`].
#[derive(Debug, Clone, TypedBuilder)]
pub struct ServiceSettings {
    /// Public prefix of short URLs.
    #[builder(default = DEFAULT_BASE_URL.to_string(), setter(into))]
    pub base_url: String,
    /// Deadline applied to every storage call.
    #[builder(default = DEFAULT_OPERATION_TIMEOUT)]
    pub operation_timeout: Duration,
    /// Capacity of the channel feeding deletion requests to the store.
    #[builder(default = DEFAULT_DELETION_CAPACITY)]
    pub deletion_capacity: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// A concrete implementation of the `Shortener` trait.
///
/// This service wraps a `UrlStore` and a `Generator` to handle:
/// - Content-addressed code generation
/// - Treating a conflicting create as "already shortened"
/// - Per-operation deadlines
/// - Shaping short URLs with the public base URL
#[derive(Debug)]
pub struct ShortenerService<S, G> {
    store: Arc<S>,
    generator: Arc<G>,
    settings: ServiceSettings,
}

impl<S, G> Clone for ShortenerService<S, G> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            generator: Arc::clone(&self.generator),
            settings: self.settings.clone(),
        }
    }
}

impl<S: UrlStore, G: Generator> ShortenerService<S, G> {
    pub fn new(store: S, generator: G, settings: ServiceSettings) -> Self {
        Self {
            store: Arc::new(store),
            generator: Arc::new(generator),
            settings,
        }
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    /// Runs a storage call under the configured deadline. An expired call is
    /// dropped, which cancels it in the backend.
    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, StorageError>>,
    ) -> Result<T, ShortenerError> {
        let timeout = self.settings.operation_timeout;
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result.map_err(ShortenerError::from),
            Err(_) => {
                warn!(operation, ?timeout, "storage operation timed out");
                Err(ShortenerError::Timeout(format!(
                    "{operation} did not complete within {timeout:?}"
                )))
            }
        }
    }
}

#[async_trait]
impl<S: UrlStore, G: Generator> Shortener for ShortenerService<S, G> {
    async fn create_short(
        &self,
        original_url: &str,
        owner: OwnerId,
    ) -> Result<CreateOutcome, ShortenerError> {
        let code = self.generator.generate(original_url)?;

        match self
            .bounded("add", self.store.add(&code, original_url, owner))
            .await
        {
            Ok(()) => {
                info!(code = %code, owner = %owner, "created short url");
                Ok(CreateOutcome::Created(code))
            }
            Err(ShortenerError::Conflict(_)) => {
                debug!(code = %code, "short url already exists");
                Ok(CreateOutcome::Existing(code))
            }
            Err(err) => Err(err),
        }
    }

    async fn create_batch(
        &self,
        items: Vec<BatchItem>,
        owner: OwnerId,
    ) -> Result<Vec<BatchResult>, ShortenerError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::with_capacity(items.len());
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let code = self.generator.generate(&item.original_url)?;
            entries.push(BatchEntry {
                code: code.clone(),
                original_url: item.original_url,
            });
            results.push(BatchResult {
                correlation_id: item.correlation_id,
                code,
            });
        }

        self.bounded("add_batch", self.store.add_batch(&entries, owner))
            .await?;

        info!(owner = %owner, count = results.len(), "created short url batch");
        Ok(results)
    }

    async fn expand(&self, code: &ShortCode) -> Result<UrlRecord, ShortenerError> {
        let record = self.bounded("get", self.store.get(code)).await?;

        if record.deleted {
            debug!(code = %code, "short url has been deleted");
            return Err(ShortenerError::Gone(code.to_string()));
        }

        Ok(record)
    }

    async fn list_owned(&self, owner: OwnerId) -> Result<Vec<OwnedUrl>, ShortenerError> {
        let records = self
            .bounded("owned_urls", self.store.owned_urls(owner))
            .await?;

        Ok(records
            .into_iter()
            .map(|record| OwnedUrl {
                short_url: self.short_url(&record.code),
                original_url: record.original_url,
            })
            .collect())
    }

    async fn delete_owned(
        &self,
        owner: OwnerId,
        codes: Vec<ShortCode>,
    ) -> Result<(), ShortenerError> {
        if codes.is_empty() {
            return Ok(());
        }

        let count = codes.len();
        let requests = DeletionStream::submit(owner, codes, self.settings.deletion_capacity);
        self.bounded("mark_deleted", self.store.mark_deleted(requests))
            .await?;

        info!(owner = %owner, count, "processed deletion requests");
        Ok(())
    }

    async fn stats(&self) -> Result<Stats, ShortenerError> {
        self.bounded("stats", self.store.stats()).await
    }

    async fn health_check(&self) -> Result<(), ShortenerError> {
        self.bounded("health_check", self.store.health_check())
            .await
    }

    fn short_url(&self, code: &ShortCode) -> String {
        code.to_url(&self.settings.base_url)
    }
}
