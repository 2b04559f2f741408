use async_trait::async_trait;
use snip_core::store::Result;
use snip_core::{
    BatchEntry, DeletionStream, OwnerId, ShortCode, Stats, StorageError, UrlRecord, UrlStore,
};
use sqlx::mysql::{MySqlPoolOptions, MySqlRow};
use sqlx::{Connection, MySqlPool, Row};
use tracing::{debug, info, trace};
use uuid::Uuid;

const SCHEMA: &str = include_str!("../ddl/mysql/urls.sql");

const INSERT_URL: &str = r#"
    INSERT INTO urls (uuid, short_url, original_url, user_id)
    VALUES (?, ?, ?, ?)
"#;

const MARK_DELETED: &str = r#"
    UPDATE urls
    SET is_deleted = TRUE
    WHERE user_id = ?
      AND short_url = ?
"#;

/// MySQL implementation of the storage contract.
///
/// Rows live in the `urls` table, unique on `short_url` and indexed on
/// `user_id`. Deletion flips `is_deleted`; rows are never removed, so a code
/// is never reused. Concurrent writers are arbitrated by the unique
/// constraint alone.
#[derive(Debug, Clone)]
pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    /// Creates a store from an existing MySQL connection pool.
    ///
    /// The schema is expected to exist; see [`MySqlStore::ensure_schema`].
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Opens a new connection pool and creates the schema if needed.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .connect(database_url)
            .await
            .map_err(map_sqlx_error)?;
        let store = Self::new(pool);
        store.ensure_schema().await?;
        info!("connected to mysql store");
        Ok(store)
    }

    /// Creates the `urls` table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(sqlx::error::DatabaseError::is_unique_violation)
}

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    let message = err.to_string();

    match err {
        sqlx::Error::PoolTimedOut => StorageError::Timeout(message),
        sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StorageError::Unavailable(message),
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound => StorageError::InvalidData(message),
        _ => StorageError::Query(message),
    }
}

fn map_insert_error(code: &ShortCode, err: sqlx::Error) -> StorageError {
    if is_unique_violation(&err) {
        StorageError::Conflict(code.to_string())
    } else {
        map_sqlx_error(err)
    }
}

fn parse_uuid(column: &str, value: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| StorageError::InvalidData(format!("invalid {column} '{value}': {e}")))
}

fn record_from_row(row: &MySqlRow) -> Result<UrlRecord> {
    let id: String = row.try_get("uuid").map_err(map_sqlx_error)?;
    let code: String = row.try_get("short_url").map_err(map_sqlx_error)?;
    let original_url: String = row.try_get("original_url").map_err(map_sqlx_error)?;
    let owner: String = row.try_get("user_id").map_err(map_sqlx_error)?;
    let deleted: bool = row.try_get("is_deleted").map_err(map_sqlx_error)?;

    Ok(UrlRecord {
        id: parse_uuid("uuid", &id)?,
        code: ShortCode::new_unchecked(code),
        original_url,
        owner: OwnerId::new(parse_uuid("user_id", &owner)?),
        deleted,
    })
}

async fn count(pool: &MySqlPool, query: &str) -> Result<u64> {
    let row = sqlx::query(query)
        .fetch_one(pool)
        .await
        .map_err(map_sqlx_error)?;
    let value: i64 = row.try_get(0).map_err(map_sqlx_error)?;
    u64::try_from(value).map_err(|e| StorageError::InvalidData(format!("negative count: {e}")))
}

#[async_trait]
impl UrlStore for MySqlStore {
    async fn add(&self, code: &ShortCode, original_url: &str, owner: OwnerId) -> Result<()> {
        sqlx::query(INSERT_URL)
            .bind(Uuid::new_v4().to_string())
            .bind(code.as_str())
            .bind(original_url)
            .bind(owner.to_string())
            .execute(&self.pool)
            .await
            .map_err(|err| map_insert_error(code, err))?;

        debug!(code = %code, owner = %owner, "added url");
        Ok(())
    }

    async fn get(&self, code: &ShortCode) -> Result<UrlRecord> {
        let row = sqlx::query(
            r#"
            SELECT uuid, short_url, original_url, user_id, is_deleted
            FROM urls
            WHERE short_url = ?
            LIMIT 1
            "#,
        )
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            return Err(StorageError::NotFound(code.to_string()));
        };

        record_from_row(&row)
    }

    async fn add_batch(&self, entries: &[BatchEntry], owner: OwnerId) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        // Dropping `tx` without committing rolls the whole batch back. The
        // same statement text is prepared once on the transaction's
        // connection and reused for every row.
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        for entry in entries {
            sqlx::query(INSERT_URL)
                .bind(Uuid::new_v4().to_string())
                .bind(entry.code.as_str())
                .bind(entry.original_url.as_str())
                .bind(owner.to_string())
                .execute(&mut *tx)
                .await
                .map_err(|err| map_insert_error(&entry.code, err))?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;

        debug!(owner = %owner, count = entries.len(), "added url batch");
        Ok(())
    }

    async fn owned_urls(&self, owner: OwnerId) -> Result<Vec<UrlRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT uuid, short_url, original_url, user_id, is_deleted
            FROM urls
            WHERE user_id = ?
              AND is_deleted = FALSE
            "#,
        )
        .bind(owner.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(record_from_row).collect()
    }

    async fn mark_deleted(&self, mut requests: DeletionStream) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let mut affected = 0;

        while let Some(request) = requests.next().await {
            let result = sqlx::query(MARK_DELETED)
                .bind(request.owner.to_string())
                .bind(request.code.as_str())
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;

            trace!(
                code = %request.code,
                owner = %request.owner,
                rows = result.rows_affected(),
                "applied deletion request"
            );
            affected += result.rows_affected();
        }

        tx.commit().await.map_err(map_sqlx_error)?;

        debug!(affected, "marked urls deleted");
        Ok(())
    }

    async fn stats(&self) -> Result<Stats> {
        let urls = count(
            &self.pool,
            "SELECT COUNT(*) FROM urls WHERE is_deleted = FALSE",
        )
        .await?;
        let users = count(
            &self.pool,
            "SELECT COUNT(DISTINCT user_id) FROM urls WHERE is_deleted = FALSE",
        )
        .await?;

        Ok(Stats { urls, users })
    }

    async fn health_check(&self) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        conn.ping()
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))
    }
}
