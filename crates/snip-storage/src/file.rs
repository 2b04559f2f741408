use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snip_core::store::Result;
use snip_core::{
    BatchEntry, DeletionStream, OwnerId, ShortCode, Stats, StorageError, UrlRecord, UrlStore,
};
use std::collections::{HashMap, HashSet};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// One record as stored in the log.
///
/// `user_id` and `is_deleted` are optional so that logs holding only
/// `{uuid, short_url, original_url}` still load.
#[derive(Debug, Serialize, Deserialize)]
struct LogLine {
    uuid: Uuid,
    short_url: String,
    original_url: String,
    #[serde(default)]
    user_id: OwnerId,
    #[serde(default)]
    is_deleted: bool,
}

impl From<&UrlRecord> for LogLine {
    fn from(record: &UrlRecord) -> Self {
        Self {
            uuid: record.id,
            short_url: record.code.as_str().to_owned(),
            original_url: record.original_url.clone(),
            user_id: record.owner,
            is_deleted: record.deleted,
        }
    }
}

impl From<LogLine> for UrlRecord {
    fn from(line: LogLine) -> Self {
        UrlRecord {
            id: line.uuid,
            code: ShortCode::new_unchecked(line.short_url),
            original_url: line.original_url,
            owner: line.user_id,
            deleted: line.is_deleted,
        }
    }
}

/// One line of the log. Every append is exactly one line, so a group of
/// records written together is replayed completely or not at all.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum LogEntry {
    Batch { batch: Vec<LogLine> },
    Single(LogLine),
}

impl LogEntry {
    fn from_records(records: &[UrlRecord]) -> Self {
        match records {
            [record] => LogEntry::Single(record.into()),
            _ => LogEntry::Batch {
                batch: records.iter().map(LogLine::from).collect(),
            },
        }
    }

    fn into_records(self) -> Vec<UrlRecord> {
        match self {
            LogEntry::Single(line) => vec![line.into()],
            LogEntry::Batch { batch } => batch.into_iter().map(UrlRecord::from).collect(),
        }
    }
}

/// The parsed contents of a log file.
#[derive(Debug, Default)]
struct Replay {
    records: Vec<UrlRecord>,
    /// Byte length of the well-formed prefix of the file.
    valid_len: u64,
    /// The last well-formed line is not newline-terminated.
    needs_newline: bool,
}

async fn read_log(path: &Path) -> Result<Replay> {
    match tokio::fs::read(path).await {
        Ok(contents) => parse_log(&contents),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(Replay::default()),
        Err(err) => Err(err.into()),
    }
}

fn parse_log(contents: &[u8]) -> Result<Replay> {
    let mut replay = Replay::default();

    for (index, chunk) in contents.split_inclusive(|b| *b == b'\n').enumerate() {
        let terminated = chunk.ends_with(b"\n");
        let line = chunk.trim_ascii();

        if line.is_empty() {
            replay.valid_len += chunk.len() as u64;
            continue;
        }

        match serde_json::from_slice::<LogEntry>(line) {
            Ok(entry) => {
                replay.records.extend(entry.into_records());
                replay.valid_len += chunk.len() as u64;
                replay.needs_newline = !terminated;
            }
            // Only the final line can lack its newline; that is a torn append.
            Err(err) if !terminated => {
                warn!(line = index + 1, error = %err, "skipping torn record at the end of the log");
            }
            Err(err) => {
                return Err(StorageError::InvalidData(format!(
                    "malformed log line {}: {err}",
                    index + 1
                )));
            }
        }
    }

    Ok(replay)
}

fn encode_entry(records: &[UrlRecord], needs_newline: bool) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    if needs_newline {
        buf.push(b'\n');
    }
    serde_json::to_writer(&mut buf, &LogEntry::from_records(records))
        .map_err(|e| StorageError::InvalidData(e.to_string()))?;
    buf.push(b'\n');
    Ok(buf)
}

/// Runs file I/O on the blocking pool. Once started the closure runs to
/// completion even if the returned future is dropped.
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Io(format!("log task failed: {e}")))?
}

/// A handle on the log holding an exclusive advisory lock, so that every
/// instance sharing the file sees one writer at a time. The lock is
/// released when the last clone of the handle is dropped.
#[derive(Debug, Clone)]
struct LockedLog {
    file: Arc<std::fs::File>,
}

impl LockedLog {
    async fn acquire(path: &Path) -> Result<Self> {
        let path = path.to_path_buf();
        blocking(move || {
            let file = std::fs::OpenOptions::new()
                .read(true)
                .append(true)
                .create(true)
                .open(&path)?;
            file.lock()?;
            Ok(Self {
                file: Arc::new(file),
            })
        })
        .await
    }

    async fn replay(&self) -> Result<Replay> {
        let file = Arc::clone(&self.file);
        blocking(move || {
            let mut reader = &*file;
            let mut contents = Vec::new();
            reader.seek(SeekFrom::Start(0))?;
            reader.read_to_end(&mut contents)?;
            parse_log(&contents)
        })
        .await
    }

    /// Writes `buf` right after the well-formed prefix and syncs it,
    /// returning the new well-formed length. Anything past `valid_len` is a
    /// torn tail, since the lock has been held since the log was replayed.
    async fn append(&self, valid_len: u64, buf: Vec<u8>) -> Result<u64> {
        let file = Arc::clone(&self.file);
        blocking(move || {
            let mut writer = &*file;
            if file.metadata()?.len() != valid_len {
                file.set_len(valid_len)?;
            }

            let written = writer
                .write_all(&buf)
                .and_then(|()| writer.flush())
                .and_then(|()| file.sync_data());
            if let Err(err) = written {
                if let Err(truncate_err) = file.set_len(valid_len) {
                    warn!(error = %truncate_err, "failed to roll back partial append");
                }
                return Err(err.into());
            }

            Ok(valid_len + buf.len() as u64)
        })
        .await
    }
}

/// In-memory view of the log.
#[derive(Debug, Default)]
struct Index {
    records: HashMap<ShortCode, UrlRecord>,
    valid_len: u64,
    needs_newline: bool,
}

impl Index {
    /// Replays records in file order, later lines overwriting earlier ones.
    fn apply(&mut self, replay: Replay) {
        for record in replay.records {
            self.records.insert(record.code.clone(), record);
        }
        self.valid_len = replay.valid_len;
        self.needs_newline = replay.needs_newline;
    }

    /// Publishes records whose log line is already durable.
    fn commit(&mut self, records: Vec<UrlRecord>, valid_len: u64) {
        for record in records {
            self.records.insert(record.code.clone(), record);
        }
        self.valid_len = valid_len;
        self.needs_newline = false;
    }

    fn live(&self) -> impl Iterator<Item = &UrlRecord> {
        self.records.values().filter(|record| !record.deleted)
    }
}

/// File-backed implementation of [`UrlStore`].
///
/// The authoritative read path is an in-memory index. When a path is
/// configured every mutation is also appended to a JSON-lines log, and every
/// operation first replays that log so that the file stays the source of
/// truth across restarts and across instances sharing it. A single lock
/// serializes the operations of one instance; writers additionally hold an
/// exclusive lock on the log file from replay to append.
///
/// Each mutation is one log line written and synced on the blocking pool.
/// A dropped operation either never starts its write or lets it finish, so
/// a batch is never partially visible. Nothing in the index changes until
/// the write has been synced.
#[derive(Debug)]
pub struct FileStore {
    path: Option<PathBuf>,
    index: Mutex<Index>,
}

impl FileStore {
    /// Creates a store that keeps everything in memory.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            index: Mutex::new(Index::default()),
        }
    }

    /// Opens a store persisted at `path`, replaying any existing log.
    ///
    /// A missing file is treated as an empty store and is created on the
    /// first write.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            path: Some(path.into()),
            index: Mutex::new(Index::default()),
        };

        {
            let mut index = store.index.lock().await;
            store.reload(&mut index).await?;
            info!(
                path = ?store.path,
                records = index.records.len(),
                "opened file store"
            );
        }

        Ok(store)
    }

    /// Returns the log path, if the store is persisted.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Brings the index up to date for a read.
    async fn reload(&self, index: &mut Index) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let replay = read_log(path).await?;
        trace!(path = %path.display(), records = replay.records.len(), "replayed log");
        index.apply(replay);
        Ok(())
    }

    /// Locks the log and brings the index up to date for a write. Returns
    /// `None` for a memory-only store.
    async fn reload_for_write(&self, index: &mut Index) -> Result<Option<LockedLog>> {
        let Some(path) = &self.path else {
            return Ok(None);
        };

        let log = LockedLog::acquire(path).await?;
        let replay = log.replay().await?;
        trace!(path = %path.display(), records = replay.records.len(), "replayed locked log");
        index.apply(replay);
        Ok(Some(log))
    }

    /// Appends `records` as one log line and returns the new well-formed
    /// length.
    async fn append(
        &self,
        log: Option<&LockedLog>,
        index: &Index,
        records: &[UrlRecord],
    ) -> Result<u64> {
        let Some(log) = log else {
            return Ok(index.valid_len);
        };

        let buf = encode_entry(records, index.needs_newline)?;
        log.append(index.valid_len, buf).await
    }
}

#[async_trait]
impl UrlStore for FileStore {
    async fn add(&self, code: &ShortCode, original_url: &str, owner: OwnerId) -> Result<()> {
        let mut index = self.index.lock().await;
        let log = self.reload_for_write(&mut index).await?;

        if index.records.contains_key(code) {
            debug!(code = %code, "short code already stored");
            return Err(StorageError::Conflict(code.to_string()));
        }

        let record = UrlRecord::new(code.clone(), original_url, owner);
        let valid_len = self
            .append(log.as_ref(), &index, std::slice::from_ref(&record))
            .await?;
        index.commit(vec![record], valid_len);

        debug!(code = %code, owner = %owner, "added url");
        Ok(())
    }

    async fn get(&self, code: &ShortCode) -> Result<UrlRecord> {
        let mut index = self.index.lock().await;
        self.reload(&mut index).await?;

        index
            .records
            .get(code)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(code.to_string()))
    }

    async fn add_batch(&self, entries: &[BatchEntry], owner: OwnerId) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut index = self.index.lock().await;
        let log = self.reload_for_write(&mut index).await?;

        let mut seen = HashSet::with_capacity(entries.len());
        for entry in entries {
            if index.records.contains_key(&entry.code) || !seen.insert(&entry.code) {
                debug!(code = %entry.code, "batch rejected on conflicting short code");
                return Err(StorageError::Conflict(entry.code.to_string()));
            }
        }

        let records: Vec<_> = entries
            .iter()
            .map(|entry| UrlRecord::new(entry.code.clone(), entry.original_url.clone(), owner))
            .collect();
        let valid_len = self.append(log.as_ref(), &index, &records).await?;
        index.commit(records, valid_len);

        debug!(owner = %owner, count = entries.len(), "added url batch");
        Ok(())
    }

    async fn owned_urls(&self, owner: OwnerId) -> Result<Vec<UrlRecord>> {
        let mut index = self.index.lock().await;
        self.reload(&mut index).await?;

        Ok(index
            .live()
            .filter(|record| record.owner == owner)
            .cloned()
            .collect())
    }

    async fn mark_deleted(&self, requests: DeletionStream) -> Result<()> {
        let requests = requests.collect().await;

        let mut index = self.index.lock().await;
        let log = self.reload_for_write(&mut index).await?;

        let mut tombstoned = HashSet::new();
        let mut tombstones = Vec::new();
        for request in requests {
            let Some(record) = index.records.get(&request.code) else {
                trace!(code = %request.code, "ignoring deletion of unknown code");
                continue;
            };
            if record.owner != request.owner || record.deleted {
                trace!(code = %request.code, owner = %request.owner, "ignoring deletion of foreign or deleted code");
                continue;
            }
            if tombstoned.insert(request.code) {
                tombstones.push(UrlRecord {
                    deleted: true,
                    ..record.clone()
                });
            }
        }

        if tombstones.is_empty() {
            return Ok(());
        }

        let valid_len = self.append(log.as_ref(), &index, &tombstones).await?;
        let count = tombstones.len();
        index.commit(tombstones, valid_len);

        debug!(count, "marked urls deleted");
        Ok(())
    }

    async fn stats(&self) -> Result<Stats> {
        let mut index = self.index.lock().await;
        self.reload(&mut index).await?;

        let urls = index.live().count() as u64;
        let users = index
            .live()
            .map(|record| record.owner)
            .collect::<HashSet<_>>()
            .len() as u64;

        Ok(Stats { urls, users })
    }

    async fn health_check(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let metadata = tokio::fs::metadata(dir).await.map_err(|e| {
            StorageError::Unavailable(format!("log directory {}: {e}", dir.display()))
        })?;
        if !metadata.is_dir() {
            return Err(StorageError::Unavailable(format!(
                "{} is not a directory",
                dir.display()
            )));
        }

        match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_dir() => Err(StorageError::Unavailable(format!(
                "{} is a directory",
                path.display()
            ))),
            Ok(_) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StorageError::Unavailable(format!(
                "log file {}: {err}",
                path.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snip_core::DeletionRequest;
    use std::time::Duration;
    use tempfile::TempDir;

    fn code(s: &str) -> ShortCode {
        ShortCode::new_unchecked(s)
    }

    fn entry(c: &str, url: &str) -> BatchEntry {
        BatchEntry {
            code: code(c),
            original_url: url.to_string(),
        }
    }

    fn deletions(owner: OwnerId, codes: &[&str]) -> DeletionStream {
        DeletionStream::submit(owner, codes.iter().map(|c| code(c)).collect(), 2)
    }

    async fn persisted(dir: &TempDir) -> FileStore {
        FileStore::open(dir.path().join("urls.jsonl")).await.unwrap()
    }

    #[tokio::test]
    async fn add_and_get() {
        let store = FileStore::in_memory();
        let owner = OwnerId::random();

        store
            .add(&code("abc12345"), "https://example.com", owner)
            .await
            .unwrap();

        let record = store.get(&code("abc12345")).await.unwrap();
        assert_eq!(record.original_url, "https://example.com");
        assert_eq!(record.owner, owner);
        assert!(!record.deleted);
    }

    #[tokio::test]
    async fn get_unknown_code_is_not_found() {
        let store = FileStore::in_memory();
        let err = store.get(&code("missing")).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(c) if c == "missing"));
    }

    #[tokio::test]
    async fn conflict_keeps_first_record() {
        let store = FileStore::in_memory();

        store
            .add(&code("abc12345"), "https://one.example", OwnerId::random())
            .await
            .unwrap();
        let err = store
            .add(&code("abc12345"), "https://two.example", OwnerId::random())
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::Conflict(_)));
        let record = store.get(&code("abc12345")).await.unwrap();
        assert_eq!(record.original_url, "https://one.example");
    }

    #[tokio::test]
    async fn deleted_codes_are_never_reused() {
        let store = FileStore::in_memory();
        let owner = OwnerId::random();

        store
            .add(&code("abc12345"), "https://example.com", owner)
            .await
            .unwrap();
        store
            .mark_deleted(deletions(owner, &["abc12345"]))
            .await
            .unwrap();

        let err = store
            .add(&code("abc12345"), "https://example.com", owner)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[tokio::test]
    async fn batch_with_one_conflict_stores_nothing() {
        let dir = TempDir::new().unwrap();
        let store = persisted(&dir).await;
        let owner = OwnerId::random();

        store
            .add(&code("taken000"), "https://taken.example", owner)
            .await
            .unwrap();

        let batch = vec![
            entry("batch001", "https://one.example"),
            entry("batch002", "https://two.example"),
            entry("taken000", "https://three.example"),
            entry("batch004", "https://four.example"),
            entry("batch005", "https://five.example"),
        ];
        let err = store.add_batch(&batch, owner).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict(c) if c == "taken000"));

        for c in ["batch001", "batch002", "batch004", "batch005"] {
            assert!(matches!(
                store.get(&code(c)).await,
                Err(StorageError::NotFound(_))
            ));
        }
        let taken = store.get(&code("taken000")).await.unwrap();
        assert_eq!(taken.original_url, "https://taken.example");
    }

    #[tokio::test]
    async fn batch_with_duplicate_codes_is_rejected() {
        let store = FileStore::in_memory();

        let batch = vec![
            entry("dup00000", "https://one.example"),
            entry("dup00000", "https://two.example"),
        ];
        let err = store.add_batch(&batch, OwnerId::random()).await.unwrap_err();

        assert!(matches!(err, StorageError::Conflict(_)));
        assert!(store.get(&code("dup00000")).await.is_err());
    }

    #[tokio::test]
    async fn batch_stores_every_entry() {
        let store = FileStore::in_memory();
        let owner = OwnerId::random();

        store
            .add_batch(
                &[
                    entry("batch001", "https://one.example"),
                    entry("batch002", "https://two.example"),
                ],
                owner,
            )
            .await
            .unwrap();

        assert_eq!(
            store.get(&code("batch002")).await.unwrap().original_url,
            "https://two.example"
        );
        assert_eq!(store.owned_urls(owner).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn owned_urls_filters_by_owner_and_tombstone() {
        let store = FileStore::in_memory();
        let alice = OwnerId::random();
        let bob = OwnerId::random();

        store.add(&code("alice001"), "https://a1.example", alice).await.unwrap();
        store.add(&code("alice002"), "https://a2.example", alice).await.unwrap();
        store.add(&code("bob00001"), "https://b1.example", bob).await.unwrap();
        store
            .mark_deleted(deletions(alice, &["alice002"]))
            .await
            .unwrap();

        let owned = store.owned_urls(alice).await.unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].code, code("alice001"));

        assert!(store.owned_urls(OwnerId::random()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mark_deleted_tombstones_owned_code() {
        let store = FileStore::in_memory();
        let owner = OwnerId::random();

        store
            .add(&code("abc12345"), "https://example.com", owner)
            .await
            .unwrap();
        store
            .mark_deleted(deletions(owner, &["abc12345"]))
            .await
            .unwrap();

        let record = store.get(&code("abc12345")).await.unwrap();
        assert!(record.deleted);
        assert_eq!(record.original_url, "https://example.com");
    }

    #[tokio::test]
    async fn mark_deleted_ignores_other_owners_and_unknown_codes() {
        let store = FileStore::in_memory();
        let owner = OwnerId::random();

        store
            .add(&code("abc12345"), "https://example.com", owner)
            .await
            .unwrap();
        store
            .mark_deleted(deletions(OwnerId::random(), &["abc12345", "unknown0"]))
            .await
            .unwrap();

        assert!(!store.get(&code("abc12345")).await.unwrap().deleted);
    }

    #[tokio::test]
    async fn mark_deleted_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = persisted(&dir).await;
        let owner = OwnerId::random();

        store
            .add(&code("abc12345"), "https://example.com", owner)
            .await
            .unwrap();
        store
            .mark_deleted(deletions(owner, &["abc12345", "abc12345"]))
            .await
            .unwrap();
        let len_after_first = tokio::fs::metadata(store.path().unwrap())
            .await
            .unwrap()
            .len();

        store
            .mark_deleted(deletions(owner, &["abc12345"]))
            .await
            .unwrap();
        let len_after_second = tokio::fs::metadata(store.path().unwrap())
            .await
            .unwrap()
            .len();

        assert!(store.get(&code("abc12345")).await.unwrap().deleted);
        assert_eq!(len_after_first, len_after_second);
    }

    #[tokio::test]
    async fn mark_deleted_drains_hand_fed_stream() {
        let store = FileStore::in_memory();
        let owner = OwnerId::random();
        store.add(&code("abc12345"), "https://example.com", owner).await.unwrap();

        let (tx, stream) = DeletionStream::channel(1);
        let producer = tokio::spawn(async move {
            tx.send(DeletionRequest::new(owner, ShortCode::new_unchecked("abc12345")))
                .await
                .unwrap();
        });

        store.mark_deleted(stream).await.unwrap();
        producer.await.unwrap();

        assert!(store.get(&code("abc12345")).await.unwrap().deleted);
    }

    #[tokio::test]
    async fn stats_counts_live_records_and_owners() {
        let store = FileStore::in_memory();
        let a = OwnerId::random();
        let b = OwnerId::random();

        store.add(&code("a0000001"), "https://a1.example", a).await.unwrap();
        store.add(&code("a0000002"), "https://a2.example", a).await.unwrap();
        store.add(&code("b0000001"), "https://b1.example", b).await.unwrap();
        store.mark_deleted(deletions(a, &["a0000001"])).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats, Stats { urls: 2, users: 2 });
    }

    #[tokio::test]
    async fn reopened_store_replays_log() {
        let dir = TempDir::new().unwrap();
        let owner = OwnerId::random();
        let urls: Vec<_> = (0..5)
            .map(|i| (format!("code{i:04}"), format!("https://example{i}.com")))
            .collect();

        {
            let store = persisted(&dir).await;
            for (c, url) in &urls {
                store.add(&code(c), url, owner).await.unwrap();
            }
            store.mark_deleted(deletions(owner, &["code0004"])).await.unwrap();
        }

        let reopened = persisted(&dir).await;
        for (c, url) in &urls {
            let record = reopened.get(&code(c)).await.unwrap();
            assert_eq!(&record.original_url, url);
            assert_eq!(record.owner, owner);
        }
        assert!(reopened.get(&code("code0004")).await.unwrap().deleted);
        assert_eq!(reopened.stats().await.unwrap(), Stats { urls: 4, users: 1 });
    }

    #[tokio::test]
    async fn reads_observe_writes_from_another_instance() {
        let dir = TempDir::new().unwrap();
        let writer = persisted(&dir).await;
        let reader = persisted(&dir).await;

        writer
            .add(&code("abc12345"), "https://example.com", OwnerId::random())
            .await
            .unwrap();

        let record = reader.get(&code("abc12345")).await.unwrap();
        assert_eq!(record.original_url, "https://example.com");

        let err = reader
            .add(&code("abc12345"), "https://example.com", OwnerId::random())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[tokio::test]
    async fn missing_file_is_an_empty_store() {
        let dir = TempDir::new().unwrap();
        let store = persisted(&dir).await;

        assert_eq!(store.stats().await.unwrap(), Stats::default());
        assert!(!store.path().unwrap().exists());
    }

    #[tokio::test]
    async fn loads_minimal_line_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("urls.jsonl");
        let id = Uuid::new_v4();
        tokio::fs::write(
            &path,
            format!(r#"{{"uuid":"{id}","short_url":"legacy01","original_url":"https://legacy.example"}}"#),
        )
        .await
        .unwrap();

        let store = FileStore::open(&path).await.unwrap();
        let record = store.get(&code("legacy01")).await.unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.original_url, "https://legacy.example");
        assert_eq!(record.owner, OwnerId::nil());
        assert!(!record.deleted);

        // The unterminated last line gets a newline before the next append.
        store
            .add(&code("fresh001"), "https://fresh.example", OwnerId::random())
            .await
            .unwrap();
        let reopened = FileStore::open(&path).await.unwrap();
        assert!(reopened.get(&code("legacy01")).await.is_ok());
        assert!(reopened.get(&code("fresh001")).await.is_ok());
    }

    #[tokio::test]
    async fn torn_tail_is_skipped_and_overwritten() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("urls.jsonl");
        {
            let store = FileStore::open(&path).await.unwrap();
            store
                .add(&code("whole001"), "https://whole.example", OwnerId::random())
                .await
                .unwrap();
        }
        let mut contents = tokio::fs::read(&path).await.unwrap();
        contents.extend_from_slice(br#"{"uuid":"0000","short_url":"tor"#);
        tokio::fs::write(&path, &contents).await.unwrap();

        let store = FileStore::open(&path).await.unwrap();
        assert!(store.get(&code("whole001")).await.is_ok());

        store
            .add(&code("after001"), "https://after.example", OwnerId::random())
            .await
            .unwrap();

        let reopened = FileStore::open(&path).await.unwrap();
        assert_eq!(reopened.stats().await.unwrap().urls, 2);
        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(!raw.contains(r#""short_url":"tor"#));
    }

    #[tokio::test]
    async fn malformed_line_in_the_middle_is_invalid_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("urls.jsonl");
        tokio::fs::write(&path, "not json\n{}\n").await.unwrap();

        let err = FileStore::open(&path).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidData(_)));
    }

    #[tokio::test]
    async fn health_check_reports_unusable_paths() {
        assert!(FileStore::in_memory().health_check().await.is_ok());

        let dir = TempDir::new().unwrap();
        assert!(persisted(&dir).await.health_check().await.is_ok());

        let store = FileStore {
            path: Some(dir.path().join("missing").join("urls.jsonl")),
            index: Mutex::new(Index::default()),
        };
        assert!(matches!(
            store.health_check().await,
            Err(StorageError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_adds_of_one_code_have_a_single_winner() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(persisted(&dir).await);
        let mut handles = Vec::new();

        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .add(&code("race0000"), &format!("https://racer{i}.example"), OwnerId::random())
                    .await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => winners += 1,
                Err(err) => assert!(matches!(err, StorageError::Conflict(_))),
            }
        }
        assert_eq!(winners, 1);

        let reopened = persisted(&dir).await;
        assert_eq!(reopened.stats().await.unwrap().urls, 1);
    }

    #[tokio::test]
    async fn batch_is_written_as_one_line() {
        let dir = TempDir::new().unwrap();
        let store = persisted(&dir).await;
        let owner = OwnerId::random();

        store.add(&code("single01"), "https://one.example", owner).await.unwrap();
        store
            .add_batch(
                &[
                    entry("batch001", "https://two.example"),
                    entry("batch002", "https://three.example"),
                ],
                owner,
            )
            .await
            .unwrap();

        let raw = tokio::fs::read_to_string(store.path().unwrap()).await.unwrap();
        assert_eq!(raw.lines().count(), 2);
        assert!(raw.lines().nth(1).unwrap().starts_with(r#"{"batch":["#));
    }

    #[tokio::test]
    async fn torn_batch_line_is_dropped_whole() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("urls.jsonl");
        let owner = OwnerId::random();
        {
            let store = FileStore::open(&path).await.unwrap();
            store.add(&code("whole001"), "https://whole.example", owner).await.unwrap();
            store
                .add_batch(
                    &[
                        entry("batch001", "https://one.example"),
                        entry("batch002", "https://two.example"),
                    ],
                    owner,
                )
                .await
                .unwrap();
        }

        // Cut the batch line just after its first record.
        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        let cut = raw.find("batch002").unwrap();
        tokio::fs::write(&path, &raw[..cut]).await.unwrap();

        let store = FileStore::open(&path).await.unwrap();
        assert_eq!(store.stats().await.unwrap().urls, 1);
        assert!(matches!(
            store.get(&code("batch001")).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancelled_batch_is_all_or_nothing() {
        let dir = TempDir::new().unwrap();
        let store = persisted(&dir).await;
        const SIZE: usize = 5_000;
        let mut owners = Vec::new();

        for round in 0..10u64 {
            let owner = OwnerId::random();
            let batch: Vec<_> = (0..SIZE)
                .map(|i| entry(&format!("r{round:02}i{i:05}"), &format!("https://r{round}.example/{i}")))
                .collect();

            let _ = tokio::time::timeout(
                Duration::from_micros(200 * (round + 1)),
                store.add_batch(&batch, owner),
            )
            .await;
            owners.push(owner);
        }

        // A write waits for any append still finishing on the blocking pool.
        store.add(&code("fence000"), "https://fence.example", OwnerId::random()).await.unwrap();

        let reopened = persisted(&dir).await;
        for owner in owners {
            let visible = reopened.owned_urls(owner).await.unwrap().len();
            assert!(
                visible == 0 || visible == SIZE,
                "{visible} of {SIZE} records visible"
            );
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancelled_deletion_sweep_is_all_or_nothing() {
        let dir = TempDir::new().unwrap();
        let store = persisted(&dir).await;
        let owner = OwnerId::random();
        let codes: Vec<_> = (0..2_000).map(|i| format!("del{i:05}")).collect();
        let batch: Vec<_> = codes
            .iter()
            .map(|c| entry(c, &format!("https://{c}.example")))
            .collect();
        store.add_batch(&batch, owner).await.unwrap();

        let requests = DeletionStream::submit(owner, codes.iter().map(|c| code(c)).collect(), 64);
        let _ = tokio::time::timeout(Duration::from_micros(500), store.mark_deleted(requests)).await;

        store.add(&code("fence000"), "https://fence.example", owner).await.unwrap();

        let reopened = persisted(&dir).await;
        let live = reopened.owned_urls(owner).await.unwrap().len() - 1;
        assert!(live == 0 || live == codes.len(), "{live} of {} codes still live", codes.len());
    }

    #[tokio::test]
    async fn unfinished_deletion_sweep_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let store = persisted(&dir).await;
        let owner = OwnerId::random();
        store.add(&code("abc12345"), "https://example.com", owner).await.unwrap();

        // The producer never closes the stream, so the sweep cannot finish.
        let (tx, stream) = DeletionStream::channel(4);
        tx.send(DeletionRequest::new(owner, code("abc12345"))).await.unwrap();

        let result = tokio::time::timeout(Duration::from_millis(50), store.mark_deleted(stream)).await;
        assert!(result.is_err());
        drop(tx);

        assert!(!store.get(&code("abc12345")).await.unwrap().deleted);
        let reopened = persisted(&dir).await;
        assert!(!reopened.get(&code("abc12345")).await.unwrap().deleted);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn instances_sharing_a_log_keep_each_others_writes() {
        let dir = TempDir::new().unwrap();
        let first = Arc::new(persisted(&dir).await);
        let second = Arc::new(persisted(&dir).await);
        let mut handles = Vec::new();

        for i in 0..200 {
            let store = if i % 2 == 0 { Arc::clone(&first) } else { Arc::clone(&second) };
            handles.push(tokio::spawn(async move {
                store
                    .add(&code(&format!("shared{i:03}")), &format!("https://{i}.example"), OwnerId::random())
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let reopened = persisted(&dir).await;
        for i in 0..200 {
            let record = reopened.get(&code(&format!("shared{i:03}"))).await.unwrap();
            assert_eq!(record.original_url, format!("https://{i}.example"));
        }
        assert_eq!(reopened.stats().await.unwrap().urls, 200);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn instances_sharing_a_log_agree_on_one_winner() {
        let dir = TempDir::new().unwrap();
        let first = Arc::new(persisted(&dir).await);
        let second = Arc::new(persisted(&dir).await);
        let mut handles = Vec::new();

        for i in 0..8 {
            let store = if i % 2 == 0 { Arc::clone(&first) } else { Arc::clone(&second) };
            handles.push(tokio::spawn(async move {
                store
                    .add(&code("race0000"), &format!("https://racer{i}.example"), OwnerId::random())
                    .await
                    .map(|()| format!("https://racer{i}.example"))
            }));
        }

        let mut winners = Vec::new();
        for handle in handles {
            match handle.await.unwrap() {
                Ok(url) => winners.push(url),
                Err(err) => assert!(matches!(err, StorageError::Conflict(_))),
            }
        }
        assert_eq!(winners.len(), 1);

        let reopened = persisted(&dir).await;
        assert_eq!(
            reopened.get(&code("race0000")).await.unwrap().original_url,
            winners[0]
        );
    }
}
