//! Durable thread store on top of redb.
//!
//! # Tables
//!
//! - `threads`: thread_id -> thread record (metadata and timestamps)
//! - `messages`: (thread_id, position) -> message
//! - `message_owners`: message_id -> thread_id (global id uniqueness)
//!
//! A save rewrites the thread's message rows inside one write transaction,
//! so a failed save leaves the previously committed state untouched.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use memex_models::{Message, Metadata, Thread};
use memex_traits::{
    HistoryError, Result, ThreadQuery, ThreadStore, listing_order, paginate, validate_for_save,
    validate_page, validate_thread_id,
};
use redb::{
    Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition,
    WriteTransaction,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use tracing::{debug, error};

use crate::config::{ConnectionTarget, validate_cap};

const THREADS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("threads");
const MESSAGES_TABLE: TableDefinition<(&str, u64), &[u8]> = TableDefinition::new("messages");
const MESSAGE_OWNERS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("message_owners");

/// Thread row without its messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ThreadRecord {
    id: String,
    #[serde(default)]
    metadata: Metadata,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ThreadRecord {
    fn from_thread(thread: &Thread) -> Self {
        Self {
            id: thread.id.clone(),
            metadata: thread.metadata.clone(),
            created_at: thread.created_at,
            updated_at: thread.updated_at,
        }
    }

    fn into_thread(self, messages: Vec<Message>) -> Thread {
        Thread {
            id: self.id,
            messages,
            metadata: self.metadata,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Only the id of a stored message, used when clearing owner rows.
#[derive(Deserialize)]
struct MessageKey {
    id: String,
}

/// Failure inside a blocking storage call.
#[derive(Debug, thiserror::Error)]
enum StoreFailure {
    #[error(transparent)]
    Db(#[from] redb::Error),
    #[error(transparent)]
    History(#[from] HistoryError),
}

macro_rules! db_failure_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for StoreFailure {
                fn from(err: $ty) -> Self {
                    StoreFailure::Db(err.into())
                }
            }
        )*
    };
}

db_failure_from!(
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

impl From<serde_json::Error> for StoreFailure {
    fn from(err: serde_json::Error) -> Self {
        StoreFailure::History(err.into())
    }
}

impl From<StoreFailure> for HistoryError {
    fn from(failure: StoreFailure) -> Self {
        match failure {
            StoreFailure::Db(err) => HistoryError::Operation(format!("storage error: {err}")),
            StoreFailure::History(err) => err,
        }
    }
}

/// redb-backed [`ThreadStore`].
#[derive(Clone)]
pub struct DurableStore {
    db: Arc<Database>,
    max_messages: Option<usize>,
    #[cfg(test)]
    fault: Arc<parking_lot::Mutex<Option<usize>>>,
}

impl DurableStore {
    /// Open (or create) the store and initialize its tables.
    pub fn open(target: &ConnectionTarget, max_messages: Option<usize>) -> Result<Self> {
        validate_cap(max_messages)?;

        let db = match target {
            ConnectionTarget::InMemory => Database::builder()
                .create_with_backend(redb::backends::InMemoryBackend::new())
                .map_err(|e| HistoryError::Connection(format!("in-memory database: {e}")))?,
            ConnectionTarget::File(path) => {
                if let Some(parent) = path.parent()
                    && !parent.as_os_str().is_empty()
                {
                    fs::create_dir_all(parent).map_err(|e| {
                        HistoryError::Connection(format!(
                            "failed to create {}: {e}",
                            parent.display()
                        ))
                    })?;
                }
                Database::create(path).map_err(|e| {
                    HistoryError::Connection(format!("failed to open {}: {e}", path.display()))
                })?
            }
        };

        Self::from_database(Arc::new(db), max_messages)
    }

    /// Wrap an already opened database.
    pub fn from_database(db: Arc<Database>, max_messages: Option<usize>) -> Result<Self> {
        validate_cap(max_messages)?;
        init_tables(&db).map_err(|e| {
            HistoryError::Connection(format!("failed to initialize tables: {}", HistoryError::from(e)))
        })?;

        debug!(?max_messages, "Durable thread store ready");

        Ok(Self {
            db,
            max_messages,
            #[cfg(test)]
            fault: Arc::new(parking_lot::Mutex::new(None)),
        })
    }

    #[cfg(test)]
    fn fail_after(&self, inserted: usize) {
        *self.fault.lock() = Some(inserted);
    }

    #[cfg(test)]
    fn injected_fault(&self) -> Option<usize> {
        *self.fault.lock()
    }

    #[cfg(not(test))]
    fn injected_fault(&self) -> Option<usize> {
        None
    }

    async fn run_blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> std::result::Result<T, StoreFailure> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(|e| HistoryError::Operation(format!("storage task failed: {e}")))?
            .map_err(HistoryError::from)
    }
}

fn init_tables(db: &Database) -> std::result::Result<(), StoreFailure> {
    let write_txn = db.begin_write()?;
    write_txn.open_table(THREADS_TABLE)?;
    write_txn.open_table(MESSAGES_TABLE)?;
    write_txn.open_table(MESSAGE_OWNERS_TABLE)?;
    write_txn.commit()?;
    Ok(())
}

/// Decode every message row of `thread_id` in position order.
fn load_messages<T>(table: &T, thread_id: &str) -> std::result::Result<Vec<Message>, StoreFailure>
where
    T: ReadableTable<(&'static str, u64), &'static [u8]>,
{
    let mut messages = Vec::new();
    for item in table.range((thread_id, 0u64)..=(thread_id, u64::MAX))? {
        let (_, value) = item?;
        messages.push(serde_json::from_slice(value.value())?);
    }
    Ok(messages)
}

fn load_record<T>(table: &T, thread_id: &str) -> std::result::Result<Option<ThreadRecord>, StoreFailure>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(thread_id)? {
        Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
        None => Ok(None),
    }
}

/// Remove a thread's message rows and their owner entries.
fn clear_messages(
    txn: &WriteTransaction,
    thread_id: &str,
) -> std::result::Result<usize, StoreFailure> {
    let mut messages = txn.open_table(MESSAGES_TABLE)?;
    let mut owners = txn.open_table(MESSAGE_OWNERS_TABLE)?;

    let mut existing = Vec::new();
    for item in messages.range((thread_id, 0u64)..=(thread_id, u64::MAX))? {
        let (key, value) = item?;
        let (_, position) = key.value();
        let stored: MessageKey = serde_json::from_slice(value.value())?;
        existing.push((position, stored.id));
    }

    for (position, message_id) in &existing {
        messages.remove((thread_id, *position))?;
        owners.remove(message_id.as_str())?;
    }

    Ok(existing.len())
}

fn write_thread(
    txn: &WriteTransaction,
    thread: &Thread,
    fail_after: Option<usize>,
) -> std::result::Result<(), StoreFailure> {
    let record = serde_json::to_vec(&ThreadRecord::from_thread(thread))?;
    {
        let mut threads = txn.open_table(THREADS_TABLE)?;
        threads.insert(thread.id.as_str(), record.as_slice())?;
    }

    clear_messages(txn, &thread.id)?;

    let mut messages = txn.open_table(MESSAGES_TABLE)?;
    let mut owners = txn.open_table(MESSAGE_OWNERS_TABLE)?;
    let mut seen = HashSet::with_capacity(thread.messages.len());

    for (position, message) in thread.messages.iter().enumerate() {
        if fail_after == Some(position) {
            return Err(HistoryError::Operation(format!(
                "injected failure after {position} messages"
            ))
            .into());
        }

        if !seen.insert(message.id.as_str()) {
            return Err(HistoryError::Integrity(format!(
                "message {} appears twice in thread {}",
                message.id, thread.id
            ))
            .into());
        }

        if let Some(owner) = owners.get(message.id.as_str())? {
            let owner = owner.value().to_string();
            if owner != thread.id {
                return Err(HistoryError::Integrity(format!(
                    "message {} already belongs to thread {owner}",
                    message.id
                ))
                .into());
            }
        }

        let data = serde_json::to_vec(message)?;
        messages.insert((thread.id.as_str(), position as u64), data.as_slice())?;
        owners.insert(message.id.as_str(), thread.id.as_str())?;
    }

    Ok(())
}

#[async_trait]
impl ThreadStore for DurableStore {
    fn backend_name(&self) -> &'static str {
        "durable"
    }

    fn max_messages(&self) -> Option<usize> {
        self.max_messages
    }

    async fn save_thread(&self, thread: &Thread) -> Result<()> {
        validate_for_save(thread)?;

        let mut thread = thread.clone();
        if let Some(max) = self.max_messages {
            thread.retain_recent(max);
        }
        let fail_after = self.injected_fault();
        let thread_id = thread.id.clone();

        let result = self
            .run_blocking(move |db| {
                let txn = db.begin_write()?;
                match write_thread(&txn, &thread, fail_after) {
                    Ok(()) => {
                        txn.commit()?;
                        Ok(thread.messages.len())
                    }
                    Err(err) => {
                        txn.abort()?;
                        Err(err)
                    }
                }
            })
            .await;

        match result {
            Ok(count) => {
                debug!(thread_id = %thread_id, messages = count, "Saved thread");
                Ok(())
            }
            Err(err) => {
                error!(thread_id = %thread_id, error = %err, "Failed to save thread");
                Err(err)
            }
        }
    }

    async fn get_thread(&self, thread_id: &str) -> Result<Option<Thread>> {
        validate_thread_id(thread_id)?;
        let thread_id = thread_id.to_string();

        self.run_blocking(move |db| {
            let read_txn = db.begin_read()?;
            let threads = read_txn.open_table(THREADS_TABLE)?;
            let Some(record) = load_record(&threads, &thread_id)? else {
                return Ok(None);
            };
            let messages = read_txn.open_table(MESSAGES_TABLE)?;
            let messages = load_messages(&messages, &thread_id)?;
            Ok(Some(record.into_thread(messages)))
        })
        .await
    }

    async fn get_thread_with_limit(
        &self,
        thread_id: &str,
        message_limit: usize,
    ) -> Result<Option<Thread>> {
        validate_thread_id(thread_id)?;
        if message_limit == 0 {
            return Err(HistoryError::InvalidInput(
                "message_limit must be a positive integer".to_string(),
            ));
        }
        let thread_id = thread_id.to_string();

        self.run_blocking(move |db| {
            let read_txn = db.begin_read()?;
            let threads = read_txn.open_table(THREADS_TABLE)?;
            let Some(record) = load_record(&threads, &thread_id)? else {
                return Ok(None);
            };

            let table = read_txn.open_table(MESSAGES_TABLE)?;
            let mut messages = Vec::with_capacity(message_limit);
            for item in table
                .range((thread_id.as_str(), 0u64)..=(thread_id.as_str(), u64::MAX))?
                .rev()
                .take(message_limit)
            {
                let (_, value) = item?;
                messages.push(serde_json::from_slice::<Message>(value.value())?);
            }
            messages.reverse();

            Ok(Some(record.into_thread(messages)))
        })
        .await
    }

    async fn list_threads(&self, limit: usize, offset: usize) -> Result<Vec<Thread>> {
        validate_page(limit)?;

        self.run_blocking(move |db| {
            let read_txn = db.begin_read()?;
            let threads = read_txn.open_table(THREADS_TABLE)?;

            let mut page = Vec::new();
            for item in threads.iter()? {
                let (_, value) = item?;
                let record: ThreadRecord = serde_json::from_slice(value.value())?;
                page.push(record.into_thread(Vec::new()));
            }
            page.sort_by(listing_order);
            let mut page = paginate(page, limit, offset);

            let messages = read_txn.open_table(MESSAGES_TABLE)?;
            for thread in &mut page {
                thread.messages = load_messages(&messages, &thread.id)?;
            }
            Ok(page)
        })
        .await
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<bool> {
        validate_thread_id(thread_id)?;
        let id = thread_id.to_string();

        let existed = self
            .run_blocking(move |db| {
                let txn = db.begin_write()?;
                let existed = {
                    let mut threads = txn.open_table(THREADS_TABLE)?;
                    threads.remove(id.as_str())?.is_some()
                };
                if existed {
                    clear_messages(&txn, &id)?;
                }
                txn.commit()?;
                Ok(existed)
            })
            .await?;

        debug!(thread_id, existed, "Deleted thread");
        Ok(existed)
    }

    async fn search_threads(&self, query: &ThreadQuery) -> Result<Vec<Thread>> {
        query.validate()?;
        let query = query.clone();

        self.run_blocking(move |db| {
            let read_txn = db.begin_read()?;
            let threads = read_txn.open_table(THREADS_TABLE)?;
            let messages = read_txn.open_table(MESSAGES_TABLE)?;

            let mut found = Vec::new();
            for item in threads.iter()? {
                let (_, value) = item?;
                let record: ThreadRecord = serde_json::from_slice(value.value())?;
                let thread_messages = load_messages(&messages, &record.id)?;
                let thread = record.into_thread(thread_messages);
                if query.matches(&thread) {
                    found.push(thread);
                }
            }

            found.sort_by(listing_order);
            if let Some(limit) = query.limit {
                found.truncate(limit);
            }
            Ok(found)
        })
        .await
    }

    async fn count_threads(&self) -> Result<usize> {
        self.run_blocking(|db| {
            let read_txn = db.begin_read()?;
            let threads = read_txn.open_table(THREADS_TABLE)?;
            Ok(threads.len()? as usize)
        })
        .await
    }

    async fn thread_exists(&self, thread_id: &str) -> Result<bool> {
        validate_thread_id(thread_id)?;
        let thread_id = thread_id.to_string();

        self.run_blocking(move |db| {
            let read_txn = db.begin_read()?;
            let threads = read_txn.open_table(THREADS_TABLE)?;
            Ok(threads.get(thread_id.as_str())?.is_some())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use memex_models::{Role, metadata};
    use tempfile::tempdir;

    fn in_memory(max_messages: Option<usize>) -> DurableStore {
        DurableStore::open(&ConnectionTarget::InMemory, max_messages).unwrap()
    }

    fn thread_with_messages(id: &str, count: usize) -> Thread {
        let mut thread = Thread::with_id(id);
        let base = thread.created_at;
        for i in 0..count {
            thread.add_message(Message::new(
                id,
                Role::User,
                format!("message {i}"),
                base + Duration::milliseconds(i as i64),
            ));
        }
        thread
    }

    #[tokio::test]
    async fn test_save_and_get_roundtrip() {
        let store = in_memory(None);
        let thread = thread_with_messages("t-1", 3).with_metadata(metadata! { "user_id" => "u-1" });

        store.save_thread(&thread).await.unwrap();
        let loaded = store.get_thread("t-1").await.unwrap().unwrap();

        assert_eq!(loaded, thread);
        assert_eq!(store.count_threads().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_save_replaces_messages() {
        let store = in_memory(None);
        let mut thread = thread_with_messages("t-1", 4);
        store.save_thread(&thread).await.unwrap();

        thread.messages.truncate(1);
        store.save_thread(&thread).await.unwrap();

        let loaded = store.get_thread("t-1").await.unwrap().unwrap();
        assert_eq!(loaded.message_count(), 1);
    }

    #[tokio::test]
    async fn test_cap_keeps_most_recent() {
        let store = in_memory(Some(2));
        let thread = thread_with_messages("t-1", 5);
        store.save_thread(&thread).await.unwrap();

        let loaded = store.get_thread("t-1").await.unwrap().unwrap();
        let contents: Vec<_> = loaded.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["message 3", "message 4"]);
    }

    #[tokio::test]
    async fn test_get_thread_with_limit_reads_tail() {
        let store = in_memory(None);
        store.save_thread(&thread_with_messages("t-1", 5)).await.unwrap();

        let loaded = store.get_thread_with_limit("t-1", 2).await.unwrap().unwrap();
        let contents: Vec<_> = loaded.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["message 3", "message 4"]);

        assert!(store.get_thread_with_limit("missing", 2).await.unwrap().is_none());
        assert!(store.get_thread_with_limit("t-1", 0).await.is_err());
    }

    #[tokio::test]
    async fn test_message_id_owned_by_another_thread() {
        let store = in_memory(None);
        let first = thread_with_messages("t-1", 1);
        store.save_thread(&first).await.unwrap();

        let mut second = Thread::with_id("t-2");
        let mut stolen = first.messages[0].clone();
        stolen.thread_id = "t-2".to_string();
        second.add_message(stolen);

        let err = store.save_thread(&second).await.unwrap_err();
        assert!(matches!(err, HistoryError::Integrity(_)));
        assert!(store.get_thread("t-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_id_within_thread() {
        let store = in_memory(None);
        let mut thread = thread_with_messages("t-1", 1);
        let copy = thread.messages[0].clone();
        thread.add_message(copy);

        let err = store.save_thread(&thread).await.unwrap_err();
        assert!(matches!(err, HistoryError::Integrity(_)));
    }

    #[tokio::test]
    async fn test_failed_save_keeps_previous_state() {
        let store = in_memory(None);
        let original = thread_with_messages("t-1", 2);
        store.save_thread(&original).await.unwrap();

        let mut updated = original.clone();
        updated.metadata.insert("stage".to_string(), "second".into());
        let at = updated.next_timestamp(Utc::now());
        updated.add_message(Message::new("t-1", Role::Assistant, "late", at));

        store.fail_after(2);
        let err = store.save_thread(&updated).await.unwrap_err();
        assert!(matches!(err, HistoryError::Operation(_)));

        let loaded = store.get_thread("t-1").await.unwrap().unwrap();
        assert_eq!(loaded, original);
    }

    #[tokio::test]
    async fn test_delete_frees_message_ids() {
        let store = in_memory(None);
        let first = thread_with_messages("t-1", 1);
        store.save_thread(&first).await.unwrap();

        assert!(store.delete_thread("t-1").await.unwrap());
        assert!(!store.delete_thread("t-1").await.unwrap());

        let mut reused = Thread::with_id("t-2");
        let mut message = first.messages[0].clone();
        message.thread_id = "t-2".to_string();
        reused.add_message(message);
        store.save_thread(&reused).await.unwrap();
    }

    #[tokio::test]
    async fn test_reopen_file_store() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("memex.redb");
        let thread = thread_with_messages("t-1", 2);

        {
            let store = DurableStore::open(&ConnectionTarget::File(path.clone()), None).unwrap();
            store.save_thread(&thread).await.unwrap();
        }

        let store = DurableStore::open(&ConnectionTarget::File(path), None).unwrap();
        let loaded = store.get_thread("t-1").await.unwrap().unwrap();
        assert_eq!(loaded, thread);
    }

    #[test]
    fn test_zero_cap_rejected() {
        let err = DurableStore::open(&ConnectionTarget::InMemory, Some(0))
            .err()
            .unwrap();
        assert!(matches!(err, HistoryError::Configuration(_)));
    }
}
