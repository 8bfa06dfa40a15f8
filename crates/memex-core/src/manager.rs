//! History manager - the single entry point for thread operations.
//!
//! Every mutating operation on a thread id runs load, mutate and persist
//! while holding that id's lock, so appends to one thread are serialized
//! while different threads proceed in parallel. Reads take no lock and see
//! the last committed state.

use chrono::Utc;
use memex_models::{Message, Metadata, NewMessage, Role, Thread};
use memex_traits::{
    HistoryAlgorithm, HistoryError, Result, ResultExt, ThreadQuery, ThreadStore,
    validate_thread_id,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info};

use crate::locks::ThreadLocks;

/// Behavioural switches for [`HistoryManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerOptions {
    /// Create a thread on first append instead of failing with `ThreadNotFound`.
    pub implicit_create: bool,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            implicit_create: true,
        }
    }
}

/// Coordinates storage, the context algorithm and per-thread locking.
#[derive(Clone)]
pub struct HistoryManager {
    store: Arc<dyn ThreadStore>,
    algorithm: Option<Arc<dyn HistoryAlgorithm>>,
    locks: Arc<ThreadLocks>,
    options: ManagerOptions,
}

impl HistoryManager {
    pub fn new(store: Arc<dyn ThreadStore>) -> Self {
        Self {
            store,
            algorithm: None,
            locks: Arc::new(ThreadLocks::new()),
            options: ManagerOptions::default(),
        }
    }

    pub fn with_algorithm(mut self, algorithm: Arc<dyn HistoryAlgorithm>) -> Self {
        self.algorithm = Some(algorithm);
        self
    }

    pub fn with_options(mut self, options: ManagerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &Arc<dyn ThreadStore> {
        &self.store
    }

    pub fn algorithm(&self) -> Option<&Arc<dyn HistoryAlgorithm>> {
        self.algorithm.as_ref()
    }

    pub fn options(&self) -> ManagerOptions {
        self.options
    }

    // ============== Thread lifecycle ==============

    /// Create and persist an empty thread with a generated id.
    pub async fn create_thread(&self, metadata: Option<Metadata>) -> Result<Thread> {
        let thread = Thread::new().with_metadata(metadata.unwrap_or_default());
        let guard = self.locks.acquire(&thread.id).await;
        self.persist(guard, thread.clone())
            .await
            .context("create_thread", &thread.id)?;

        info!(thread_id = %thread.id, "Created thread");
        Ok(thread)
    }

    /// Create a thread under a caller-chosen id.
    ///
    /// The first caller wins; later callers get `DuplicateThread`.
    pub async fn create_thread_with_id(
        &self,
        thread_id: &str,
        metadata: Option<Metadata>,
    ) -> Result<Thread> {
        validate_thread_id(thread_id)?;
        let guard = self.locks.acquire(thread_id).await;

        if self
            .store
            .thread_exists(thread_id)
            .await
            .context("create_thread", thread_id)?
        {
            return Err(HistoryError::DuplicateThread(thread_id.to_string()));
        }

        let thread = Thread::with_id(thread_id).with_metadata(metadata.unwrap_or_default());
        self.persist(guard, thread.clone())
            .await
            .context("create_thread", thread_id)?;

        info!(thread_id, "Created thread");
        Ok(thread)
    }

    /// Delete a thread and its messages. Returns whether it existed.
    pub async fn delete_thread(&self, thread_id: &str) -> Result<bool> {
        validate_thread_id(thread_id)?;
        let _guard = self.locks.acquire(thread_id).await;

        let existed = self
            .store
            .delete_thread(thread_id)
            .await
            .context("delete_thread", thread_id)?;
        if existed {
            info!(thread_id, "Deleted thread");
        }
        Ok(existed)
    }

    // ============== Appending ==============

    /// Append a message, creating the thread first when allowed.
    pub async fn add_message(
        &self,
        thread_id: &str,
        content: impl Into<String>,
        role: Role,
        metadata: Option<Metadata>,
    ) -> Result<Message> {
        let new_message = NewMessage::new(role, content).with_metadata(metadata.unwrap_or_default());
        self.add_message_with(thread_id, new_message).await
    }

    /// Append a pre-built message.
    ///
    /// The stored message gets a fresh id and a timestamp no earlier than the
    /// thread's last message.
    pub async fn add_message_with(&self, thread_id: &str, new_message: NewMessage) -> Result<Message> {
        validate_thread_id(thread_id)?;
        let guard = self.locks.acquire(thread_id).await;

        let loaded = self
            .store
            .get_thread(thread_id)
            .await
            .context("add_message", thread_id)?;
        let mut thread = match loaded {
            Some(thread) => thread,
            None if self.options.implicit_create => {
                info!(thread_id, "Creating thread on first message");
                Thread::with_id(thread_id)
            }
            None => return Err(HistoryError::ThreadNotFound(thread_id.to_string())),
        };

        let created_at = thread.next_timestamp(Utc::now());
        let message = new_message.into_message(thread_id, created_at);
        thread.add_message(message.clone());

        if let Some(algorithm) = &self.algorithm {
            self.run_post_process(algorithm.as_ref(), &mut thread, &message)
                .context("add_message", thread_id)?;
        }

        self.persist(guard, thread)
            .await
            .context("add_message", thread_id)?;

        debug!(thread_id, message_id = %message.id, role = %message.role, "Appended message");
        Ok(message)
    }

    fn run_post_process(
        &self,
        algorithm: &dyn HistoryAlgorithm,
        thread: &mut Thread,
        message: &Message,
    ) -> Result<()> {
        let before: Vec<String> = thread.messages.iter().map(|m| m.id.clone()).collect();
        algorithm.post_process(thread, message)?;

        let unchanged = thread.messages.len() == before.len()
            && thread
                .messages
                .iter()
                .zip(&before)
                .all(|(m, id)| &m.id == id);
        if !unchanged {
            error!(
                thread_id = %thread.id,
                algorithm = algorithm.name(),
                "post_process altered the message sequence"
            );
            return Err(HistoryError::Integrity(format!(
                "algorithm {} removed or reordered messages",
                algorithm.name()
            )));
        }
        Ok(())
    }

    /// Save `thread` in a task that owns the lock guard.
    ///
    /// If the caller is dropped mid-save, the write still completes before
    /// the next mutator of this thread can load it.
    async fn persist(&self, guard: OwnedMutexGuard<()>, thread: Thread) -> Result<()> {
        let store = self.store.clone();
        tokio::spawn(async move {
            let result = store.save_thread(&thread).await;
            drop(guard);
            result
        })
        .await
        .map_err(|e| HistoryError::Operation(format!("persist task failed: {e}")))?
    }

    // ============== Reading ==============

    /// Load a thread, optionally narrowing its messages to the context window.
    pub async fn get_thread(&self, thread_id: &str, apply_algorithm: bool) -> Result<Thread> {
        validate_thread_id(thread_id)?;
        let mut thread = self
            .store
            .get_thread(thread_id)
            .await
            .context("get_thread", thread_id)?
            .ok_or_else(|| HistoryError::ThreadNotFound(thread_id.to_string()))?;

        if apply_algorithm && let Some(algorithm) = &self.algorithm {
            thread.messages = algorithm.select_window(&thread.messages);
        }
        Ok(thread)
    }

    /// All stored messages of a thread.
    pub async fn get_messages(&self, thread_id: &str) -> Result<Vec<Message>> {
        Ok(self.get_thread(thread_id, false).await?.messages)
    }

    /// Messages the algorithm selects for the next model call.
    pub async fn get_context_window(&self, thread_id: &str) -> Result<Vec<Message>> {
        Ok(self.get_thread(thread_id, true).await?.messages)
    }

    pub async fn list_threads(&self, limit: usize, offset: usize) -> Result<Vec<Thread>> {
        self.store.list_threads(limit, offset).await
    }

    pub async fn search_threads(&self, query: &ThreadQuery) -> Result<Vec<Thread>> {
        self.store.search_threads(query).await
    }
}

impl fmt::Debug for HistoryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryManager")
            .field("store", &self.store.backend_name())
            .field("algorithm", &self.algorithm.as_ref().map(|a| a.name()))
            .field("options", &self.options)
            .finish()
    }
}
