//! Process-local thread store.
//!
//! Threads live in a map behind a read/write lock, next to a message-id
//! ownership index. Every read hands out an owned clone and every save swaps
//! in a whole new thread, so a save is all-or-nothing and callers never alias
//! stored state.

use async_trait::async_trait;
use memex_models::Thread;
use memex_traits::{
    HistoryError, Result, ThreadQuery, ThreadStore, listing_order, paginate, validate_for_save,
    validate_page, validate_thread_id,
};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tracing::{debug, error};

use crate::config::validate_cap;

#[derive(Debug, Default)]
struct State {
    threads: HashMap<String, Thread>,
    /// message_id -> thread_id
    message_owners: HashMap<String, String>,
}

impl State {
    fn release_messages(&mut self, thread: &Thread) {
        for message in &thread.messages {
            self.message_owners.remove(&message.id);
        }
    }
}

/// In-memory [`ThreadStore`].
#[derive(Debug, Default)]
pub struct VolatileStore {
    state: RwLock<State>,
    max_messages: Option<usize>,
}

impl VolatileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that keeps at most `max_messages` per thread.
    pub fn with_max_messages(max_messages: Option<usize>) -> Result<Self> {
        validate_cap(max_messages)?;
        Ok(Self {
            state: RwLock::new(State::default()),
            max_messages,
        })
    }

    /// Reject ids repeated within `thread` or owned by another thread.
    fn check_ownership(state: &State, thread: &Thread) -> Result<()> {
        let mut seen = HashSet::with_capacity(thread.messages.len());
        for message in &thread.messages {
            if !seen.insert(message.id.as_str()) {
                return Err(HistoryError::Integrity(format!(
                    "message {} appears twice in thread {}",
                    message.id, thread.id
                )));
            }
            if let Some(owner) = state.message_owners.get(&message.id)
                && owner != &thread.id
            {
                return Err(HistoryError::Integrity(format!(
                    "message {} already belongs to thread {owner}",
                    message.id
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ThreadStore for VolatileStore {
    fn backend_name(&self) -> &'static str {
        "volatile"
    }

    fn max_messages(&self) -> Option<usize> {
        self.max_messages
    }

    async fn save_thread(&self, thread: &Thread) -> Result<()> {
        validate_for_save(thread)?;

        let mut stored = thread.clone();
        if let Some(max) = self.max_messages {
            stored.retain_recent(max);
        }

        let mut state = self.state.write();
        if let Err(err) = Self::check_ownership(&state, &stored) {
            error!(thread_id = %stored.id, error = %err, "Failed to save thread");
            return Err(err);
        }

        if let Some(previous) = state.threads.remove(&stored.id) {
            state.release_messages(&previous);
        }
        for message in &stored.messages {
            state
                .message_owners
                .insert(message.id.clone(), stored.id.clone());
        }

        debug!(thread_id = %stored.id, messages = stored.message_count(), "Saved thread");
        state.threads.insert(stored.id.clone(), stored);
        Ok(())
    }

    async fn get_thread(&self, thread_id: &str) -> Result<Option<Thread>> {
        validate_thread_id(thread_id)?;
        Ok(self.state.read().threads.get(thread_id).cloned())
    }

    async fn list_threads(&self, limit: usize, offset: usize) -> Result<Vec<Thread>> {
        validate_page(limit)?;
        let mut threads: Vec<Thread> = self.state.read().threads.values().cloned().collect();
        threads.sort_by(listing_order);
        Ok(paginate(threads, limit, offset))
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<bool> {
        validate_thread_id(thread_id)?;
        let existed = {
            let mut state = self.state.write();
            match state.threads.remove(thread_id) {
                Some(previous) => {
                    state.release_messages(&previous);
                    true
                }
                None => false,
            }
        };
        debug!(thread_id, existed, "Deleted thread");
        Ok(existed)
    }

    async fn search_threads(&self, query: &ThreadQuery) -> Result<Vec<Thread>> {
        query.validate()?;
        let mut found: Vec<Thread> = self
            .state
            .read()
            .threads
            .values()
            .filter(|thread| query.matches(thread))
            .cloned()
            .collect();
        found.sort_by(listing_order);
        if let Some(limit) = query.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    async fn count_threads(&self) -> Result<usize> {
        Ok(self.state.read().threads.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use memex_models::{Message, Role};

    fn thread_with(id: &str, contents: &[&str]) -> Thread {
        let mut thread = Thread::with_id(id);
        for content in contents {
            let at = thread.next_timestamp(Utc::now());
            thread.add_message(Message::new(id, Role::User, *content, at));
        }
        thread
    }

    #[tokio::test]
    async fn test_get_returns_independent_copy() {
        let store = VolatileStore::new();
        store.save_thread(&thread_with("t-1", &["hello"])).await.unwrap();

        let mut copy = store.get_thread("t-1").await.unwrap().unwrap();
        copy.messages.clear();

        let again = store.get_thread("t-1").await.unwrap().unwrap();
        assert_eq!(again.message_count(), 1);
    }

    #[tokio::test]
    async fn test_cap_applied_on_save() {
        let store = VolatileStore::with_max_messages(Some(2)).unwrap();
        store
            .save_thread(&thread_with("t-1", &["a", "b", "c"]))
            .await
            .unwrap();

        let loaded = store.get_thread("t-1").await.unwrap().unwrap();
        let contents: Vec<_> = loaded.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_rejects_empty_thread_id() {
        let store = VolatileStore::new();
        let err = store.get_thread("").await.unwrap_err();
        assert!(matches!(err, HistoryError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_rejects_message_owned_elsewhere() {
        let store = VolatileStore::new();
        let first = thread_with("t-1", &["hello"]);
        store.save_thread(&first).await.unwrap();

        let mut second = Thread::with_id("t-2");
        let mut message = first.messages[0].clone();
        message.thread_id = "t-2".to_string();
        second.add_message(message);

        let err = store.save_thread(&second).await.unwrap_err();
        assert!(matches!(err, HistoryError::Integrity(_)));
        assert_eq!(store.count_threads().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_owner_index_follows_stored_messages() {
        let store = VolatileStore::with_max_messages(Some(2)).unwrap();
        for i in 0..50 {
            let id = format!("t-{i}");
            store
                .save_thread(&thread_with(&id, &["a", "b", "c"]))
                .await
                .unwrap();
        }
        assert_eq!(store.state.read().message_owners.len(), 100);

        let mut shrunk = store.get_thread("t-0").await.unwrap().unwrap();
        let evicted = shrunk.messages.remove(0);
        store.save_thread(&shrunk).await.unwrap();
        assert!(!store.state.read().message_owners.contains_key(&evicted.id));

        assert!(store.delete_thread("t-1").await.unwrap());
        assert_eq!(store.state.read().message_owners.len(), 97);
    }

    #[tokio::test]
    async fn test_message_id_reusable_after_delete() {
        let store = VolatileStore::new();
        let first = thread_with("t-1", &["hello"]);
        store.save_thread(&first).await.unwrap();
        store.delete_thread("t-1").await.unwrap();

        let mut second = Thread::with_id("t-2");
        let mut message = first.messages[0].clone();
        message.thread_id = "t-2".to_string();
        second.add_message(message);
        store.save_thread(&second).await.unwrap();

        let owners = &store.state.read().message_owners;
        assert_eq!(owners.get(&first.messages[0].id).map(String::as_str), Some("t-2"));
    }

    #[test]
    fn test_zero_cap_rejected() {
        assert!(VolatileStore::with_max_messages(Some(0)).is_err());
    }
}
