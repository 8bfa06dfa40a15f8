//! Storage trait abstraction for thread persistence.
//!
//! Implementations are provided by downstream crates (e.g., memex-storage).
//! Every backend must honour the same observable contract:
//!
//! - `save_thread` is an idempotent upsert that applies the message cap.
//! - `get_thread` returns an owned copy; mutating it never touches storage.
//! - `list_threads` orders by `created_at` descending, then `id` ascending.
//! - `delete_thread` reports whether something was removed.
//! - `search_threads` is deterministic and uses the listing order.

use std::cmp::Ordering;

use async_trait::async_trait;
use memex_models::{Metadata, MetadataValue, Thread};

use crate::error::{HistoryError, Result};

// ── ThreadQuery ──────────────────────────────────────────────────────

/// Search filter for [`ThreadStore::search_threads`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThreadQuery {
    /// Case-insensitive substring matched against every message's content.
    pub content: Option<String>,
    /// Exact matches required on thread metadata.
    pub metadata: Metadata,
    /// Maximum number of threads to return.
    pub limit: Option<usize>,
}

impl ThreadQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.content.as_deref().is_none_or(str::is_empty) && self.metadata.is_empty()
    }

    /// Reject queries that would match everything.
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(HistoryError::InvalidInput(
                "search query cannot be empty".to_string(),
            ));
        }
        if self.limit == Some(0) {
            return Err(HistoryError::InvalidInput(
                "search limit must be a positive integer".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether `thread` satisfies every condition of the query.
    pub fn matches(&self, thread: &Thread) -> bool {
        let metadata_ok = self
            .metadata
            .iter()
            .all(|(key, expected)| thread.metadata.get(key) == Some(expected));
        if !metadata_ok {
            return false;
        }

        match self.content.as_deref() {
            Some(needle) if !needle.is_empty() => {
                let needle = needle.to_lowercase();
                thread
                    .messages
                    .iter()
                    .any(|m| m.content.to_lowercase().contains(&needle))
            }
            _ => true,
        }
    }
}

// ── ThreadStore ──────────────────────────────────────────────────────

#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// Short backend name for diagnostics.
    fn backend_name(&self) -> &'static str;

    /// Configured per-thread message cap, if any.
    fn max_messages(&self) -> Option<usize>;

    /// Upsert the full thread, keeping only the most recent capped messages.
    async fn save_thread(&self, thread: &Thread) -> Result<()>;

    /// Load a thread by id.
    async fn get_thread(&self, thread_id: &str) -> Result<Option<Thread>>;

    /// List threads, newest first.
    async fn list_threads(&self, limit: usize, offset: usize) -> Result<Vec<Thread>>;

    /// Delete a thread and all of its messages. Returns whether it existed.
    async fn delete_thread(&self, thread_id: &str) -> Result<bool>;

    /// Find threads matching `query`.
    async fn search_threads(&self, query: &ThreadQuery) -> Result<Vec<Thread>>;

    /// Count stored threads.
    async fn count_threads(&self) -> Result<usize>;

    /// Load a thread keeping only its most recent `message_limit` messages.
    async fn get_thread_with_limit(
        &self,
        thread_id: &str,
        message_limit: usize,
    ) -> Result<Option<Thread>> {
        if message_limit == 0 {
            return Err(HistoryError::InvalidInput(
                "message_limit must be a positive integer".to_string(),
            ));
        }
        Ok(self.get_thread(thread_id).await?.map(|mut thread| {
            thread.retain_recent(message_limit);
            thread
        }))
    }

    /// Check whether a thread exists.
    async fn thread_exists(&self, thread_id: &str) -> Result<bool> {
        Ok(self.get_thread(thread_id).await?.is_some())
    }
}

// ── Shared helpers for backends ──────────────────────────────────────

/// Reject empty thread ids.
pub fn validate_thread_id(thread_id: &str) -> Result<()> {
    if thread_id.trim().is_empty() {
        return Err(HistoryError::InvalidInput(
            "thread id cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Reject a zero page size.
pub fn validate_page(limit: usize) -> Result<()> {
    if limit == 0 {
        return Err(HistoryError::InvalidInput(
            "limit must be a positive integer".to_string(),
        ));
    }
    Ok(())
}

/// Check that a thread is well formed before it is persisted.
pub fn validate_for_save(thread: &Thread) -> Result<()> {
    validate_thread_id(&thread.id)?;
    for message in &thread.messages {
        if message.id.is_empty() {
            return Err(HistoryError::InvalidInput(format!(
                "message in thread {} has an empty id",
                thread.id
            )));
        }
        if message.thread_id != thread.id {
            return Err(HistoryError::Integrity(format!(
                "message {} references thread {} but is stored in thread {}",
                message.id, message.thread_id, thread.id
            )));
        }
    }
    Ok(())
}

/// Listing order: `created_at` descending, `id` ascending on ties.
pub fn listing_order(a: &Thread, b: &Thread) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| a.id.cmp(&b.id))
}

/// Apply `offset`/`limit` to an already ordered list.
pub fn paginate<T>(items: Vec<T>, limit: usize, offset: usize) -> Vec<T> {
    items.into_iter().skip(offset).take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use memex_models::{Message, Role, metadata};

    fn thread_with(id: &str, content: &str) -> Thread {
        let mut thread = Thread::with_id(id);
        let message = Message::new(id, Role::User, content, Utc::now());
        thread.add_message(message);
        thread
    }

    #[test]
    fn test_query_matches_content_case_insensitive() {
        let thread = thread_with("t-1", "Where is the Rust book?");
        assert!(ThreadQuery::new().with_content("rust BOOK").matches(&thread));
        assert!(!ThreadQuery::new().with_content("python").matches(&thread));
    }

    #[test]
    fn test_query_requires_all_metadata() {
        let thread = thread_with("t-1", "hello").with_metadata(metadata! {
            "user_id" => "123",
            "category" => "support",
        });

        let query = ThreadQuery::new()
            .with_metadata("user_id", "123")
            .with_metadata("category", "support");
        assert!(query.matches(&thread));

        let query = query.with_metadata("priority", "high");
        assert!(!query.matches(&thread));
    }

    #[test]
    fn test_empty_query_rejected() {
        assert!(ThreadQuery::new().validate().is_err());
        assert!(ThreadQuery::new().with_content("").validate().is_err());
        assert!(
            ThreadQuery::new()
                .with_content("x")
                .with_limit(0)
                .validate()
                .is_err()
        );
        assert!(ThreadQuery::new().with_content("x").validate().is_ok());
    }

    #[test]
    fn test_validate_for_save_flags_foreign_message() {
        let mut thread = Thread::with_id("t-1");
        thread.add_message(Message::new("t-2", Role::User, "stray", Utc::now()));

        let err = validate_for_save(&thread).unwrap_err();
        assert!(matches!(err, HistoryError::Integrity(_)));
    }

    #[test]
    fn test_listing_order_newest_first_then_id() {
        let now = Utc::now();
        let mut a = Thread::with_id("a");
        let mut b = Thread::with_id("b");
        let mut c = Thread::with_id("c");
        a.created_at = now;
        b.created_at = now;
        c.created_at = now + Duration::seconds(1);

        let mut threads = vec![b, a, c];
        threads.sort_by(listing_order);
        let ids: Vec<_> = threads.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    /// Single-thread store exercising the provided trait methods.
    struct FixedStore(Thread);

    #[async_trait]
    impl ThreadStore for FixedStore {
        fn backend_name(&self) -> &'static str {
            "fixed"
        }

        fn max_messages(&self) -> Option<usize> {
            None
        }

        async fn save_thread(&self, _thread: &Thread) -> Result<()> {
            Ok(())
        }

        async fn get_thread(&self, thread_id: &str) -> Result<Option<Thread>> {
            Ok((thread_id == self.0.id).then(|| self.0.clone()))
        }

        async fn list_threads(&self, _limit: usize, _offset: usize) -> Result<Vec<Thread>> {
            Ok(vec![self.0.clone()])
        }

        async fn delete_thread(&self, _thread_id: &str) -> Result<bool> {
            Ok(false)
        }

        async fn search_threads(&self, _query: &ThreadQuery) -> Result<Vec<Thread>> {
            Ok(Vec::new())
        }

        async fn count_threads(&self) -> Result<usize> {
            Ok(1)
        }
    }

    #[tokio::test]
    async fn test_default_get_thread_with_limit() {
        let mut thread = Thread::with_id("t-1");
        let base = Utc::now();
        for i in 0..4 {
            thread.add_message(Message::new(
                "t-1",
                Role::User,
                format!("m{i}"),
                base + Duration::seconds(i),
            ));
        }
        let store = FixedStore(thread);

        let limited = store.get_thread_with_limit("t-1", 2).await.unwrap().unwrap();
        let contents: Vec<_> = limited.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3"]);

        assert!(store.get_thread_with_limit("t-1", 0).await.is_err());
        assert!(store.thread_exists("t-1").await.unwrap());
        assert!(!store.thread_exists("missing").await.unwrap());
    }

    #[test]
    fn test_paginate() {
        let items: Vec<u8> = (0..5).collect();
        assert_eq!(paginate(items.clone(), 2, 0), vec![0, 1]);
        assert_eq!(paginate(items.clone(), 2, 4), vec![4]);
        assert!(paginate(items, 2, 9).is_empty());
    }
}
