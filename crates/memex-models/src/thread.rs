//! Thread model for conversation persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::metadata::Metadata;

/// A named, ordered conversation.
///
/// A thread exclusively owns its messages. `messages` is kept sorted by
/// `created_at`, with insertion order breaking ties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Thread {
    /// Create an empty thread with a generated id.
    pub fn new() -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string())
    }

    /// Create an empty thread with a caller-supplied id.
    pub fn with_id(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            messages: Vec::new(),
            metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Append a message and bump `updated_at`.
    pub fn add_message(&mut self, message: Message) {
        if message.created_at > self.updated_at {
            self.updated_at = message.created_at;
        }
        self.messages.push(message);
    }

    /// Earliest timestamp a new message may carry without breaking ordering.
    ///
    /// Clamps `now` to the last message's timestamp so a clock that stepped
    /// backwards never produces an out-of-order thread.
    pub fn next_timestamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.messages.last() {
            Some(last) if last.created_at > now => last.created_at,
            _ => now,
        }
    }

    /// Drop the oldest messages so at most `max` remain.
    pub fn retain_recent(&mut self, max: usize) {
        if self.messages.len() > max {
            let excess = self.messages.len() - max;
            self.messages.drain(..excess);
        }
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Whether messages are ordered by `created_at` (non-decreasing).
    pub fn is_chronological(&self) -> bool {
        self.messages
            .windows(2)
            .all(|pair| pair[0].created_at <= pair[1].created_at)
    }
}

impl Default for Thread {
    fn default() -> Self {
        Self::new()
    }
}
