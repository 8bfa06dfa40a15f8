//! First-in-first-out context window.

use memex_models::{Message, MetadataValue, Thread};
use memex_traits::{HistoryAlgorithm, HistoryError, Result};

/// Keep every system message plus the most recent conversation turns.
///
/// System messages are never dropped. When they alone exceed the budget the
/// window contains only them.
#[derive(Debug, Clone)]
pub struct FifoAlgorithm {
    max_messages: usize,
    record_counts: bool,
}

impl FifoAlgorithm {
    pub fn new(max_messages: usize) -> Result<Self> {
        if max_messages == 0 {
            return Err(HistoryError::Configuration(
                "fifo max_messages must be a positive integer".to_string(),
            ));
        }
        Ok(Self {
            max_messages,
            record_counts: false,
        })
    }

    /// Record `message_count` and `<role>_count` in thread metadata on every append.
    pub fn with_message_counts(mut self) -> Self {
        self.record_counts = true;
        self
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }
}

impl HistoryAlgorithm for FifoAlgorithm {
    fn name(&self) -> &'static str {
        "fifo"
    }

    fn select_window(&self, messages: &[Message]) -> Vec<Message> {
        let system_count = messages.iter().filter(|m| m.is_system()).count();
        let budget = self.max_messages.saturating_sub(system_count);
        let conversational = messages.len() - system_count;
        let mut skip = conversational.saturating_sub(budget);

        messages
            .iter()
            .filter(|m| {
                if m.is_system() {
                    return true;
                }
                if skip > 0 {
                    skip -= 1;
                    return false;
                }
                true
            })
            .cloned()
            .collect()
    }

    fn post_process(&self, thread: &mut Thread, new_message: &Message) -> Result<()> {
        if !self.record_counts {
            return Ok(());
        }

        let role_total = thread
            .messages
            .iter()
            .filter(|m| m.role == new_message.role)
            .count();
        let total = thread.message_count();

        thread.metadata.insert(
            "message_count".to_string(),
            MetadataValue::Integer(total as i64),
        );
        thread.metadata.insert(
            format!("{}_count", new_message.role),
            MetadataValue::Integer(role_total as i64),
        );
        Ok(())
    }
}
