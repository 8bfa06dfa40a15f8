//! Context-selection algorithm contract.

use memex_models::{Message, Thread};

use crate::error::Result;

/// Pluggable policy deciding which messages reach a model call and how
/// thread metadata evolves as messages are appended.
///
/// Both hooks are synchronous and must not block on external resources.
pub trait HistoryAlgorithm: Send + Sync {
    /// Stable algorithm name for diagnostics.
    fn name(&self) -> &'static str;

    /// Select the context window from the full, chronologically ordered
    /// message list. Must be deterministic and must not reorder messages.
    fn select_window(&self, messages: &[Message]) -> Vec<Message>;

    /// Update `thread.metadata` after `new_message` has been appended.
    ///
    /// Implementations must not remove or reorder messages. Only
    /// configuration problems are reported as errors.
    fn post_process(&self, thread: &mut Thread, new_message: &Message) -> Result<()>;
}
