//! Memex Models - thread and message types shared across the workspace.
//!
//! These types are storage-agnostic: every backend persists exactly these
//! structures, and the history manager hands copies of them to callers.

pub mod message;
pub mod metadata;
pub mod thread;

pub use message::{Message, NewMessage, Role};
pub use metadata::{Metadata, MetadataValue};
pub use thread::Thread;
