//! Memex Core - conversation history engine.
//!
//! [`HistoryManager`] owns a [`ThreadStore`](memex_traits::ThreadStore) and
//! an optional [`HistoryAlgorithm`](memex_traits::HistoryAlgorithm) and is
//! the only component that mutates threads. [`HistoryRecorder`] wraps a
//! model provider so each exchange is recorded automatically.
//!
//! ```no_run
//! # async fn demo() -> memex_traits::Result<()> {
//! use memex_core::HistoryConfig;
//! use memex_models::Role;
//!
//! let manager = HistoryConfig::from_toml_str("[algorithm]\nmax_messages = 10")?.build()?;
//! manager.add_message("support-42", "Hi there", Role::User, None).await?;
//! let window = manager.get_context_window("support-42").await?;
//! # let _ = window;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod algorithm;
pub mod config;
pub mod locks;
pub mod logging;
pub mod manager;

pub use adapter::{ChatOutcome, HistoryRecorder};
pub use algorithm::{FifoAlgorithm, HistoryAlgorithm};
pub use config::{AlgorithmConfig, AlgorithmKind, HistoryConfig};
pub use locks::ThreadLocks;
pub use logging::init_tracing;
pub use manager::{HistoryManager, ManagerOptions};

// Re-export the shared types callers need alongside the manager.
pub use memex_models::{Message, Metadata, MetadataValue, NewMessage, Role, Thread};
pub use memex_storage::{DurableStore, StorageConfig, VolatileStore};
pub use memex_traits::{ChatProvider, HistoryError, Result, ThreadQuery, ThreadStore};
