//! Memex Storage - thread persistence backends.
//!
//! Two implementations of [`memex_traits::ThreadStore`]:
//! - [`VolatileStore`]: process-local map, lost on exit
//! - [`DurableStore`]: redb database, in memory or in a single file
//!
//! [`StorageConfig`] picks and opens one of them.

pub mod config;
pub mod durable;
pub mod volatile;

pub use config::{BackendKind, ConnectionTarget, StorageConfig};
pub use durable::DurableStore;
pub use volatile::VolatileStore;
