//! Memex Traits - shared contracts for the history engine.
//!
//! This crate provides the interfaces the rest of the workspace is built on:
//! - `HistoryError` taxonomy and `Result` alias
//! - `ThreadStore` storage contract plus `ThreadQuery` search filter
//! - `HistoryAlgorithm` context-selection contract
//! - `ChatProvider` model-provider boundary

pub mod algorithm;
pub mod error;
pub mod provider;
pub mod store;

// Error types
pub use error::{ErrorKind, HistoryError, Result, ResultExt};

// Algorithm contract
pub use algorithm::HistoryAlgorithm;

// Provider boundary
pub use provider::{ChatProvider, ProviderChoice, ProviderMessage, ProviderRequest, ProviderResponse};

// Store contract
pub use store::{
    ThreadQuery, ThreadStore, listing_order, paginate, validate_for_save, validate_page,
    validate_thread_id,
};
