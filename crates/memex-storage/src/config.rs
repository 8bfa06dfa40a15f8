//! Storage backend configuration.

use memex_traits::{HistoryError, Result, ThreadStore};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::durable::DurableStore;
use crate::volatile::VolatileStore;

/// Which backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Volatile,
    Durable,
}

/// Where a durable store keeps its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionTarget {
    /// Transactional store held in process memory.
    InMemory,
    /// Single database file on local disk.
    File(PathBuf),
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: BackendKind,
    /// Database file for the durable backend. In-memory when absent.
    pub path: Option<PathBuf>,
    /// Per-thread message cap applied on save.
    pub max_messages: Option<usize>,
}

impl StorageConfig {
    pub fn volatile() -> Self {
        Self::default()
    }

    pub fn durable(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendKind::Durable,
            path: Some(path.into()),
            max_messages: None,
        }
    }

    pub fn with_max_messages(mut self, max_messages: usize) -> Self {
        self.max_messages = Some(max_messages);
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        validate_cap(self.max_messages)?;

        if self.backend == BackendKind::Volatile && self.path.is_some() {
            return Err(HistoryError::Configuration(
                "the volatile backend does not accept a path".to_string(),
            ));
        }

        if let Some(path) = &self.path
            && path.as_os_str().is_empty()
        {
            return Err(HistoryError::Configuration(
                "database path cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn target(&self) -> ConnectionTarget {
        match &self.path {
            Some(path) => ConnectionTarget::File(path.clone()),
            None => ConnectionTarget::InMemory,
        }
    }

    /// Construct the configured backend.
    pub fn open(&self) -> Result<Arc<dyn ThreadStore>> {
        self.validate()?;
        let store: Arc<dyn ThreadStore> = match self.backend {
            BackendKind::Volatile => Arc::new(VolatileStore::with_max_messages(self.max_messages)?),
            BackendKind::Durable => {
                Arc::new(DurableStore::open(&self.target(), self.max_messages)?)
            }
        };
        Ok(store)
    }
}

/// A message cap, when present, must be positive.
pub(crate) fn validate_cap(max_messages: Option<usize>) -> Result<()> {
    if max_messages == Some(0) {
        return Err(HistoryError::Configuration(
            "max_messages must be a positive integer".to_string(),
        ));
    }
    Ok(())
}
