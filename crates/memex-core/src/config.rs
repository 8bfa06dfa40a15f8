//! File-based engine configuration.
//!
//! ```toml
//! [storage]
//! backend = "durable"
//! path = "data/memex.redb"
//! max_messages = 500
//!
//! [algorithm]
//! kind = "fifo"
//! max_messages = 50
//! record_counts = false
//!
//! [manager]
//! implicit_create = true
//! ```

use memex_storage::StorageConfig;
use memex_traits::{HistoryAlgorithm, HistoryError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::algorithm::FifoAlgorithm;
use crate::manager::{HistoryManager, ManagerOptions};

const DEFAULT_WINDOW: usize = 50;

/// Which context algorithm to install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AlgorithmKind {
    /// Pass the full history through.
    None,
    #[default]
    Fifo,
}

/// Algorithm section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlgorithmConfig {
    pub kind: AlgorithmKind,
    /// Context window size.
    pub max_messages: usize,
    /// Maintain message counters in thread metadata.
    pub record_counts: bool,
}

impl Default for AlgorithmConfig {
    fn default() -> Self {
        Self {
            kind: AlgorithmKind::default(),
            max_messages: DEFAULT_WINDOW,
            record_counts: false,
        }
    }
}

impl AlgorithmConfig {
    pub fn build(&self) -> Result<Option<Arc<dyn HistoryAlgorithm>>> {
        match self.kind {
            AlgorithmKind::None => Ok(None),
            AlgorithmKind::Fifo => {
                let mut fifo = FifoAlgorithm::new(self.max_messages)?;
                if self.record_counts {
                    fifo = fifo.with_message_counts();
                }
                Ok(Some(Arc::new(fifo)))
            }
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HistoryConfig {
    pub storage: StorageConfig,
    pub algorithm: AlgorithmConfig,
    pub manager: ManagerOptions,
}

impl HistoryConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| HistoryError::Configuration(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            HistoryError::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.storage.validate()?;
        if self.algorithm.kind == AlgorithmKind::Fifo && self.algorithm.max_messages == 0 {
            return Err(HistoryError::Configuration(
                "algorithm.max_messages must be a positive integer".to_string(),
            ));
        }
        Ok(())
    }

    /// Open storage and assemble a manager.
    pub fn build(&self) -> Result<HistoryManager> {
        self.validate()?;
        let store = self.storage.open()?;
        let mut manager = HistoryManager::new(store).with_options(self.manager);
        if let Some(algorithm) = self.algorithm.build()? {
            manager = manager.with_algorithm(algorithm);
        }

        info!(
            backend = manager.store().backend_name(),
            algorithm = manager.algorithm().map(|a| a.name()).unwrap_or("none"),
            "History manager ready"
        );
        Ok(manager)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memex_storage::BackendKind;

    #[test]
    fn empty_document_uses_defaults() {
        let config = HistoryConfig::from_toml_str("").unwrap();
        assert_eq!(config, HistoryConfig::default());
        assert_eq!(config.algorithm.max_messages, DEFAULT_WINDOW);
        assert!(config.manager.implicit_create);
    }

    #[test]
    fn parses_full_document() {
        let config = HistoryConfig::from_toml_str(
            r#"
            [storage]
            backend = "durable"
            path = "data/memex.redb"
            max_messages = 500

            [algorithm]
            kind = "fifo"
            max_messages = 20
            record_counts = true

            [manager]
            implicit_create = false
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.backend, BackendKind::Durable);
        assert_eq!(config.storage.max_messages, Some(500));
        assert_eq!(config.algorithm.max_messages, 20);
        assert!(config.algorithm.record_counts);
        assert!(!config.manager.implicit_create);
    }

    #[test]
    fn rejects_zero_window() {
        let err = HistoryConfig::from_toml_str("[algorithm]\nmax_messages = 0\n").unwrap_err();
        assert!(matches!(err, HistoryError::Configuration(_)));
    }

    #[test]
    fn rejects_unknown_backend() {
        assert!(HistoryConfig::from_toml_str("[storage]\nbackend = \"cloud\"\n").is_err());
    }

    #[test]
    fn algorithm_can_be_disabled() {
        let config = HistoryConfig::from_toml_str("[algorithm]\nkind = \"none\"\n").unwrap();
        let manager = config.build().unwrap();
        assert!(manager.algorithm().is_none());
        assert_eq!(manager.store().backend_name(), "volatile");
    }
}
