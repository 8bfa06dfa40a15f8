//! Error types for the history engine

use thiserror::Error;

/// History engine error types
#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("Thread not found: {0}")]
    ThreadNotFound(String),

    #[error("Thread already exists: {0}")]
    DuplicateThread(String),

    #[error("Storage connection error: {0}")]
    Connection(String),

    #[error("Storage integrity error: {0}")]
    Integrity(String),

    #[error("Storage operation error: {0}")]
    Operation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("{operation} failed for thread {thread_id}: {source}")]
    Context {
        operation: &'static str,
        thread_id: String,
        #[source]
        source: Box<HistoryError>,
    },
}

/// Coarse classification used by callers to decide between retry and abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Duplicate,
    Connection,
    Integrity,
    Operation,
    InvalidInput,
    Configuration,
    Serialization,
    Provider,
}

impl HistoryError {
    /// Classify the error, looking through context wrappers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ThreadNotFound(_) => ErrorKind::NotFound,
            Self::DuplicateThread(_) => ErrorKind::Duplicate,
            Self::Connection(_) => ErrorKind::Connection,
            Self::Integrity(_) => ErrorKind::Integrity,
            Self::Operation(_) => ErrorKind::Operation,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Provider(_) => ErrorKind::Provider,
            Self::Context { source, .. } => source.kind(),
        }
    }

    /// Transient failures a caller may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Connection | ErrorKind::Operation)
    }

    /// The innermost error with all context wrappers removed.
    pub fn root(&self) -> &HistoryError {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Attach the operation name and thread id.
    pub fn context(self, operation: &'static str, thread_id: impl Into<String>) -> Self {
        Self::Context {
            operation,
            thread_id: thread_id.into(),
            source: Box::new(self),
        }
    }
}

/// Extension for attaching operation context to results.
pub trait ResultExt<T> {
    fn context(self, operation: &'static str, thread_id: &str) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, operation: &'static str, thread_id: &str) -> Result<T> {
        self.map_err(|err| err.context(operation, thread_id))
    }
}

/// Result type alias for history operations
pub type Result<T> = std::result::Result<T, HistoryError>;
