//! Tracing subscriber setup for binaries and tests embedding the engine.

use memex_traits::{HistoryError, Result};
use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber filtered by `filter`
/// (e.g. `"warn,memex_storage=debug"`).
///
/// Returns an error for an unparsable filter or when a global subscriber is
/// already installed.
pub fn init_tracing(filter: &str) -> Result<()> {
    let filter = EnvFilter::try_new(filter)
        .map_err(|e| HistoryError::Configuration(format!("invalid log filter: {e}")))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .try_init()
        .map_err(|e| HistoryError::Configuration(format!("failed to install subscriber: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_filter() {
        let err = init_tracing("memex_core=loud").unwrap_err();
        assert!(matches!(err, HistoryError::Configuration(_)));
    }
}
