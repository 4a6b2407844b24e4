//! Error types for the DPD engine.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, DpdError>;

#[derive(Error, Debug)]
pub enum DpdError {
    /// Invalid configuration or constructor argument, raised at construction.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Cache replay or recording requested from an engine built without a pair cache.
    #[error("Pair cache requested but caching is inactive for this engine")]
    CacheInactive,

    /// Cache replay requested for a different position snapshot.
    #[error("Pair cache is stale: recorded for snapshot {cached:?}, current snapshot is {current}")]
    CacheStale { cached: Option<u64>, current: u64 },

    /// Pass without cell assignment requested while the linked list is out of date.
    #[error("Cell linked list is stale: built for snapshot {built:?}, current snapshot is {current}")]
    CellListStale { built: Option<u64>, current: u64 },

    /// Failure inside a worker task; aborts the whole pass.
    #[error("Computation failed in {context}: {message}")]
    Computation { context: String, message: String },

    /// Internal invariant violated by the caller.
    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Snapshot encoding error: {0}")]
    Snapshot(#[from] bincode::Error),

    #[error("Snapshot JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DpdError {
    pub fn config(message: impl Into<String>) -> Self {
        DpdError::Config(message.into())
    }

    pub fn computation(context: impl Into<String>, message: impl Into<String>) -> Self {
        DpdError::Computation {
            context: context.into(),
            message: message.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        DpdError::Invariant(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_names_argument() {
        let err = DpdError::config("cutoff must be positive, got -1");
        assert_eq!(
            err.to_string(),
            "Configuration error: cutoff must be positive, got -1"
        );
    }

    #[test]
    fn stale_cache_reports_both_snapshots() {
        let err = DpdError::CacheStale {
            cached: Some(3),
            current: 4,
        };
        let msg = err.to_string();
        assert!(msg.contains("Some(3)"));
        assert!(msg.contains('4'));
    }

    #[test]
    fn computation_error_carries_context() {
        let err = DpdError::computation("pair pass", "worker panicked");
        assert!(matches!(err, DpdError::Computation { .. }));
        assert!(err.to_string().contains("pair pass"));
    }
}
