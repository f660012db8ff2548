//! Error types for the sync engine.

use thiserror::Error;
use tidemark_protocol::RecordKey;
use tidemark_store::StoreError;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur in engine operations.
///
/// Local CRUD errors (`DuplicateNaturalKey`, `NotFound` via
/// [`EngineError::Store`]) surface synchronously to the caller.
/// Sync-time failures never do; they are recorded against sync metadata
/// and observed through the status surface instead.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Local store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A sync cycle is already running; re-entrant triggers are no-ops.
    #[error("sync already in progress")]
    SyncInProgress,

    /// The engine has been shut down.
    #[error("engine is shut down")]
    ShutDown,

    /// No open conflict exists for the record.
    #[error("no open conflict for record {key}")]
    NoOpenConflict {
        /// The key that was looked up.
        key: RecordKey,
    },
}

impl EngineError {
    /// Returns true for the duplicate-natural-key CRUD rejection.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(
            self,
            EngineError::Store(StoreError::DuplicateNaturalKey { .. })
        )
    }

    /// Returns true for the unknown-record CRUD rejection.
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::Store(StoreError::NotFound { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_helpers() {
        let err = EngineError::Store(StoreError::DuplicateNaturalKey {
            natural_key: "x".into(),
        });
        assert!(err.is_duplicate_key());
        assert!(!err.is_not_found());

        let err = EngineError::Store(StoreError::NotFound {
            key: RecordKey::new(),
        });
        assert!(err.is_not_found());

        assert!(!EngineError::SyncInProgress.is_duplicate_key());
    }
}
