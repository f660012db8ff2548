//! Error types for the local store.

use std::io;
use thiserror::Error;
use tidemark_protocol::RecordKey;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in local store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error from the storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// CBOR encode/decode error.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// Journal is corrupted or invalid.
    #[error("journal corruption: {message}")]
    JournalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Frame checksum did not match its contents.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// Another process holds the journal lock.
    #[error("store locked: another process has exclusive access")]
    StoreLocked,

    /// A record with the same natural key is already active.
    #[error("duplicate natural key: {natural_key}")]
    DuplicateNaturalKey {
        /// The conflicting business key.
        natural_key: String,
    },

    /// No record exists under the given key.
    #[error("record not found: {key}")]
    NotFound {
        /// The key that was looked up.
        key: RecordKey,
    },

    /// No queued operation exists under the given ID.
    #[error("unknown operation: {op_id}")]
    UnknownOperation {
        /// The operation ID that was looked up.
        op_id: u64,
    },

    /// A create was attempted with no fields set.
    #[error("payload has no fields")]
    EmptyPayload,
}

impl StoreError {
    /// Creates a codec error from any encode/decode failure.
    pub fn codec(message: impl ToString) -> Self {
        Self::Codec {
            message: message.to_string(),
        }
    }

    /// Creates a journal corruption error.
    pub fn journal_corruption(message: impl Into<String>) -> Self {
        Self::JournalCorruption {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let err = StoreError::DuplicateNaturalKey {
            natural_key: "MH12AB1234".into(),
        };
        assert!(err.to_string().contains("MH12AB1234"));

        let err = StoreError::ChecksumMismatch {
            expected: 0xDEAD_BEEF,
            actual: 0,
        };
        assert!(err.to_string().contains("deadbeef"));
    }
}
