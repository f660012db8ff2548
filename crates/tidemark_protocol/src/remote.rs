//! Wire shapes exchanged with the remote authority.

use crate::payload::Payload;
use crate::record::{RecordKey, UnixMillis};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque cursor marking how far the pull phase has consumed remote
/// changes.
///
/// The remote defines the cursor's contents; the engine only stores and
/// echoes it back on the next pull.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checkpoint(String);

impl Checkpoint {
    /// The initial checkpoint, before any pull has completed.
    pub fn initial() -> Self {
        Self(String::new())
    }

    /// Creates a checkpoint from an opaque cursor string.
    pub fn new(cursor: impl Into<String>) -> Self {
        Self(cursor.into())
    }

    /// Returns the raw cursor string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if no pull has ever completed.
    pub fn is_initial(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self::initial()
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_initial() {
            f.write_str("(initial)")
        } else {
            f.write_str(&self.0)
        }
    }
}

/// Acknowledgement returned by the remote for a successful push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAck {
    /// Remote-assigned identifier for the record.
    pub remote_id: String,
    /// Version the remote now holds.
    pub remote_version: u64,
}

/// One remote-side change reported by the pull phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteChange {
    /// Remote-assigned identifier.
    pub remote_id: String,
    /// The record's globally unique key. The remote learns it from the
    /// original create push and echoes it back, which is what lets a
    /// replayed create deduplicate.
    pub record_key: RecordKey,
    /// Version of this change on the remote.
    pub remote_version: u64,
    /// New payload, or `None` if the record was deleted remotely.
    pub payload: Option<Payload>,
    /// Natural business key, if the remote tracks one for this record.
    pub natural_key: Option<String>,
    /// When the remote recorded the change.
    pub modified_at: UnixMillis,
}

impl RemoteChange {
    /// Returns true if this change is a remote deletion.
    pub fn is_deletion(&self) -> bool {
        self.payload.is_none()
    }
}

/// A page of remote changes since a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeBatch {
    /// Changes in remote commit order.
    pub changes: Vec<RemoteChange>,
    /// Cursor to persist once every change in this batch is applied.
    pub checkpoint: Checkpoint,
    /// True if more changes are available past `checkpoint`.
    pub has_more: bool,
}

impl ChangeBatch {
    /// An empty batch that leaves the checkpoint where it was.
    pub fn empty(checkpoint: Checkpoint) -> Self {
        Self {
            changes: Vec::new(),
            checkpoint,
            has_more: false,
        }
    }
}
