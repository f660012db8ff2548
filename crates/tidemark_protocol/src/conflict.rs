//! Conflict records for local/remote divergence.

use crate::payload::Payload;
use crate::record::{RecordKey, UnixMillis};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How the two sides diverged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Both sides updated the record.
    UpdateUpdate,
    /// One side updated while the other deleted.
    UpdateDelete,
    /// Both sides created a record under the same key.
    CreateCreate,
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictType::UpdateUpdate => f.write_str("update-update"),
            ConflictType::UpdateDelete => f.write_str("update-delete"),
            ConflictType::CreateCreate => f.write_str("create-create"),
        }
    }
}

/// How a conflict was, or must be, resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Disjoint changes merged field-by-field.
    FieldMerge,
    /// The local version won.
    LocalWins,
    /// The remote version won.
    RemoteWins,
    /// Not auto-resolvable; persisted for an operator.
    ManualReview,
}

impl ResolutionStrategy {
    /// Returns true if this strategy resolves without an operator.
    pub fn is_automatic(&self) -> bool {
        !matches!(self, ResolutionStrategy::ManualReview)
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionStrategy::FieldMerge => f.write_str("field-merge"),
            ResolutionStrategy::LocalWins => f.write_str("local-wins"),
            ResolutionStrategy::RemoteWins => f.write_str("remote-wins"),
            ResolutionStrategy::ManualReview => f.write_str("manual-review"),
        }
    }
}

/// The side an operator picks when resolving a manual-review conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionChoice {
    /// Keep the local version and push it to the remote.
    KeepLocal,
    /// Accept the remote version, discarding local changes.
    AcceptRemote,
}

/// A detected divergence between local and remote versions of a record.
///
/// Auto-resolved conflicts are discarded after application; manual-review
/// conflicts persist until an operator resolves them, and block further
/// automatic pushes for the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Key of the conflicted record.
    pub record_key: RecordKey,
    /// Local payload at detection time.
    pub local_snapshot: Payload,
    /// Remote payload at detection time (absent for a remote deletion).
    pub remote_snapshot: Option<Payload>,
    /// Remote version at detection time (absent for a remote deletion).
    ///
    /// Kept so a keep-local resolution can push against the version the
    /// operator actually reviewed.
    pub remote_version: Option<u64>,
    /// Shape of the divergence.
    pub conflict_type: ConflictType,
    /// Strategy applied, or `ManualReview` while unresolved.
    pub resolution_strategy: ResolutionStrategy,
    /// When the divergence was detected.
    pub detected_at: UnixMillis,
    /// When the conflict was resolved, absent while open.
    pub resolved_at: Option<UnixMillis>,
}

impl ConflictRecord {
    /// Creates an open conflict awaiting manual review.
    pub fn manual(
        record_key: RecordKey,
        local_snapshot: Payload,
        remote_snapshot: Option<Payload>,
        remote_version: Option<u64>,
        conflict_type: ConflictType,
        now: UnixMillis,
    ) -> Self {
        Self {
            record_key,
            local_snapshot,
            remote_snapshot,
            remote_version,
            conflict_type,
            resolution_strategy: ResolutionStrategy::ManualReview,
            detected_at: now,
            resolved_at: None,
        }
    }

    /// Returns true if the conflict still awaits an operator.
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }

    /// Marks the conflict resolved with the given strategy.
    pub fn resolve(&mut self, strategy: ResolutionStrategy, now: UnixMillis) {
        self.resolution_strategy = strategy;
        self.resolved_at = Some(now);
    }
}
