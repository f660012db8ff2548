//! Records and per-record sync metadata.

use crate::payload::Payload;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Milliseconds since the Unix epoch.
pub type UnixMillis = i64;

/// Unique identifier for a record.
///
/// Record keys are UUIDs that are:
/// - Globally unique across devices
/// - Immutable once assigned
/// - Never reused, even after the record is deleted
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKey(Uuid);

impl RecordKey {
    /// Creates a new random record key.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a record key from a UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Parses a record key from its string form.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for RecordKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordKey({})", self.0)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RecordKey {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<RecordKey> for Uuid {
    fn from(key: RecordKey) -> Self {
        key.0
    }
}

/// Reconciliation status of a record against the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Local changes not yet pushed.
    Pending,
    /// Local and remote agree as of the last cycle.
    Synced,
    /// Divergence detected; awaiting manual resolution.
    Conflict,
    /// A push was permanently rejected; operator attention required.
    Failed,
}

impl SyncState {
    /// Returns a stable lowercase name for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Pending => "pending",
            SyncState::Synced => "synced",
            SyncState::Conflict => "conflict",
            SyncState::Failed => "failed",
        }
    }

    /// Returns true if automatic pushes are blocked in this state.
    pub fn blocks_push(&self) -> bool {
        matches!(self, SyncState::Conflict | SyncState::Failed)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Synchronization metadata carried by every record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMeta {
    /// Current reconciliation status.
    pub sync_state: SyncState,
    /// Remote-assigned identifier, absent until the first successful push.
    pub remote_id: Option<String>,
    /// Working version of the record.
    ///
    /// Starts at 1 and increases on every accepted local or remote
    /// update. Local edits bump it through a private counter not yet
    /// reconciled with the remote.
    pub remote_version: u64,
    /// Version last reconciled against the remote; 0 if never synced.
    ///
    /// Conflict detection compares an incoming remote version against
    /// this, not against `remote_version`, which local edits advance on
    /// their own.
    pub synced_version: u64,
    /// When the record last reconciled successfully, absent if never.
    pub last_synced_at: Option<UnixMillis>,
    /// When the record was last mutated locally.
    pub last_modified_at: UnixMillis,
}

impl SyncMeta {
    /// Metadata for a freshly created, never-synced record.
    pub fn pending(now: UnixMillis) -> Self {
        Self {
            sync_state: SyncState::Pending,
            remote_id: None,
            remote_version: 1,
            synced_version: 0,
            last_synced_at: None,
            last_modified_at: now,
        }
    }
}

/// A business record tracked by the engine.
///
/// Records are only mutated through the engine's entry points so that
/// queueing and metadata stay consistent with the data change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Globally unique identity used for synchronization.
    pub key: RecordKey,
    /// Application-supplied business key, unique among active records.
    pub natural_key: Option<String>,
    /// Current business data.
    pub payload: Payload,
    /// Payload as of the last successful reconciliation.
    ///
    /// Used as the common ancestor for three-way field diffs during
    /// conflict resolution. Absent until the record first syncs.
    pub base_payload: Option<Payload>,
    /// Sync metadata.
    pub meta: SyncMeta,
    /// Soft-delete tombstone. The row survives until the remote has been
    /// told about the deletion, but is hidden from normal queries.
    pub deleted: bool,
}

impl Record {
    /// Creates a new pending record.
    pub fn new(payload: Payload, natural_key: Option<String>, now: UnixMillis) -> Self {
        Self {
            key: RecordKey::new(),
            natural_key,
            payload,
            base_payload: None,
            meta: SyncMeta::pending(now),
            deleted: false,
        }
    }

    /// Returns true if the record is visible to normal queries.
    pub fn is_active(&self) -> bool {
        !self.deleted
    }

    /// Returns true if the record has local changes awaiting push.
    pub fn has_pending_changes(&self) -> bool {
        self.meta.sync_state == SyncState::Pending
    }

    /// Marks the record as reconciled with the remote.
    ///
    /// Sets the base payload to the current payload so future conflict
    /// detection diffs against this point.
    pub fn mark_synced(&mut self, remote_id: String, remote_version: u64, now: UnixMillis) {
        self.meta.sync_state = SyncState::Synced;
        self.meta.remote_id = Some(remote_id);
        self.meta.remote_version = remote_version;
        self.meta.synced_version = remote_version;
        self.meta.last_synced_at = Some(now);
        self.base_payload = Some(self.payload.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_unique() {
        assert_ne!(RecordKey::new(), RecordKey::new());
    }

    #[test]
    fn key_parse_roundtrip() {
        let key = RecordKey::new();
        let parsed = RecordKey::parse(&key.to_string()).unwrap();
        assert_eq!(parsed, key);

        assert!(RecordKey::parse("not-a-uuid").is_none());
    }

    #[test]
    fn sync_state_names() {
        assert_eq!(SyncState::Pending.as_str(), "pending");
        assert_eq!(SyncState::Conflict.as_str(), "conflict");
    }

    #[test]
    fn blocked_states() {
        assert!(SyncState::Conflict.blocks_push());
        assert!(SyncState::Failed.blocks_push());
        assert!(!SyncState::Pending.blocks_push());
        assert!(!SyncState::Synced.blocks_push());
    }

    #[test]
    fn new_record_is_pending() {
        let record = Record::new(Payload::default(), None, 1_000);

        assert!(record.is_active());
        assert!(record.has_pending_changes());
        assert_eq!(record.meta.remote_version, 1);
        assert_eq!(record.meta.synced_version, 0);
        assert!(record.meta.remote_id.is_none());
        assert!(record.meta.last_synced_at.is_none());
        assert_eq!(record.meta.last_modified_at, 1_000);
    }

    #[test]
    fn mark_synced_pins_base_payload() {
        let payload = Payload::default().with_text("name", "a");
        let mut record = Record::new(payload.clone(), None, 1_000);

        record.mark_synced("r-1".into(), 3, 2_000);

        assert_eq!(record.meta.sync_state, SyncState::Synced);
        assert_eq!(record.meta.remote_id.as_deref(), Some("r-1"));
        assert_eq!(record.meta.remote_version, 3);
        assert_eq!(record.meta.synced_version, 3);
        assert_eq!(record.meta.last_synced_at, Some(2_000));
        assert_eq!(record.base_payload, Some(payload));
    }
}
