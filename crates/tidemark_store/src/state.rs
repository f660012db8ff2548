//! In-memory projection of the journal.

use crate::journal::JournalEntry;
use std::collections::{BTreeMap, HashMap};
use tidemark_protocol::{Checkpoint, ConflictRecord, QueuedOperation, Record, RecordKey};

/// Normalizes a natural business key for uniqueness comparison.
///
/// Trimmed and uppercased, matching how the application layer is
/// expected to normalize user-supplied composite keys.
pub(crate) fn normalize_natural_key(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// The live store state, rebuilt by replaying the journal.
///
/// Holds records keyed by record key, the operation queue keyed by
/// operation ID, the pull checkpoint, persisted conflicts, and two
/// secondary indexes (natural key over active records, remote ID over
/// all rows including tombstones).
#[derive(Debug, Default)]
pub(crate) struct StoreState {
    pub(crate) records: BTreeMap<RecordKey, Record>,
    pub(crate) ops: BTreeMap<u64, QueuedOperation>,
    pub(crate) conflicts: BTreeMap<RecordKey, ConflictRecord>,
    pub(crate) checkpoint: Checkpoint,
    pub(crate) next_op_id: u64,
    natural_index: HashMap<String, RecordKey>,
    remote_index: HashMap<String, RecordKey>,
}

impl StoreState {
    pub(crate) fn new() -> Self {
        Self {
            next_op_id: 1,
            ..Self::default()
        }
    }

    /// Applies one journal entry to the projection.
    pub(crate) fn apply(&mut self, entry: &JournalEntry) {
        match entry {
            JournalEntry::RecordPut(record) => {
                if let Some(old) = self.records.get(&record.key).cloned() {
                    self.unindex(&old);
                }
                self.index(record);
                self.records.insert(record.key, record.clone());
            }
            JournalEntry::RecordRemove(key) => {
                if let Some(old) = self.records.remove(key) {
                    self.unindex(&old);
                }
            }
            JournalEntry::OpPut(op) => {
                self.next_op_id = self.next_op_id.max(op.op_id + 1);
                self.ops.insert(op.op_id, op.clone());
            }
            JournalEntry::OpRemove(op_id) => {
                self.ops.remove(op_id);
            }
            JournalEntry::CheckpointSet(checkpoint) => {
                self.checkpoint = checkpoint.clone();
            }
            JournalEntry::ConflictPut(conflict) => {
                self.conflicts.insert(conflict.record_key, conflict.clone());
            }
            JournalEntry::ConflictRemove(key) => {
                self.conflicts.remove(key);
            }
        }
    }

    /// Captures the full live state as one snapshot batch for compaction.
    pub(crate) fn snapshot(&self) -> Vec<JournalEntry> {
        let mut batch = Vec::new();
        for record in self.records.values() {
            batch.push(JournalEntry::RecordPut(record.clone()));
        }
        for op in self.ops.values() {
            batch.push(JournalEntry::OpPut(op.clone()));
        }
        for conflict in self.conflicts.values() {
            batch.push(JournalEntry::ConflictPut(conflict.clone()));
        }
        batch.push(JournalEntry::CheckpointSet(self.checkpoint.clone()));
        batch
    }

    /// Looks up the active record holding a natural key.
    pub(crate) fn by_natural_key(&self, normalized: &str) -> Option<&Record> {
        self.natural_index
            .get(normalized)
            .and_then(|key| self.records.get(key))
    }

    /// Looks up a record (tombstones included) by its remote ID.
    pub(crate) fn by_remote_id(&self, remote_id: &str) -> Option<&Record> {
        self.remote_index
            .get(remote_id)
            .and_then(|key| self.records.get(key))
    }

    /// Returns open (pending or in-flight) operations for a key, in
    /// operation-ID order.
    pub(crate) fn open_ops_for(&self, key: RecordKey) -> Vec<&QueuedOperation> {
        self.ops
            .values()
            .filter(|op| op.record_key == key && op.status.is_open())
            .collect()
    }

    fn index(&mut self, record: &Record) {
        if record.is_active() {
            if let Some(natural) = &record.natural_key {
                self.natural_index
                    .insert(normalize_natural_key(natural), record.key);
            }
        }
        if let Some(remote_id) = &record.meta.remote_id {
            self.remote_index.insert(remote_id.clone(), record.key);
        }
    }

    fn unindex(&mut self, record: &Record) {
        if let Some(natural) = &record.natural_key {
            let normalized = normalize_natural_key(natural);
            if self.natural_index.get(&normalized) == Some(&record.key) {
                self.natural_index.remove(&normalized);
            }
        }
        if let Some(remote_id) = &record.meta.remote_id {
            if self.remote_index.get(remote_id) == Some(&record.key) {
                self.remote_index.remove(remote_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemark_protocol::Payload;

    fn record_with_natural(natural: &str) -> Record {
        Record::new(
            Payload::default().with_text("name", "x"),
            Some(natural.to_string()),
            10,
        )
    }

    #[test]
    fn normalization() {
        assert_eq!(normalize_natural_key("  mh12ab1234 "), "MH12AB1234");
    }

    #[test]
    fn natural_index_tracks_active_records() {
        let mut state = StoreState::new();
        let record = record_with_natural("ab-1");

        state.apply(&JournalEntry::RecordPut(record.clone()));
        assert!(state.by_natural_key("AB-1").is_some());

        // Tombstoning releases the natural key.
        let mut deleted = record.clone();
        deleted.deleted = true;
        state.apply(&JournalEntry::RecordPut(deleted));
        assert!(state.by_natural_key("AB-1").is_none());
    }

    #[test]
    fn remote_index_includes_tombstones() {
        let mut state = StoreState::new();
        let mut record = record_with_natural("ab-2");
        record.meta.remote_id = Some("r-9".into());
        record.deleted = true;

        state.apply(&JournalEntry::RecordPut(record.clone()));
        assert_eq!(state.by_remote_id("r-9").map(|r| r.key), Some(record.key));
    }

    #[test]
    fn next_op_id_advances_past_replayed_ops() {
        let mut state = StoreState::new();
        let op = QueuedOperation::delete(7, RecordKey::new(), 3, 10);

        state.apply(&JournalEntry::OpPut(op));
        assert_eq!(state.next_op_id, 8);

        state.apply(&JournalEntry::OpRemove(7));
        // IDs are never reused, even after removal.
        assert_eq!(state.next_op_id, 8);
    }

    #[test]
    fn snapshot_roundtrip() {
        let mut state = StoreState::new();
        let record = record_with_natural("ab-3");
        state.apply(&JournalEntry::RecordPut(record));
        state.apply(&JournalEntry::OpPut(QueuedOperation::delete(
            1,
            RecordKey::new(),
            3,
            10,
        )));
        state.apply(&JournalEntry::CheckpointSet(Checkpoint::new("c")));

        let mut rebuilt = StoreState::new();
        for entry in state.snapshot() {
            rebuilt.apply(&entry);
        }

        assert_eq!(rebuilt.records.len(), 1);
        assert_eq!(rebuilt.ops.len(), 1);
        assert_eq!(rebuilt.checkpoint, Checkpoint::new("c"));
        assert!(rebuilt.by_natural_key("AB-3").is_some());
    }

    #[test]
    fn open_ops_in_id_order() {
        let mut state = StoreState::new();
        let key = RecordKey::new();

        for id in [3u64, 1, 2] {
            state.apply(&JournalEntry::OpPut(QueuedOperation::delete(id, key, 3, 10)));
        }

        let ids: Vec<u64> = state.open_ops_for(key).iter().map(|op| op.op_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
