//! The durable local store: records, operation queue, checkpoint,
//! and persisted conflicts behind one journal.

use crate::backend::{FileBackend, InMemoryBackend, StorageBackend};
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::journal::{Journal, JournalEntry};
use crate::state::{normalize_natural_key, StoreState};
use parking_lot::Mutex;
use std::path::Path;
use tidemark_protocol::{
    Checkpoint, ConflictRecord, OperationKind, OperationStatus, Payload, QueuedOperation, Record,
    RecordKey, RemoteAck, RemoteChange, ResolutionChoice, SyncState, UnixMillis,
};
use tracing::{debug, warn};

/// Priority for pushes produced by conflict resolution, so a resolved
/// record drains ahead of routine traffic in the same readiness window.
const RESOLUTION_PRIORITY: i32 = 10;

/// Filter for [`LocalStore::list`].
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Restrict to records in these sync states. `None` means all.
    pub states: Option<Vec<SyncState>>,
    /// Include soft-deleted tombstones.
    pub include_deleted: bool,
}

impl ListFilter {
    /// Matches every active record.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restricts to the given sync state.
    #[must_use]
    pub fn with_state(mut self, state: SyncState) -> Self {
        self.states.get_or_insert_with(Vec::new).push(state);
        self
    }
}

/// What applying a remote change did locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteApplied {
    /// A new local record was created.
    Created,
    /// An existing local record was overwritten.
    Updated,
    /// The local record was removed.
    Deleted,
    /// Nothing to do (e.g. deletion of a record never seen locally).
    Skipped,
}

struct Inner {
    journal: Journal,
    state: StoreState,
}

impl Inner {
    /// Commits a batch to the journal, then applies it to the projection.
    fn commit(&mut self, batch: Vec<JournalEntry>) -> StoreResult<()> {
        self.journal.commit(&batch)?;
        for entry in &batch {
            self.state.apply(entry);
        }
        Ok(())
    }
}

/// The durable local record store and operation queue.
///
/// Every mutating call is one atomic journal commit: the record change
/// and its queue consequence land in the same frame, so a crash can
/// never persist one without the other. All access runs under one
/// short-lived lock per call; no lock spans network I/O.
pub struct LocalStore {
    inner: Mutex<Inner>,
    config: StoreConfig,
}

impl LocalStore {
    /// Opens a store over the given backend, replaying its journal.
    ///
    /// Recovery runs before this returns: a torn journal tail is
    /// truncated, operations stranded in flight by a crash return to
    /// pending, and operations referencing a missing record are dropped
    /// and logged.
    pub fn open(backend: Box<dyn StorageBackend>, config: StoreConfig) -> StoreResult<Self> {
        let mut journal = Journal::new(backend);
        let mut state = StoreState::new();
        for batch in journal.replay()? {
            for entry in &batch {
                state.apply(entry);
            }
        }

        let mut inner = Inner { journal, state };
        Self::repair(&mut inner)?;

        Ok(Self {
            inner: Mutex::new(inner),
            config,
        })
    }

    /// Opens an ephemeral in-memory store (tests, previews).
    pub fn open_in_memory(config: StoreConfig) -> StoreResult<Self> {
        Self::open(Box::new(InMemoryBackend::new()), config)
    }

    /// Opens or creates a journal file at the given path.
    pub fn open_at_path(path: &Path, config: StoreConfig) -> StoreResult<Self> {
        Self::open(Box::new(FileBackend::open(path)?), config)
    }

    fn repair(inner: &mut Inner) -> StoreResult<()> {
        let mut batch = Vec::new();

        for op in inner.state.ops.values() {
            if !inner.state.records.contains_key(&op.record_key) {
                warn!(op_id = op.op_id, key = %op.record_key, "dropping orphaned operation");
                batch.push(JournalEntry::OpRemove(op.op_id));
                continue;
            }
            if op.status == OperationStatus::InFlight {
                debug!(op_id = op.op_id, "returning stranded in-flight operation to pending");
                let mut repaired = op.clone();
                repaired.status = OperationStatus::Pending;
                repaired.dispatched_at = None;
                batch.push(JournalEntry::OpPut(repaired));
            }
        }

        if !batch.is_empty() {
            inner.commit(batch)?;
        }
        Ok(())
    }

    // === Record CRUD ===

    /// Creates a record and enqueues its push in one transaction.
    pub fn create(
        &self,
        payload: Payload,
        natural_key: Option<String>,
        now: UnixMillis,
    ) -> StoreResult<Record> {
        if payload.is_empty() {
            return Err(StoreError::EmptyPayload);
        }

        let mut inner = self.inner.lock();

        if let Some(natural) = &natural_key {
            let normalized = normalize_natural_key(natural);
            if inner.state.by_natural_key(&normalized).is_some() {
                return Err(StoreError::DuplicateNaturalKey {
                    natural_key: natural.clone(),
                });
            }
        }

        let record = Record::new(payload.clone(), natural_key, now);
        let op = QueuedOperation::create(
            inner.state.next_op_id,
            record.key,
            payload,
            self.config.max_retries,
            now,
        );

        inner.commit(vec![
            JournalEntry::RecordPut(record.clone()),
            JournalEntry::OpPut(op),
        ])?;
        Ok(record)
    }

    /// Applies a partial payload update and enqueues (or coalesces) the
    /// corresponding push.
    ///
    /// When a pending, not-yet-in-flight create or update already waits
    /// for this key, the new snapshot replaces its payload instead of
    /// growing the queue.
    pub fn update(&self, key: RecordKey, patch: Payload, now: UnixMillis) -> StoreResult<Record> {
        let mut inner = self.inner.lock();

        let mut record = match inner.state.records.get(&key) {
            Some(r) if r.is_active() => r.clone(),
            _ => return Err(StoreError::NotFound { key }),
        };

        record.payload.apply(&patch);
        // An edit while a conflict awaits review stays blocked; the
        // refined local side pushes once the conflict is resolved.
        if record.meta.sync_state != SyncState::Conflict {
            record.meta.sync_state = SyncState::Pending;
        }
        record.meta.last_modified_at = now;
        record.meta.remote_version += 1;

        let snapshot = record.payload.clone();
        let mut batch = vec![JournalEntry::RecordPut(record.clone())];

        // A fresh edit supersedes a terminally failed push for this key.
        for op in inner.state.ops.values() {
            if op.record_key == key && op.status == OperationStatus::Failed {
                batch.push(JournalEntry::OpRemove(op.op_id));
            }
        }

        let open: Vec<QueuedOperation> = inner
            .state
            .open_ops_for(key)
            .into_iter()
            .cloned()
            .collect();

        let coalesce_target = open.iter().find(|op| {
            op.status == OperationStatus::Pending && op.kind != OperationKind::Delete
        });

        if let Some(existing) = coalesce_target {
            let mut replaced = existing.clone();
            replaced.payload = Some(snapshot);
            batch.push(JournalEntry::OpPut(replaced));
        } else {
            let has_upsert_in_flight = open.iter().any(|op| op.kind != OperationKind::Delete);
            let kind = if record.meta.remote_id.is_some() || has_upsert_in_flight {
                OperationKind::Update
            } else {
                OperationKind::Create
            };
            let op_id = inner.state.next_op_id;
            let op = match kind {
                OperationKind::Create => {
                    QueuedOperation::create(op_id, key, snapshot, self.config.max_retries, now)
                }
                _ => QueuedOperation::update(op_id, key, snapshot, self.config.max_retries, now),
            };
            batch.push(JournalEntry::OpPut(op));
        }

        inner.commit(batch)?;
        Ok(record)
    }

    /// Soft-deletes a record and enqueues the remote deletion.
    ///
    /// A delete supersedes the queue: still-pending creates and updates
    /// for the key are cancelled. If the remote never learned about the
    /// record, the row is removed outright with no network operation.
    pub fn delete(&self, key: RecordKey, now: UnixMillis) -> StoreResult<bool> {
        let mut inner = self.inner.lock();

        let mut record = match inner.state.records.get(&key) {
            Some(r) if r.is_active() => r.clone(),
            _ => return Err(StoreError::NotFound { key }),
        };

        let open: Vec<QueuedOperation> = inner
            .state
            .open_ops_for(key)
            .into_iter()
            .cloned()
            .collect();

        let mut batch = Vec::new();
        let mut any_in_flight = false;
        for op in &open {
            match op.status {
                OperationStatus::Pending => batch.push(JournalEntry::OpRemove(op.op_id)),
                OperationStatus::InFlight => any_in_flight = true,
                _ => {}
            }
        }
        // The delete also supersedes any terminally failed push.
        for op in inner.state.ops.values() {
            if op.record_key == key && op.status == OperationStatus::Failed {
                batch.push(JournalEntry::OpRemove(op.op_id));
            }
        }
        // Deleting a conflicted record discards its open conflict; the
        // deletion is the operator's answer.
        if inner.state.conflicts.contains_key(&key) {
            batch.push(JournalEntry::ConflictRemove(key));
        }

        if record.meta.remote_id.is_none() && !any_in_flight {
            // The remote never saw this record; no tombstone needed.
            batch.push(JournalEntry::RecordRemove(key));
            inner.commit(batch)?;
            return Ok(true);
        }

        record.deleted = true;
        record.meta.sync_state = SyncState::Pending;
        record.meta.last_modified_at = now;
        batch.push(JournalEntry::RecordPut(record));
        batch.push(JournalEntry::OpPut(QueuedOperation::delete(
            inner.state.next_op_id,
            key,
            self.config.max_retries,
            now,
        )));

        inner.commit(batch)?;
        Ok(true)
    }

    /// Returns an active record by key.
    pub fn get(&self, key: RecordKey) -> Option<Record> {
        let inner = self.inner.lock();
        inner
            .state
            .records
            .get(&key)
            .filter(|r| r.is_active())
            .cloned()
    }

    /// Returns a record by key, tombstones included.
    pub fn get_any(&self, key: RecordKey) -> Option<Record> {
        self.inner.lock().state.records.get(&key).cloned()
    }

    /// Returns a record (tombstones included) by its remote ID.
    pub fn get_by_remote_id(&self, remote_id: &str) -> Option<Record> {
        self.inner.lock().state.by_remote_id(remote_id).cloned()
    }

    /// Lists records matching the filter, most recently modified first.
    pub fn list(&self, filter: &ListFilter) -> Vec<Record> {
        let inner = self.inner.lock();
        let mut records: Vec<Record> = inner
            .state
            .records
            .values()
            .filter(|r| filter.include_deleted || r.is_active())
            .filter(|r| match &filter.states {
                Some(states) => states.contains(&r.meta.sync_state),
                None => true,
            })
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            b.meta
                .last_modified_at
                .cmp(&a.meta.last_modified_at)
                .then_with(|| a.key.cmp(&b.key))
        });
        records
    }

    // === Operation queue ===

    /// Returns the next transmittable operations, at most `limit`.
    ///
    /// Only the earliest open operation per record key is a candidate,
    /// which preserves per-key transmission order; keys whose record is
    /// blocked (conflict or failed) are skipped. Candidates are ordered
    /// by priority (descending) then operation ID.
    pub fn next_batch(&self, limit: usize, now: UnixMillis) -> Vec<QueuedOperation> {
        let inner = self.inner.lock();
        let mut candidates: Vec<QueuedOperation> = Vec::new();
        let mut seen_keys = std::collections::HashSet::new();

        // ops is ordered by op_id, so the first open op per key wins.
        for op in inner.state.ops.values() {
            if !op.status.is_open() || !seen_keys.insert(op.record_key) {
                continue;
            }
            if !op.is_ready(now) {
                continue;
            }
            let blocked = inner
                .state
                .records
                .get(&op.record_key)
                .map(|r| r.meta.sync_state.blocks_push())
                .unwrap_or(true);
            if blocked {
                continue;
            }
            candidates.push(op.clone());
        }

        candidates.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.op_id.cmp(&b.op_id)));
        candidates.truncate(limit);
        candidates
    }

    /// Marks an operation as being transmitted.
    pub fn mark_in_flight(&self, op_id: u64, now: UnixMillis) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let mut op = inner
            .state
            .ops
            .get(&op_id)
            .cloned()
            .ok_or(StoreError::UnknownOperation { op_id })?;
        op.status = OperationStatus::InFlight;
        op.dispatched_at = Some(now);
        inner.commit(vec![JournalEntry::OpPut(op)])
    }

    /// Removes a completed operation from the queue.
    pub fn mark_completed(&self, op_id: u64) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if !inner.state.ops.contains_key(&op_id) {
            return Err(StoreError::UnknownOperation { op_id });
        }
        inner.commit(vec![JournalEntry::OpRemove(op_id)])
    }

    /// Completes a pushed operation and reconciles its record in one
    /// transaction.
    ///
    /// For creates and updates the acknowledgement's remote identity and
    /// version land on the record, and the pushed snapshot becomes the
    /// record's base payload; the record turns `Synced` only when no
    /// later operation still waits for the key. For deletes the
    /// tombstone row is purged.
    pub fn complete_push(
        &self,
        op_id: u64,
        ack: Option<&RemoteAck>,
        now: UnixMillis,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let op = inner
            .state
            .ops
            .get(&op_id)
            .cloned()
            .ok_or(StoreError::UnknownOperation { op_id })?;

        let mut batch = vec![JournalEntry::OpRemove(op_id)];

        if let Some(record) = inner.state.records.get(&op.record_key) {
            if op.kind == OperationKind::Delete {
                batch.push(JournalEntry::RecordRemove(op.record_key));
            } else {
                let mut record = record.clone();
                if let Some(ack) = ack {
                    record.meta.remote_id = Some(ack.remote_id.clone());
                    record.meta.remote_version = ack.remote_version;
                    record.meta.synced_version = ack.remote_version;
                }
                record.meta.last_synced_at = Some(now);
                record.base_payload = op.payload.clone();

                let has_later_ops = inner
                    .state
                    .open_ops_for(op.record_key)
                    .iter()
                    .any(|o| o.op_id != op_id);
                if !has_later_ops {
                    record.meta.sync_state = SyncState::Synced;
                }
                batch.push(JournalEntry::RecordPut(record));
            }
        }

        inner.commit(batch)
    }

    /// Records a failed attempt.
    ///
    /// While the retry budget lasts, the operation returns to pending
    /// with the next backoff delay. Once exhausted it fails terminally
    /// and the record surfaces a `Failed` sync state; the operation
    /// stays in the queue for visibility, never silently dropped.
    pub fn mark_failed(
        &self,
        op_id: u64,
        error: &str,
        now: UnixMillis,
    ) -> StoreResult<OperationStatus> {
        let mut inner = self.inner.lock();
        Self::fail_op(&self.config, &mut inner, op_id, error, now, false)
    }

    /// Records a permanent rejection: no further retries.
    pub fn mark_failed_permanent(
        &self,
        op_id: u64,
        error: &str,
        now: UnixMillis,
    ) -> StoreResult<OperationStatus> {
        let mut inner = self.inner.lock();
        Self::fail_op(&self.config, &mut inner, op_id, error, now, true)
    }

    fn fail_op(
        config: &StoreConfig,
        inner: &mut Inner,
        op_id: u64,
        error: &str,
        now: UnixMillis,
        permanent: bool,
    ) -> StoreResult<OperationStatus> {
        let mut op = inner
            .state
            .ops
            .get(&op_id)
            .cloned()
            .ok_or(StoreError::UnknownOperation { op_id })?;

        op.retry_count += 1;
        if permanent {
            op.retry_count = op.retry_count.max(op.max_retries + 1);
        }
        op.dispatched_at = None;
        op.last_error = Some(error.to_string());

        let mut batch = Vec::new();
        let status = if op.retry_count > op.max_retries {
            op.status = OperationStatus::Failed;
            if let Some(record) = inner.state.records.get(&op.record_key) {
                let mut record = record.clone();
                record.meta.sync_state = SyncState::Failed;
                batch.push(JournalEntry::RecordPut(record));
            }
            warn!(op_id, error, "operation failed terminally");
            OperationStatus::Failed
        } else {
            op.status = OperationStatus::Pending;
            op.scheduled_at = now + config.backoff.delay_millis(op.retry_count);
            debug!(
                op_id,
                retry = op.retry_count,
                next_at = op.scheduled_at,
                "operation rescheduled after transient failure"
            );
            OperationStatus::Pending
        };

        batch.push(JournalEntry::OpPut(op));
        inner.commit(batch)?;
        Ok(status)
    }

    /// Cancels still-pending operations for a key. Returns how many.
    pub fn cancel(&self, key: RecordKey) -> StoreResult<usize> {
        let mut inner = self.inner.lock();
        let batch: Vec<JournalEntry> = inner
            .state
            .open_ops_for(key)
            .iter()
            .filter(|op| op.status == OperationStatus::Pending)
            .map(|op| JournalEntry::OpRemove(op.op_id))
            .collect();
        let cancelled = batch.len();
        if cancelled > 0 {
            inner.commit(batch)?;
        }
        Ok(cancelled)
    }

    /// Reclaims operations stuck in flight past the watchdog timeout.
    ///
    /// A stuck operation is treated as a transient failure: it returns
    /// to pending under the normal backoff schedule. Returns how many
    /// were reclaimed.
    pub fn requeue_stuck(&self, now: UnixMillis) -> StoreResult<usize> {
        let timeout = self.config.in_flight_timeout.as_millis() as i64;
        let mut inner = self.inner.lock();

        let stuck: Vec<u64> = inner
            .state
            .ops
            .values()
            .filter(|op| {
                op.status == OperationStatus::InFlight
                    && op.dispatched_at.map_or(true, |at| at + timeout <= now)
            })
            .map(|op| op.op_id)
            .collect();

        for &op_id in &stuck {
            warn!(op_id, "operation stuck in flight; reclaiming");
            Self::fail_op(
                &self.config,
                &mut inner,
                op_id,
                "stuck in flight past watchdog timeout",
                now,
                false,
            )?;
        }
        Ok(stuck.len())
    }

    /// Returns all queued operations in ID order.
    pub fn operations(&self) -> Vec<QueuedOperation> {
        self.inner.lock().state.ops.values().cloned().collect()
    }

    /// Number of operations awaiting transmission.
    pub fn pending_count(&self) -> usize {
        self.inner
            .lock()
            .state
            .ops
            .values()
            .filter(|op| op.status.is_open())
            .count()
    }

    /// Number of terminally failed operations.
    pub fn failed_count(&self) -> usize {
        self.inner
            .lock()
            .state
            .ops
            .values()
            .filter(|op| op.status == OperationStatus::Failed)
            .count()
    }

    // === Checkpoint ===

    /// Returns the pull checkpoint.
    pub fn checkpoint(&self) -> Checkpoint {
        self.inner.lock().state.checkpoint.clone()
    }

    /// Persists the pull checkpoint.
    pub fn set_checkpoint(&self, checkpoint: Checkpoint) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.commit(vec![JournalEntry::CheckpointSet(checkpoint)])
    }

    // === Remote-change application (pull phase) ===

    /// Applies a remote change that has no local conflict.
    ///
    /// Creates the record locally (already synced, since it originates
    /// from the remote), overwrites it, or removes it for a remote
    /// deletion.
    pub fn apply_remote_change(
        &self,
        change: &RemoteChange,
        now: UnixMillis,
    ) -> StoreResult<RemoteApplied> {
        let mut inner = self.inner.lock();
        let existing = inner.state.by_remote_id(&change.remote_id).cloned();

        match (&existing, &change.payload) {
            (None, None) => Ok(RemoteApplied::Skipped),
            (None, Some(payload)) => {
                let mut record =
                    Record::new(payload.clone(), change.natural_key.clone(), change.modified_at);
                record.key = change.record_key;
                record.mark_synced(change.remote_id.clone(), change.remote_version, now);
                inner.commit(vec![JournalEntry::RecordPut(record)])?;
                Ok(RemoteApplied::Created)
            }
            (Some(record), None) => {
                let mut batch: Vec<JournalEntry> = inner
                    .state
                    .open_ops_for(record.key)
                    .iter()
                    .filter(|op| op.status == OperationStatus::Pending)
                    .map(|op| JournalEntry::OpRemove(op.op_id))
                    .collect();
                batch.push(JournalEntry::RecordRemove(record.key));
                inner.commit(batch)?;
                Ok(RemoteApplied::Deleted)
            }
            (Some(record), Some(payload)) => {
                let mut record = record.clone();
                record.payload = payload.clone();
                record.deleted = false;
                record.meta.last_modified_at = change.modified_at;
                record.mark_synced(change.remote_id.clone(), change.remote_version, now);
                inner.commit(vec![JournalEntry::RecordPut(record)])?;
                Ok(RemoteApplied::Updated)
            }
        }
    }

    /// Applies a resolver-produced merge for a record with pending local
    /// changes.
    ///
    /// The remote payload becomes the record's base; if the merge kept
    /// any local-won fields, the difference re-queues as an elevated-
    /// priority update, otherwise the record is synced and redundant
    /// pending pushes are cancelled.
    pub fn apply_merged(
        &self,
        key: RecordKey,
        merged: Payload,
        change: &RemoteChange,
        now: UnixMillis,
    ) -> StoreResult<Record> {
        let mut inner = self.inner.lock();
        let mut record = inner
            .state
            .records
            .get(&key)
            .cloned()
            .ok_or(StoreError::NotFound { key })?;

        record.payload = merged.clone();
        record.base_payload = change.payload.clone();
        record.meta.remote_id = Some(change.remote_id.clone());
        record.meta.remote_version = change.remote_version;
        record.meta.synced_version = change.remote_version;
        record.meta.last_synced_at = Some(now);

        let open: Vec<QueuedOperation> = inner
            .state
            .open_ops_for(key)
            .into_iter()
            .cloned()
            .collect();
        let mut batch = Vec::new();

        if Some(&merged) == change.payload.as_ref() {
            // Local intent fully covered by the remote state.
            record.meta.sync_state = SyncState::Synced;
            for op in &open {
                if op.status == OperationStatus::Pending {
                    batch.push(JournalEntry::OpRemove(op.op_id));
                }
            }
        } else {
            record.meta.sync_state = SyncState::Pending;
            let coalesce = open.iter().find(|op| {
                op.status == OperationStatus::Pending && op.kind != OperationKind::Delete
            });
            if let Some(existing) = coalesce {
                let mut replaced = existing.clone();
                replaced.payload = Some(merged);
                replaced.priority = replaced.priority.max(RESOLUTION_PRIORITY);
                batch.push(JournalEntry::OpPut(replaced));
            } else {
                let op = QueuedOperation::update(
                    inner.state.next_op_id,
                    key,
                    merged,
                    self.config.max_retries,
                    now,
                )
                .with_priority(RESOLUTION_PRIORITY);
                batch.push(JournalEntry::OpPut(op));
            }
        }

        batch.push(JournalEntry::RecordPut(record.clone()));
        inner.commit(batch)?;
        Ok(record)
    }

    // === Conflicts ===

    /// Persists a manual-review conflict and blocks the record's pushes.
    pub fn record_conflict(&self, conflict: ConflictRecord) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let key = conflict.record_key;
        let mut batch = vec![JournalEntry::ConflictPut(conflict)];
        if let Some(record) = inner.state.records.get(&key) {
            let mut record = record.clone();
            record.meta.sync_state = SyncState::Conflict;
            batch.push(JournalEntry::RecordPut(record));
        }
        inner.commit(batch)
    }

    /// Returns open conflicts in detection order.
    pub fn open_conflicts(&self) -> Vec<ConflictRecord> {
        let mut conflicts: Vec<ConflictRecord> = self
            .inner
            .lock()
            .state
            .conflicts
            .values()
            .filter(|c| c.is_open())
            .cloned()
            .collect();
        conflicts.sort_by_key(|c| c.detected_at);
        conflicts
    }

    /// Number of open conflicts.
    pub fn conflict_count(&self) -> usize {
        self.inner
            .lock()
            .state
            .conflicts
            .values()
            .filter(|c| c.is_open())
            .count()
    }

    /// Applies an operator's resolution to a persisted conflict.
    ///
    /// Keep-local re-queues the local payload as an elevated-priority
    /// push against the reviewed remote version (or as a re-create if
    /// the remote deleted the record). Accept-remote overwrites or
    /// removes the local record. Either way the conflict is deleted and
    /// the record unblocked. Returns the surviving record, if any.
    pub fn resolve_conflict(
        &self,
        key: RecordKey,
        choice: ResolutionChoice,
        now: UnixMillis,
    ) -> StoreResult<Option<Record>> {
        let mut inner = self.inner.lock();
        let conflict = inner
            .state
            .conflicts
            .get(&key)
            .cloned()
            .ok_or(StoreError::NotFound { key })?;
        let record = inner
            .state
            .records
            .get(&key)
            .cloned()
            .ok_or(StoreError::NotFound { key })?;

        let mut batch = vec![JournalEntry::ConflictRemove(key)];

        match choice {
            ResolutionChoice::KeepLocal => {
                let mut record = record;
                record.meta.sync_state = SyncState::Pending;
                record.meta.last_modified_at = now;

                let op = if conflict.remote_snapshot.is_none() {
                    // Remote deleted it; the old identity is gone.
                    record.meta.remote_id = None;
                    record.meta.synced_version = 0;
                    record.base_payload = None;
                    QueuedOperation::create(
                        inner.state.next_op_id,
                        key,
                        record.payload.clone(),
                        self.config.max_retries,
                        now,
                    )
                } else {
                    if let Some(version) = conflict.remote_version {
                        record.meta.synced_version = version;
                        record.meta.remote_version = version + 1;
                    }
                    record.base_payload = conflict.remote_snapshot.clone();
                    QueuedOperation::update(
                        inner.state.next_op_id,
                        key,
                        record.payload.clone(),
                        self.config.max_retries,
                        now,
                    )
                }
                .with_priority(RESOLUTION_PRIORITY);

                batch.push(JournalEntry::RecordPut(record.clone()));
                batch.push(JournalEntry::OpPut(op));
                inner.commit(batch)?;
                Ok(Some(record))
            }
            ResolutionChoice::AcceptRemote => match &conflict.remote_snapshot {
                None => {
                    for op in inner.state.open_ops_for(key) {
                        if op.status == OperationStatus::Pending {
                            batch.push(JournalEntry::OpRemove(op.op_id));
                        }
                    }
                    batch.push(JournalEntry::RecordRemove(key));
                    inner.commit(batch)?;
                    Ok(None)
                }
                Some(remote_payload) => {
                    let mut record = record;
                    record.payload = remote_payload.clone();
                    record.base_payload = Some(remote_payload.clone());
                    if let Some(version) = conflict.remote_version {
                        record.meta.remote_version = version;
                        record.meta.synced_version = version;
                    }
                    record.meta.sync_state = SyncState::Synced;
                    record.meta.last_synced_at = Some(now);
                    for op in inner.state.open_ops_for(key) {
                        if op.status == OperationStatus::Pending {
                            batch.push(JournalEntry::OpRemove(op.op_id));
                        }
                    }
                    batch.push(JournalEntry::RecordPut(record.clone()));
                    inner.commit(batch)?;
                    Ok(Some(record))
                }
            },
        }
    }

    // === Maintenance ===

    /// Rewrites the journal as one snapshot of the live state.
    pub fn compact(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let snapshot = inner.state.snapshot();
        inner.journal.compact(&snapshot)
    }

    /// Returns the journal size in bytes.
    pub fn journal_bytes(&self) -> StoreResult<u64> {
        self.inner.lock().journal.len_bytes()
    }
}
