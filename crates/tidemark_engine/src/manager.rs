//! Sync cycle orchestration.

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{EngineError, EngineResult};
use crate::remote::{RemoteClient, RemoteError, RemoteErrorKind};
use crate::resolver::{self, ConflictInput, FieldCatalog, Resolution};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tidemark_protocol::{
    ConflictRecord, ConflictType, OperationKind, QueuedOperation, Record, RecordKey, RemoteChange,
    ResolutionStrategy, SyncState, UnixMillis,
};
use tidemark_store::{LocalStore, RemoteApplied};
use tracing::{debug, info, warn};

/// The sync manager's current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// No cycle active.
    Idle,
    /// Draining the outbound queue.
    Pushing,
    /// Applying remote changes.
    Pulling,
}

impl SyncPhase {
    /// Returns true while a cycle is active.
    pub fn is_syncing(&self) -> bool {
        !matches!(self, SyncPhase::Idle)
    }
}

/// Counters accumulated across sync cycles.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Cycles that completed both phases.
    pub cycles_completed: u64,
    /// Cycles that aborted or lost a phase.
    pub cycles_incomplete: u64,
    /// Operations acknowledged by the remote.
    pub operations_pushed: u64,
    /// Remote changes applied locally.
    pub operations_pulled: u64,
    /// Divergences detected.
    pub conflicts_detected: u64,
    /// Divergences resolved without an operator.
    pub conflicts_auto_resolved: u64,
    /// Transient failures that scheduled a retry.
    pub retries_scheduled: u64,
    /// Most recent phase-level error, if any.
    pub last_error: Option<String>,
}

/// Outcome of one sync cycle.
///
/// Partial success is the expected steady state: some operations
/// pushed, others rescheduled. A cycle only counts as successful when
/// both phases ran to completion.
#[derive(Debug, Clone)]
pub struct SyncCycleResult {
    /// Operations acknowledged by the remote this cycle.
    pub pushed: u64,
    /// Remote changes applied locally this cycle.
    pub pulled: u64,
    /// Conflicts auto-resolved this cycle, with the rule that decided.
    pub auto_resolved: Vec<(RecordKey, ResolutionStrategy)>,
    /// Conflicts persisted for manual review this cycle.
    pub manual_conflicts: Vec<RecordKey>,
    /// True if the push phase drained without aborting.
    pub push_complete: bool,
    /// True if the pull phase consumed every available change.
    pub pull_complete: bool,
    /// True if the cycle was cancelled mid-way.
    pub cancelled: bool,
    /// When the cycle started.
    pub started_at: UnixMillis,
    /// When the cycle finished.
    pub finished_at: UnixMillis,
}

impl SyncCycleResult {
    fn new(started_at: UnixMillis) -> Self {
        Self {
            pushed: 0,
            pulled: 0,
            auto_resolved: Vec::new(),
            manual_conflicts: Vec::new(),
            push_complete: false,
            pull_complete: false,
            cancelled: false,
            started_at,
            finished_at: started_at,
        }
    }

    /// Returns true if both phases completed.
    pub fn success(&self) -> bool {
        self.push_complete && self.pull_complete && !self.cancelled
    }
}

enum PushOutcome {
    Continue,
    AbortOffline,
}

/// Orchestrates sync cycles: drain the outbound queue, then pull and
/// merge remote changes.
///
/// Only one cycle runs at a time; a re-entrant trigger is a logged
/// no-op. Application mutations proceed concurrently: the store's
/// per-call transactions are the only shared locks, and none are held
/// across a remote call.
pub struct SyncManager {
    store: Arc<LocalStore>,
    remote: Arc<dyn RemoteClient>,
    monitor: Arc<ConnectivityMonitor>,
    clock: Arc<dyn Clock>,
    catalog: FieldCatalog,
    config: EngineConfig,
    phase: RwLock<SyncPhase>,
    syncing: AtomicBool,
    cancelled: AtomicBool,
    stats: RwLock<SyncStats>,
    last_sync_at: RwLock<Option<UnixMillis>>,
}

impl SyncManager {
    /// Creates a sync manager.
    pub fn new(
        store: Arc<LocalStore>,
        remote: Arc<dyn RemoteClient>,
        monitor: Arc<ConnectivityMonitor>,
        clock: Arc<dyn Clock>,
        catalog: FieldCatalog,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            remote,
            monitor,
            clock,
            catalog,
            config,
            phase: RwLock::new(SyncPhase::Idle),
            syncing: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            stats: RwLock::new(SyncStats::default()),
            last_sync_at: RwLock::new(None),
        }
    }

    /// Returns the current phase.
    pub fn phase(&self) -> SyncPhase {
        *self.phase.read()
    }

    /// Returns a snapshot of the accumulated stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// When the last successful cycle finished.
    pub fn last_sync_at(&self) -> Option<UnixMillis> {
        *self.last_sync_at.read()
    }

    /// Requests cancellation of the active cycle.
    ///
    /// The cycle stops before its next remote call; an in-flight call
    /// completes and is accounted normally.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Runs one sync cycle: push, then pull.
    ///
    /// Returns [`EngineError::SyncInProgress`] if a cycle is already
    /// active (the trigger is dropped, not queued).
    pub fn sync(&self) -> EngineResult<SyncCycleResult> {
        if self
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("sync trigger ignored; a cycle is already active");
            return Err(EngineError::SyncInProgress);
        }

        let result = self.run_cycle();

        *self.phase.write() = SyncPhase::Idle;
        self.syncing.store(false, Ordering::SeqCst);
        result
    }

    fn run_cycle(&self) -> EngineResult<SyncCycleResult> {
        let started_at = self.clock.now_millis();
        self.cancelled.store(false, Ordering::SeqCst);
        let mut result = SyncCycleResult::new(started_at);

        // Reclaim anything a previous crash left in flight.
        self.store.requeue_stuck(started_at)?;

        *self.phase.write() = SyncPhase::Pushing;
        result.push_complete = self.push_phase(&mut result)?;

        // Pull runs regardless of the push outcome; the phases are
        // independent.
        if !self.is_cancelled() {
            *self.phase.write() = SyncPhase::Pulling;
            result.pull_complete = self.pull_phase(&mut result)?;
        }

        result.cancelled = self.is_cancelled();
        result.finished_at = self.clock.now_millis();

        {
            let mut stats = self.stats.write();
            if result.success() {
                stats.cycles_completed += 1;
                stats.last_error = None;
            } else {
                stats.cycles_incomplete += 1;
            }
        }
        if result.success() {
            *self.last_sync_at.write() = Some(result.finished_at);
        }

        info!(
            pushed = result.pushed,
            pulled = result.pulled,
            success = result.success(),
            "sync cycle finished"
        );
        Ok(result)
    }

    // === Push phase ===

    fn push_phase(&self, result: &mut SyncCycleResult) -> EngineResult<bool> {
        loop {
            if self.is_cancelled() {
                return Ok(false);
            }
            let now = self.clock.now_millis();
            let batch = self.store.next_batch(self.config.push_batch_size, now);
            if batch.is_empty() {
                return Ok(true);
            }
            for op in batch {
                if self.is_cancelled() {
                    return Ok(false);
                }
                match self.push_one(&op, result)? {
                    PushOutcome::Continue => {}
                    PushOutcome::AbortOffline => return Ok(false),
                }
            }
        }
    }

    fn push_one(
        &self,
        op: &QueuedOperation,
        result: &mut SyncCycleResult,
    ) -> EngineResult<PushOutcome> {
        let now = self.clock.now_millis();

        let Some(record) = self.store.get_any(op.record_key) else {
            // Queue references a record that no longer exists; repair by
            // dropping the operation.
            warn!(op_id = op.op_id, key = %op.record_key, "dropping operation for missing record");
            self.store.mark_completed(op.op_id)?;
            return Ok(PushOutcome::Continue);
        };

        // A delete for a record the remote never saw needs no network
        // call at all.
        if op.kind == OperationKind::Delete && record.meta.remote_id.is_none() {
            self.store.complete_push(op.op_id, None, now)?;
            result.pushed += 1;
            return Ok(PushOutcome::Continue);
        }

        self.store.mark_in_flight(op.op_id, now)?;

        let outcome = match op.kind {
            OperationKind::Create | OperationKind::Update => {
                let Some(payload) = op.payload.as_ref() else {
                    warn!(op_id = op.op_id, "dropping upsert operation without payload");
                    self.store.mark_completed(op.op_id)?;
                    return Ok(PushOutcome::Continue);
                };
                match &record.meta.remote_id {
                    // A create retried after the remote already accepted
                    // it continues as an update against the known
                    // identity, so no duplicate is created.
                    Some(remote_id) => self
                        .remote
                        .update_remote(remote_id, payload, record.meta.synced_version)
                        .map(Some),
                    None => self.remote.create_remote(op.record_key, payload).map(Some),
                }
            }
            OperationKind::Delete => {
                let remote_id = record.meta.remote_id.as_deref().unwrap_or_default();
                self.remote.delete_remote(remote_id).map(|()| None)
            }
        };

        match outcome {
            Ok(ack) => {
                let now = self.clock.now_millis();
                self.store.complete_push(op.op_id, ack.as_ref(), now)?;
                result.pushed += 1;
                self.stats.write().operations_pushed += 1;
                Ok(PushOutcome::Continue)
            }
            Err(error) => self.handle_push_error(op, &record, error, result),
        }
    }

    fn handle_push_error(
        &self,
        op: &QueuedOperation,
        record: &Record,
        error: RemoteError,
        result: &mut SyncCycleResult,
    ) -> EngineResult<PushOutcome> {
        let now = self.clock.now_millis();
        match error.kind {
            RemoteErrorKind::Transient => {
                debug!(op_id = op.op_id, error = %error, "transient push failure");
                self.store.mark_failed(op.op_id, &error.message, now)?;
                self.stats.write().retries_scheduled += 1;
                if !self.monitor.check_now() {
                    info!("connectivity dropped; aborting push batch");
                    return Ok(PushOutcome::AbortOffline);
                }
                Ok(PushOutcome::Continue)
            }
            RemoteErrorKind::Permanent => {
                warn!(op_id = op.op_id, error = %error, "permanent push rejection");
                self.store
                    .mark_failed_permanent(op.op_id, &error.message, now)?;
                Ok(PushOutcome::Continue)
            }
            RemoteErrorKind::Conflict => {
                self.stats.write().conflicts_detected += 1;
                match error.current {
                    Some(change) => {
                        // The operation is superseded by whatever the
                        // resolution produces.
                        self.store.mark_completed(op.op_id)?;
                        self.merge_remote_change(record, &change, result)?;
                    }
                    None => {
                        // The rejection carried no remote state; retry
                        // after the pull phase has fetched it.
                        self.store.mark_failed(op.op_id, &error.message, now)?;
                    }
                }
                Ok(PushOutcome::Continue)
            }
        }
    }

    // === Pull phase ===

    fn pull_phase(&self, result: &mut SyncCycleResult) -> EngineResult<bool> {
        loop {
            if self.is_cancelled() {
                return Ok(false);
            }
            let checkpoint = self.store.checkpoint();
            let batch = match self
                .remote
                .fetch_changes_since(&checkpoint, self.config.pull_batch_size)
            {
                Ok(batch) => batch,
                Err(error) => {
                    warn!(error = %error, "pull failed");
                    self.stats.write().last_error = Some(error.to_string());
                    return Ok(false);
                }
            };

            for change in &batch.changes {
                self.apply_pull_change(change, result)?;
            }

            // Advance only after the whole batch applied: a crash
            // mid-batch re-fetches it rather than skipping changes.
            self.store.set_checkpoint(batch.checkpoint)?;

            if !batch.has_more {
                return Ok(true);
            }
        }
    }

    fn apply_pull_change(
        &self,
        change: &RemoteChange,
        result: &mut SyncCycleResult,
    ) -> EngineResult<()> {
        let now = self.clock.now_millis();

        // Look up by remote identity first; fall back to the record key
        // for rows whose create acknowledgement was lost to a crash.
        let local = self
            .store
            .get_by_remote_id(&change.remote_id)
            .or_else(|| self.store.get_any(change.record_key));

        let Some(record) = local else {
            let applied = self.store.apply_remote_change(change, now)?;
            if applied != RemoteApplied::Skipped {
                result.pulled += 1;
                self.stats.write().operations_pulled += 1;
            }
            return Ok(());
        };

        // Already reconciled up to this version (typically our own push
        // echoed back).
        if change.remote_version <= record.meta.synced_version {
            return Ok(());
        }

        if record.meta.sync_state == SyncState::Conflict {
            self.refresh_open_conflict(&record, change)?;
            return Ok(());
        }

        let has_local_divergence = record.has_pending_changes()
            || record.meta.sync_state == SyncState::Failed
            || record.deleted;

        if has_local_divergence {
            self.stats.write().conflicts_detected += 1;
            self.merge_remote_change(&record, change, result)?;
        } else {
            self.store.apply_remote_change(change, now)?;
        }
        result.pulled += 1;
        self.stats.write().operations_pulled += 1;
        Ok(())
    }

    /// Keeps a persisted conflict's remote side current while it waits
    /// for an operator.
    fn refresh_open_conflict(&self, record: &Record, change: &RemoteChange) -> EngineResult<()> {
        let existing = self
            .store
            .open_conflicts()
            .into_iter()
            .find(|c| c.record_key == record.key);
        if let Some(mut conflict) = existing {
            conflict.remote_snapshot = change.payload.clone();
            conflict.remote_version = (!change.is_deletion()).then_some(change.remote_version);
            self.store.record_conflict(conflict)?;
        }
        Ok(())
    }

    // === Conflict handling (shared by push and pull) ===

    fn merge_remote_change(
        &self,
        record: &Record,
        change: &RemoteChange,
        result: &mut SyncCycleResult,
    ) -> EngineResult<()> {
        let now = self.clock.now_millis();

        // Both sides deleted: they agree, apply the remote deletion.
        if change.is_deletion() && record.deleted {
            self.store.apply_remote_change(change, now)?;
            return Ok(());
        }

        // Deletion on exactly one side with edits on the other cannot be
        // merged field-by-field.
        if change.is_deletion() || record.deleted {
            let conflict = ConflictRecord::manual(
                record.key,
                record.payload.clone(),
                change.payload.clone(),
                (!change.is_deletion()).then_some(change.remote_version),
                ConflictType::UpdateDelete,
                now,
            );
            warn!(key = %record.key, "update/delete conflict persisted for review");
            self.store.record_conflict(conflict)?;
            result.manual_conflicts.push(record.key);
            return Ok(());
        }

        let Some(remote_payload) = change.payload.as_ref() else {
            return Ok(());
        };

        let resolution = resolver::resolve(&ConflictInput {
            base: record.base_payload.as_ref(),
            local: &record.payload,
            remote: remote_payload,
            catalog: &self.catalog,
        });

        match resolution {
            Resolution::Merged { payload, strategy } => {
                debug!(key = %record.key, %strategy, "conflict auto-resolved");
                self.store.apply_merged(record.key, payload, change, now)?;
                result.auto_resolved.push((record.key, strategy));
                self.stats.write().conflicts_auto_resolved += 1;
            }
            Resolution::ManualReview { contested } => {
                warn!(key = %record.key, ?contested, "conflict persisted for review");
                let conflict_type = if record.meta.synced_version == 0 {
                    ConflictType::CreateCreate
                } else {
                    ConflictType::UpdateUpdate
                };
                let conflict = ConflictRecord::manual(
                    record.key,
                    record.payload.clone(),
                    Some(remote_payload.clone()),
                    Some(change.remote_version),
                    conflict_type,
                    now,
                );
                self.store.record_conflict(conflict)?;
                result.manual_conflicts.push(record.key);
            }
        }
        Ok(())
    }
}
