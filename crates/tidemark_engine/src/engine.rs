//! The application-facing engine facade.

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{EngineError, EngineResult};
use crate::manager::{SyncCycleResult, SyncManager, SyncStats};
use crate::remote::RemoteClient;
use crate::resolver::FieldCatalog;
use crate::status::{StatusHub, StatusSubscriptionId, SyncStatus};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tidemark_protocol::{ConflictRecord, Payload, Record, RecordKey, ResolutionChoice};
use tidemark_store::{ListFilter, LocalStore};
use tracing::{debug, info, warn};

/// Builds a [`SyncEngine`].
pub struct EngineBuilder {
    store: Arc<LocalStore>,
    remote: Arc<dyn RemoteClient>,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    catalog: FieldCatalog,
}

impl EngineBuilder {
    /// Sets the engine configuration.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Injects a clock (tests use a manual one).
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the field classifications for conflict resolution.
    #[must_use]
    pub fn catalog(mut self, catalog: FieldCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Builds the engine. The background scheduler is not running until
    /// [`SyncEngine::start`] is called.
    pub fn build(self) -> SyncEngine {
        let monitor = Arc::new(ConnectivityMonitor::new(
            Arc::clone(&self.remote),
            Arc::clone(&self.clock),
            self.config.probe_interval,
            self.config.offline_after_failures,
        ));
        let manager = Arc::new(SyncManager::new(
            Arc::clone(&self.store),
            Arc::clone(&self.remote),
            Arc::clone(&monitor),
            Arc::clone(&self.clock),
            self.catalog,
            self.config.clone(),
        ));

        let inner = Arc::new(EngineInner {
            store: self.store,
            manager,
            monitor,
            hub: StatusHub::new(),
            clock: self.clock,
            config: self.config,
            shutdown: AtomicBool::new(false),
            wake: Mutex::new(false),
            wake_signal: Condvar::new(),
        });

        SyncEngine {
            inner,
            scheduler: Mutex::new(None),
        }
    }
}

struct EngineInner {
    store: Arc<LocalStore>,
    manager: Arc<SyncManager>,
    monitor: Arc<ConnectivityMonitor>,
    hub: StatusHub,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    shutdown: AtomicBool,
    wake: Mutex<bool>,
    wake_signal: Condvar,
}

impl EngineInner {
    fn current_status(&self) -> SyncStatus {
        SyncStatus {
            online: self.monitor.is_online(),
            pending_count: self.store.pending_count(),
            failed_count: self.store.failed_count(),
            conflict_count: self.store.conflict_count(),
            last_sync_at: self.manager.last_sync_at(),
        }
    }

    fn emit_status(&self) {
        self.hub.emit(&self.current_status());
    }

    fn trigger(&self) {
        let mut pending = self.wake.lock();
        *pending = true;
        self.wake_signal.notify_all();
    }
}

/// The local-first sync engine.
///
/// Applications create, mutate, and query records through this facade;
/// every call succeeds or fails locally regardless of connectivity.
/// A background thread probes reachability, runs the periodic sync
/// cycle, and reacts to the offline-to-online transition with an
/// immediate sync attempt. Sync-time failures are never raised to the
/// caller; they surface through [`SyncEngine::get_sync_status`] and the
/// status subscription.
pub struct SyncEngine {
    inner: Arc<EngineInner>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Starts building an engine over a store and remote adapter.
    pub fn builder(store: Arc<LocalStore>, remote: Arc<dyn RemoteClient>) -> EngineBuilder {
        EngineBuilder {
            store,
            remote,
            config: EngineConfig::default(),
            clock: Arc::new(SystemClock),
            catalog: FieldCatalog::new(),
        }
    }

    /// Starts the background scheduler. Idempotent.
    pub fn start(&self) {
        let mut scheduler = self.scheduler.lock();
        if scheduler.is_some() {
            return;
        }

        // The monitor wakes the scheduler when connectivity returns.
        let weak: Weak<EngineInner> = Arc::downgrade(&self.inner);
        self.inner.monitor.subscribe(move |online| {
            if let Some(inner) = weak.upgrade() {
                inner.emit_status();
                if online {
                    debug!("back online; triggering sync");
                    inner.trigger();
                }
            }
        });

        let inner = Arc::clone(&self.inner);
        let handle = std::thread::Builder::new()
            .name("tidemark-sync".into())
            .spawn(move || run_scheduler(&inner))
            .expect("failed to spawn scheduler thread");
        *scheduler = Some(handle);
        info!("sync scheduler started");
    }

    /// Stops the background scheduler and waits for it to exit.
    pub fn stop(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.trigger();
        if let Some(handle) = self.scheduler.lock().take() {
            let _ = handle.join();
            info!("sync scheduler stopped");
        }
    }

    // === Record CRUD (always local, never blocks on the network) ===

    /// Creates a record. Fails synchronously on a duplicate natural key.
    pub fn create_entry(
        &self,
        payload: Payload,
        natural_key: Option<String>,
    ) -> EngineResult<Record> {
        let now = self.inner.clock.now_millis();
        let record = self.inner.store.create(payload, natural_key, now)?;
        self.inner.emit_status();
        Ok(record)
    }

    /// Applies a partial update. Fails synchronously for unknown keys.
    pub fn update_entry(&self, key: RecordKey, patch: Payload) -> EngineResult<Record> {
        let now = self.inner.clock.now_millis();
        let record = self.inner.store.update(key, patch, now)?;
        self.inner.emit_status();
        Ok(record)
    }

    /// Soft-deletes a record. Fails synchronously for unknown keys.
    pub fn delete_entry(&self, key: RecordKey) -> EngineResult<bool> {
        let now = self.inner.clock.now_millis();
        let deleted = self.inner.store.delete(key, now)?;
        self.inner.emit_status();
        Ok(deleted)
    }

    /// Returns an active record.
    pub fn get_entry(&self, key: RecordKey) -> Option<Record> {
        self.inner.store.get(key)
    }

    /// Lists records matching the filter.
    pub fn list_entries(&self, filter: &ListFilter) -> Vec<Record> {
        self.inner.store.list(filter)
    }

    // === Sync surface ===

    /// Returns a point-in-time sync status.
    pub fn get_sync_status(&self) -> SyncStatus {
        self.inner.current_status()
    }

    /// Runs a sync cycle on the calling thread and returns its result.
    ///
    /// Returns [`EngineError::SyncInProgress`] if the scheduler (or
    /// another caller) is already mid-cycle.
    pub fn force_sync_now(&self) -> EngineResult<SyncCycleResult> {
        let result = self.inner.manager.sync();
        self.inner.emit_status();
        result
    }

    /// Requests cancellation of the active sync cycle.
    pub fn cancel_sync(&self) {
        self.inner.manager.cancel();
    }

    /// Registers a status callback. Dispatch is synchronous; callbacks
    /// must not call back into the engine.
    pub fn subscribe_status(
        &self,
        callback: impl Fn(&SyncStatus) + Send + Sync + 'static,
    ) -> StatusSubscriptionId {
        self.inner.hub.subscribe(callback)
    }

    /// Removes a status callback.
    pub fn unsubscribe_status(&self, id: StatusSubscriptionId) {
        self.inner.hub.unsubscribe(id);
    }

    /// Returns accumulated sync statistics.
    pub fn stats(&self) -> SyncStats {
        self.inner.manager.stats()
    }

    /// Returns the debounced connectivity status.
    pub fn is_online(&self) -> bool {
        self.inner.monitor.is_online()
    }

    // === Conflicts ===

    /// Returns conflicts awaiting manual review.
    pub fn open_conflicts(&self) -> Vec<ConflictRecord> {
        self.inner.store.open_conflicts()
    }

    /// Applies an operator's resolution and unblocks the record.
    pub fn resolve_conflict(
        &self,
        key: RecordKey,
        choice: ResolutionChoice,
    ) -> EngineResult<Option<Record>> {
        let now = self.inner.clock.now_millis();
        let resolved = self
            .inner
            .store
            .resolve_conflict(key, choice, now)
            .map_err(|e| match e {
                tidemark_store::StoreError::NotFound { key } => EngineError::NoOpenConflict { key },
                other => EngineError::Store(other),
            })?;
        self.inner.emit_status();
        // A keep-local resolution queued a push; get it moving.
        self.inner.trigger();
        Ok(resolved)
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_scheduler(inner: &Arc<EngineInner>) {
    let tick = inner
        .config
        .probe_interval
        .min(inner.config.sync_interval)
        .max(Duration::from_millis(10));
    let mut last_cycle: Option<Instant> = None;

    loop {
        if inner.shutdown.load(Ordering::SeqCst) {
            return;
        }

        let online = inner.monitor.maybe_probe();
        let triggered = {
            let mut pending = inner.wake.lock();
            std::mem::take(&mut *pending)
        };
        let due = last_cycle.map_or(true, |at| at.elapsed() >= inner.config.sync_interval);

        if online && (triggered || due) {
            match inner.manager.sync() {
                Ok(result) => {
                    debug!(
                        pushed = result.pushed,
                        pulled = result.pulled,
                        "scheduled sync cycle"
                    );
                }
                Err(EngineError::SyncInProgress) => {
                    debug!("scheduled sync skipped; cycle already active");
                }
                Err(error) => warn!(error = %error, "scheduled sync failed"),
            }
            inner.emit_status();
            last_cycle = Some(Instant::now());
        }

        let mut pending = inner.wake.lock();
        if !*pending && !inner.shutdown.load(Ordering::SeqCst) {
            let _ = inner.wake_signal.wait_for(&mut pending, tick);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::remote::MockRemoteClient;
    use tidemark_store::StoreConfig;

    fn engine_with(remote: Arc<MockRemoteClient>, clock: Arc<ManualClock>) -> SyncEngine {
        let store = Arc::new(LocalStore::open_in_memory(StoreConfig::default()).unwrap());
        SyncEngine::builder(store, remote as Arc<dyn RemoteClient>)
            .clock(clock as Arc<dyn Clock>)
            .catalog(FieldCatalog::new().with_user_editable("notes"))
            .build()
    }

    fn payload(name: &str) -> Payload {
        Payload::default().with_text("notes", name)
    }

    #[test]
    fn crud_works_without_any_network() {
        let remote = Arc::new(MockRemoteClient::new());
        remote.set_connected(false);
        let clock = Arc::new(ManualClock::new(1_000));
        let engine = engine_with(remote, clock);

        let record = engine.create_entry(payload("a"), Some("nk-1".into())).unwrap();
        engine.update_entry(record.key, payload("b")).unwrap();
        assert_eq!(engine.list_entries(&ListFilter::all()).len(), 1);
        assert!(engine.delete_entry(record.key).unwrap());
        assert!(engine.get_entry(record.key).is_none());
    }

    #[test]
    fn duplicate_key_error_is_synchronous() {
        let remote = Arc::new(MockRemoteClient::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let engine = engine_with(remote, clock);

        engine.create_entry(payload("a"), Some("nk".into())).unwrap();
        let err = engine
            .create_entry(payload("b"), Some("nk".into()))
            .unwrap_err();
        assert!(err.is_duplicate_key());
    }

    #[test]
    fn force_sync_pushes_and_reports_status() {
        let remote = Arc::new(MockRemoteClient::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let engine = engine_with(Arc::clone(&remote), clock);

        let record = engine.create_entry(payload("a"), None).unwrap();
        assert_eq!(engine.get_sync_status().pending_count, 1);

        let result = engine.force_sync_now().unwrap();
        assert!(result.success());

        let status = engine.get_sync_status();
        assert_eq!(status.pending_count, 0);
        assert_eq!(status.failed_count, 0);
        assert!(status.last_sync_at.is_some());
        assert!(engine.get_entry(record.key).unwrap().meta.remote_id.is_some());
        assert_eq!(remote.record_count(), 1);
    }

    #[test]
    fn status_subscription_sees_mutations() {
        let remote = Arc::new(MockRemoteClient::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let engine = engine_with(remote, clock);

        let pending_seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&pending_seen);
        let id = engine.subscribe_status(move |status| sink.lock().push(status.pending_count));

        engine.create_entry(payload("a"), None).unwrap();
        engine.create_entry(payload("b"), None).unwrap();
        engine.unsubscribe_status(id);
        engine.create_entry(payload("c"), None).unwrap();

        assert_eq!(*pending_seen.lock(), vec![1, 2]);
    }

    #[test]
    fn resolve_conflict_requires_an_open_conflict() {
        let remote = Arc::new(MockRemoteClient::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let engine = engine_with(remote, clock);

        let err = engine
            .resolve_conflict(RecordKey::new(), ResolutionChoice::KeepLocal)
            .unwrap_err();
        assert!(matches!(err, EngineError::NoOpenConflict { .. }));
    }

    #[test]
    fn scheduler_runs_and_stops_cleanly() {
        let remote = Arc::new(MockRemoteClient::new());
        let store = Arc::new(LocalStore::open_in_memory(StoreConfig::default()).unwrap());
        let engine = SyncEngine::builder(Arc::clone(&store), remote.clone() as Arc<dyn RemoteClient>)
            .config(
                EngineConfig::default()
                    .with_sync_interval(Duration::from_millis(20))
                    .with_probe_interval(Duration::from_millis(10)),
            )
            .build();

        engine.start();
        engine.start(); // idempotent
        store
            .create(payload("a"), None, SystemClock.now_millis())
            .unwrap();

        // Wait for the scheduler to pick the record up.
        let deadline = Instant::now() + Duration::from_secs(2);
        while remote.record_count() == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(remote.record_count(), 1);

        engine.stop();
    }
}
