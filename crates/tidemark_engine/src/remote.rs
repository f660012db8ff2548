//! Remote client adapter interface and test double.

use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use thiserror::Error;
use tidemark_protocol::{ChangeBatch, Checkpoint, Payload, RecordKey, RemoteAck, RemoteChange};

/// Result type for remote calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Classification of a remote failure.
///
/// The sync manager switches on this explicitly; unhappy paths are
/// values, not exceptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// Timeout, connectivity loss, or a 5xx-style server fault. Worth
    /// retrying with backoff.
    Transient,
    /// The remote holds a newer version than the push expected.
    Conflict,
    /// Validation rejection, duplicate remote key, or another fault
    /// that will not succeed on retry.
    Permanent,
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteErrorKind::Transient => f.write_str("transient"),
            RemoteErrorKind::Conflict => f.write_str("conflict"),
            RemoteErrorKind::Permanent => f.write_str("permanent"),
        }
    }
}

/// A failed remote call.
#[derive(Debug, Clone, Error)]
#[error("remote error ({kind}): {message}")]
pub struct RemoteError {
    /// How the failure should be handled.
    pub kind: RemoteErrorKind,
    /// Human-readable description.
    pub message: String,
    /// For conflicts: the remote's current view of the record, when the
    /// remote includes it in the rejection. Lets the resolver run
    /// without waiting for the next pull.
    pub current: Option<Box<RemoteChange>>,
}

impl RemoteError {
    /// Creates a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::Transient,
            message: message.into(),
            current: None,
        }
    }

    /// Creates a permanent rejection.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::Permanent,
            message: message.into(),
            current: None,
        }
    }

    /// Creates a version conflict carrying the remote's current view.
    pub fn conflict(message: impl Into<String>, current: Option<RemoteChange>) -> Self {
        Self {
            kind: RemoteErrorKind::Conflict,
            message: message.into(),
            current: current.map(Box::new),
        }
    }

    /// Returns true if the call is worth retrying.
    pub fn is_transient(&self) -> bool {
        self.kind == RemoteErrorKind::Transient
    }
}

/// The engine's only outbound dependency.
///
/// Implementations own transport and serialization entirely. Two
/// contract points matter to the engine:
///
/// - Every call must be bounded by a timeout; an exceeded timeout is
///   returned as a [`RemoteErrorKind::Transient`] error, never a hang.
/// - `create_remote` receives the record key so the remote can
///   deduplicate a replayed create (crash after remote success, before
///   the local acknowledgement).
pub trait RemoteClient: Send + Sync {
    /// Creates a record on the remote, returning its assigned identity.
    fn create_remote(&self, key: RecordKey, payload: &Payload) -> RemoteResult<RemoteAck>;

    /// Updates a remote record, guarded by the version this client last
    /// reconciled against.
    fn update_remote(
        &self,
        remote_id: &str,
        payload: &Payload,
        expected_version: u64,
    ) -> RemoteResult<RemoteAck>;

    /// Deletes a remote record. Deleting an already-absent record is
    /// not an error.
    fn delete_remote(&self, remote_id: &str) -> RemoteResult<()>;

    /// Fetches changes recorded after the checkpoint, at most `limit`.
    fn fetch_changes_since(
        &self,
        checkpoint: &Checkpoint,
        limit: usize,
    ) -> RemoteResult<ChangeBatch>;

    /// Lightweight reachability probe.
    fn health_check(&self) -> bool;
}

#[derive(Debug, Clone)]
struct MockRecord {
    key: RecordKey,
    version: u64,
    payload: Payload,
    natural_key: Option<String>,
}

#[derive(Default)]
struct MockState {
    records: BTreeMap<String, MockRecord>,
    changes: Vec<RemoteChange>,
    failures: VecDeque<RemoteError>,
    next_id: u64,
    now: i64,
}

impl MockState {
    fn log_change(&mut self, remote_id: &str, payload: Option<Payload>) {
        let (key, version, natural_key) = match self.records.get(remote_id) {
            Some(r) => (r.key, r.version, r.natural_key.clone()),
            // Deletion change: the record is already gone; find its key
            // from the last logged change for this id.
            None => {
                let key = self
                    .changes
                    .iter()
                    .rev()
                    .find(|c| c.remote_id == remote_id)
                    .map(|c| c.record_key)
                    .unwrap_or_else(RecordKey::new);
                let version = self
                    .changes
                    .iter()
                    .rev()
                    .find(|c| c.remote_id == remote_id)
                    .map(|c| c.remote_version + 1)
                    .unwrap_or(1);
                (key, version, None)
            }
        };
        self.now += 1;
        self.changes.push(RemoteChange {
            remote_id: remote_id.to_string(),
            record_key: key,
            remote_version: version,
            payload,
            natural_key,
            modified_at: self.now,
        });
    }

    fn current_change(&self, remote_id: &str) -> Option<RemoteChange> {
        self.records.get(remote_id).map(|r| RemoteChange {
            remote_id: remote_id.to_string(),
            record_key: r.key,
            remote_version: r.version,
            payload: Some(r.payload.clone()),
            natural_key: r.natural_key.clone(),
            modified_at: self.now,
        })
    }
}

/// An in-memory remote for tests.
///
/// Acts as a small authoritative store with a change feed, plus levers
/// for scripting failures: a connectivity flag and a queue of errors
/// consumed by subsequent calls.
pub struct MockRemoteClient {
    state: Mutex<MockState>,
    connected: AtomicBool,
    create_calls: AtomicU64,
    update_calls: AtomicU64,
    delete_calls: AtomicU64,
    fetch_calls: AtomicU64,
    probe_calls: AtomicU64,
}

impl MockRemoteClient {
    /// Creates a connected mock with no records.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                next_id: 1,
                ..MockState::default()
            }),
            connected: AtomicBool::new(true),
            create_calls: AtomicU64::new(0),
            update_calls: AtomicU64::new(0),
            delete_calls: AtomicU64::new(0),
            fetch_calls: AtomicU64::new(0),
            probe_calls: AtomicU64::new(0),
        }
    }

    /// Flips simulated connectivity.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Queues an error to be returned by the next remote call.
    pub fn push_failure(&self, error: RemoteError) {
        self.state.lock().failures.push_back(error);
    }

    /// Seeds a record as if another client had pushed it.
    pub fn seed(&self, key: RecordKey, payload: Payload, natural_key: Option<String>) -> String {
        let mut state = self.state.lock();
        let remote_id = format!("r-{}", state.next_id);
        state.next_id += 1;
        state.records.insert(
            remote_id.clone(),
            MockRecord {
                key,
                version: 1,
                payload: payload.clone(),
                natural_key,
            },
        );
        state.log_change(&remote_id, Some(payload));
        remote_id
    }

    /// Applies an update as if another client had made it.
    pub fn external_update(&self, remote_id: &str, payload: Payload) {
        let mut state = self.state.lock();
        if let Some(record) = state.records.get_mut(remote_id) {
            record.version += 1;
            record.payload = payload;
            let payload = record.payload.clone();
            state.log_change(remote_id, Some(payload));
        }
    }

    /// Deletes a record as if another client had deleted it.
    pub fn external_delete(&self, remote_id: &str) {
        let mut state = self.state.lock();
        if state.records.remove(remote_id).is_some() {
            state.log_change(remote_id, None);
        }
    }

    /// Number of records the remote currently holds.
    pub fn record_count(&self) -> usize {
        self.state.lock().records.len()
    }

    /// The remote's payload for a record, if present.
    pub fn payload_of(&self, remote_id: &str) -> Option<Payload> {
        self.state
            .lock()
            .records
            .get(remote_id)
            .map(|r| r.payload.clone())
    }

    /// The remote's version for a record, if present.
    pub fn version_of(&self, remote_id: &str) -> Option<u64> {
        self.state.lock().records.get(remote_id).map(|r| r.version)
    }

    /// How many create calls the engine has made.
    pub fn create_calls(&self) -> u64 {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// How many probe calls the engine has made.
    pub fn probe_calls(&self) -> u64 {
        self.probe_calls.load(Ordering::SeqCst)
    }

    fn gate(&self) -> RemoteResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(RemoteError::transient("remote unreachable"));
        }
        if let Some(error) = self.state.lock().failures.pop_front() {
            return Err(error);
        }
        Ok(())
    }
}

impl Default for MockRemoteClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteClient for MockRemoteClient {
    fn create_remote(&self, key: RecordKey, payload: &Payload) -> RemoteResult<RemoteAck> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.gate()?;

        let mut state = self.state.lock();

        // Replayed create: the key already exists, return its identity.
        if let Some((remote_id, record)) = state
            .records
            .iter()
            .find(|(_, r)| r.key == key)
            .map(|(id, r)| (id.clone(), r.clone()))
        {
            return Ok(RemoteAck {
                remote_id,
                remote_version: record.version,
            });
        }

        let remote_id = format!("r-{}", state.next_id);
        state.next_id += 1;
        state.records.insert(
            remote_id.clone(),
            MockRecord {
                key,
                version: 1,
                payload: payload.clone(),
                natural_key: None,
            },
        );
        state.log_change(&remote_id, Some(payload.clone()));

        Ok(RemoteAck {
            remote_id,
            remote_version: 1,
        })
    }

    fn update_remote(
        &self,
        remote_id: &str,
        payload: &Payload,
        expected_version: u64,
    ) -> RemoteResult<RemoteAck> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.gate()?;

        let mut state = self.state.lock();
        let current_version = match state.records.get(remote_id) {
            Some(record) => record.version,
            None => {
                return Err(RemoteError::permanent(format!(
                    "unknown remote id {remote_id}"
                )))
            }
        };

        if current_version != expected_version {
            let current = state.current_change(remote_id);
            return Err(RemoteError::conflict(
                format!(
                    "version mismatch: remote at {current_version}, push expected {expected_version}"
                ),
                current,
            ));
        }

        if let Some(record) = state.records.get_mut(remote_id) {
            record.version += 1;
            record.payload = payload.clone();
        }
        state.log_change(remote_id, Some(payload.clone()));

        Ok(RemoteAck {
            remote_id: remote_id.to_string(),
            remote_version: current_version + 1,
        })
    }

    fn delete_remote(&self, remote_id: &str) -> RemoteResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.gate()?;

        let mut state = self.state.lock();
        if state.records.remove(remote_id).is_some() {
            state.log_change(remote_id, None);
        }
        Ok(())
    }

    fn fetch_changes_since(
        &self,
        checkpoint: &Checkpoint,
        limit: usize,
    ) -> RemoteResult<ChangeBatch> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.gate()?;

        let state = self.state.lock();
        let from: usize = checkpoint.as_str().parse().unwrap_or(0);
        let from = from.min(state.changes.len());
        let to = (from + limit).min(state.changes.len());

        Ok(ChangeBatch {
            changes: state.changes[from..to].to_vec(),
            checkpoint: Checkpoint::new(to.to_string()),
            has_more: to < state.changes.len(),
        })
    }

    fn health_check(&self) -> bool {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.load(Ordering::SeqCst)
    }
}
