//! Queued outbound operations.

use crate::payload::Payload;
use crate::record::{RecordKey, UnixMillis};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of mutation an operation carries to the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Create the record on the remote.
    Create,
    /// Update an existing remote record.
    Update,
    /// Delete the remote record.
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Create => f.write_str("create"),
            OperationKind::Update => f.write_str("update"),
            OperationKind::Delete => f.write_str("delete"),
        }
    }
}

/// Lifecycle status of a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Waiting to be sent (possibly backoff-delayed via `scheduled_at`).
    Pending,
    /// Currently being transmitted.
    InFlight,
    /// Acknowledged by the remote. Completed operations are deleted from
    /// the queue rather than retained.
    Completed,
    /// Retries exhausted or permanently rejected.
    Failed,
    /// Superseded before transmission (e.g. by a later delete).
    Cancelled,
}

impl OperationStatus {
    /// Returns true if the operation still awaits transmission.
    pub fn is_open(&self) -> bool {
        matches!(self, OperationStatus::Pending | OperationStatus::InFlight)
    }
}

/// A durable intent to replay one local mutation against the remote.
///
/// The payload is a snapshot taken at enqueue time, not a live view:
/// the record may mutate again before this operation is sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    /// Locally unique, monotonically increasing. Defines processing
    /// order among operations of equal priority.
    pub op_id: u64,
    /// The mutation kind.
    pub kind: OperationKind,
    /// Key of the target record.
    pub record_key: RecordKey,
    /// Snapshot of the record data at enqueue time (absent for deletes).
    pub payload: Option<Payload>,
    /// Higher values are processed first within the same readiness window.
    pub priority: i32,
    /// Attempts made so far.
    pub retry_count: u32,
    /// Attempts allowed before the operation fails terminally.
    pub max_retries: u32,
    /// Earliest time this operation may be attempted.
    pub scheduled_at: UnixMillis,
    /// Current status.
    pub status: OperationStatus,
    /// Message from the most recent failed attempt.
    pub last_error: Option<String>,
    /// When the operation was enqueued.
    pub enqueued_at: UnixMillis,
    /// When the operation last went in flight. Used by the watchdog to
    /// reclaim operations orphaned by a crash mid-transmission.
    pub dispatched_at: Option<UnixMillis>,
}

impl QueuedOperation {
    /// Creates a pending create operation.
    pub fn create(
        op_id: u64,
        record_key: RecordKey,
        payload: Payload,
        max_retries: u32,
        now: UnixMillis,
    ) -> Self {
        Self::new(op_id, OperationKind::Create, record_key, Some(payload), max_retries, now)
    }

    /// Creates a pending update operation.
    pub fn update(
        op_id: u64,
        record_key: RecordKey,
        payload: Payload,
        max_retries: u32,
        now: UnixMillis,
    ) -> Self {
        Self::new(op_id, OperationKind::Update, record_key, Some(payload), max_retries, now)
    }

    /// Creates a pending delete operation.
    pub fn delete(op_id: u64, record_key: RecordKey, max_retries: u32, now: UnixMillis) -> Self {
        Self::new(op_id, OperationKind::Delete, record_key, None, max_retries, now)
    }

    fn new(
        op_id: u64,
        kind: OperationKind,
        record_key: RecordKey,
        payload: Option<Payload>,
        max_retries: u32,
        now: UnixMillis,
    ) -> Self {
        Self {
            op_id,
            kind,
            record_key,
            payload,
            priority: 0,
            retry_count: 0,
            max_retries,
            scheduled_at: now,
            status: OperationStatus::Pending,
            last_error: None,
            enqueued_at: now,
            dispatched_at: None,
        }
    }

    /// Sets the priority, returning `self` for chaining.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Returns true if the operation may be attempted at `now`.
    pub fn is_ready(&self, now: UnixMillis) -> bool {
        self.status == OperationStatus::Pending && self.scheduled_at <= now
    }

    /// Returns true if another failure would exhaust the retry budget.
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}
