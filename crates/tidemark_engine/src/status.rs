//! Sync status surface and subscriptions.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tidemark_protocol::UnixMillis;

/// Handle for removing a status subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSubscriptionId(u64);

/// A point-in-time view of the engine's sync health.
///
/// This is how sync-time trouble reaches the application: local calls
/// never throw for remote failures, they degrade these counters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncStatus {
    /// Debounced connectivity status.
    pub online: bool,
    /// Operations awaiting transmission.
    pub pending_count: usize,
    /// Terminally failed operations needing operator attention.
    pub failed_count: usize,
    /// Open conflicts awaiting manual review.
    pub conflict_count: usize,
    /// When the last successful cycle finished, absent if never.
    pub last_sync_at: Option<UnixMillis>,
}

type StatusCallback = Box<dyn Fn(&SyncStatus) + Send + Sync>;

/// Distributes status snapshots to registered subscribers.
///
/// Dispatch is synchronous on the emitting thread; callbacks must be
/// quick and must not call back into the engine.
#[derive(Default)]
pub struct StatusHub {
    subscribers: RwLock<Vec<(u64, StatusCallback)>>,
    next_id: AtomicU64,
}

impl StatusHub {
    /// Creates an empty hub.
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a callback for status updates.
    pub fn subscribe(
        &self,
        callback: impl Fn(&SyncStatus) + Send + Sync + 'static,
    ) -> StatusSubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.write().push((id, Box::new(callback)));
        StatusSubscriptionId(id)
    }

    /// Removes a subscriber.
    pub fn unsubscribe(&self, id: StatusSubscriptionId) {
        self.subscribers.write().retain(|(sid, _)| *sid != id.0);
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Delivers a status snapshot to every subscriber.
    pub fn emit(&self, status: &SyncStatus) {
        let subscribers = self.subscribers.read();
        for (_, callback) in subscribers.iter() {
            callback(status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn emit_reaches_all_subscribers() {
        let hub = StatusHub::new();
        let seen_a = Arc::new(Mutex::new(Vec::new()));
        let seen_b = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen_a);
        hub.subscribe(move |s| sink.lock().push(s.pending_count));
        let sink = Arc::clone(&seen_b);
        hub.subscribe(move |s| sink.lock().push(s.pending_count));

        hub.emit(&SyncStatus {
            pending_count: 3,
            ..SyncStatus::default()
        });

        assert_eq!(*seen_a.lock(), vec![3]);
        assert_eq!(*seen_b.lock(), vec![3]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let hub = StatusHub::new();
        let seen = Arc::new(Mutex::new(0usize));

        let sink = Arc::clone(&seen);
        let id = hub.subscribe(move |_| *sink.lock() += 1);

        hub.emit(&SyncStatus::default());
        hub.unsubscribe(id);
        hub.emit(&SyncStatus::default());

        assert_eq!(*seen.lock(), 1);
        assert_eq!(hub.subscriber_count(), 0);
    }
}
