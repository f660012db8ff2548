//! Connectivity monitoring with debounce.

use crate::clock::Clock;
use crate::remote::RemoteClient;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tidemark_protocol::UnixMillis;
use tracing::{debug, info};

/// Handle for removing a connectivity subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

type StatusCallback = Box<dyn Fn(bool) + Send + Sync>;

#[derive(Debug)]
struct ProbeState {
    online: bool,
    consecutive_failures: u32,
    last_probe_at: Option<UnixMillis>,
}

/// Probes remote reachability and reports transitions.
///
/// Status changes asymmetrically: a single successful probe flips
/// online immediately, while flipping offline takes a configured number
/// of consecutive failures (fail slow, recover fast), so one dropped
/// packet does not flap the engine. Probes are rate-limited to the
/// minimum interval so a down endpoint is not hammered.
///
/// Subscribers are dispatched synchronously on the probing thread and
/// must not call back into the monitor.
pub struct ConnectivityMonitor {
    remote: Arc<dyn RemoteClient>,
    clock: Arc<dyn Clock>,
    min_probe_interval: Duration,
    offline_after_failures: u32,
    state: Mutex<ProbeState>,
    subscribers: RwLock<Vec<(u64, StatusCallback)>>,
    next_subscriber_id: AtomicU64,
}

impl ConnectivityMonitor {
    /// Creates a monitor.
    ///
    /// The monitor starts optimistically online; the first failed probe
    /// window corrects it.
    pub fn new(
        remote: Arc<dyn RemoteClient>,
        clock: Arc<dyn Clock>,
        min_probe_interval: Duration,
        offline_after_failures: u32,
    ) -> Self {
        Self {
            remote,
            clock,
            min_probe_interval,
            offline_after_failures: offline_after_failures.max(1),
            state: Mutex::new(ProbeState {
                online: true,
                consecutive_failures: 0,
                last_probe_at: None,
            }),
            subscribers: RwLock::new(Vec::new()),
            next_subscriber_id: AtomicU64::new(1),
        }
    }

    /// Returns the cached, debounced status without probing.
    pub fn is_online(&self) -> bool {
        self.state.lock().online
    }

    /// Forces a probe regardless of the rate limit and returns the
    /// resulting status.
    pub fn check_now(&self) -> bool {
        self.probe()
    }

    /// Probes only if the minimum interval has elapsed; otherwise
    /// returns the cached status. Called from the scheduler tick.
    pub fn maybe_probe(&self) -> bool {
        let now = self.clock.now_millis();
        {
            let state = self.state.lock();
            if let Some(last) = state.last_probe_at {
                if now - last < self.min_probe_interval.as_millis() as i64 {
                    return state.online;
                }
            }
        }
        self.probe()
    }

    /// Registers a callback invoked on every online/offline transition.
    pub fn subscribe(&self, callback: impl Fn(bool) + Send + Sync + 'static) -> SubscriptionId {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.write().push((id, Box::new(callback)));
        SubscriptionId(id)
    }

    /// Removes a subscriber.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.write().retain(|(sid, _)| *sid != id.0);
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    fn probe(&self) -> bool {
        let reachable = self.remote.health_check();
        let now = self.clock.now_millis();

        let transition = {
            let mut state = self.state.lock();
            state.last_probe_at = Some(now);

            if reachable {
                state.consecutive_failures = 0;
                if !state.online {
                    state.online = true;
                    Some(true)
                } else {
                    None
                }
            } else {
                state.consecutive_failures += 1;
                if state.online && state.consecutive_failures >= self.offline_after_failures {
                    state.online = false;
                    Some(false)
                } else {
                    None
                }
            }
        };

        if let Some(online) = transition {
            if online {
                info!("connectivity restored");
            } else {
                info!(
                    failures = self.offline_after_failures,
                    "connectivity lost"
                );
            }
            self.notify(online);
        } else {
            debug!(reachable, "probe");
        }

        self.state.lock().online
    }

    fn notify(&self, online: bool) {
        let subscribers = self.subscribers.read();
        for (_, callback) in subscribers.iter() {
            callback(online);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::remote::MockRemoteClient;
    use std::sync::atomic::AtomicUsize;

    fn monitor(
        remote: &Arc<MockRemoteClient>,
        clock: &Arc<ManualClock>,
    ) -> ConnectivityMonitor {
        ConnectivityMonitor::new(
            Arc::clone(remote) as Arc<dyn RemoteClient>,
            Arc::clone(clock) as Arc<dyn Clock>,
            Duration::from_secs(30),
            2,
        )
    }

    #[test]
    fn starts_online() {
        let remote = Arc::new(MockRemoteClient::new());
        let clock = Arc::new(ManualClock::new(0));
        assert!(monitor(&remote, &clock).is_online());
    }

    #[test]
    fn offline_requires_consecutive_failures() {
        let remote = Arc::new(MockRemoteClient::new());
        let clock = Arc::new(ManualClock::new(0));
        let monitor = monitor(&remote, &clock);

        remote.set_connected(false);
        assert!(monitor.check_now()); // one failure: still online
        assert!(!monitor.check_now()); // second failure: offline
    }

    #[test]
    fn recovers_on_first_success() {
        let remote = Arc::new(MockRemoteClient::new());
        let clock = Arc::new(ManualClock::new(0));
        let monitor = monitor(&remote, &clock);

        remote.set_connected(false);
        monitor.check_now();
        monitor.check_now();
        assert!(!monitor.is_online());

        remote.set_connected(true);
        assert!(monitor.check_now());
    }

    #[test]
    fn success_resets_failure_streak() {
        let remote = Arc::new(MockRemoteClient::new());
        let clock = Arc::new(ManualClock::new(0));
        let monitor = monitor(&remote, &clock);

        remote.set_connected(false);
        monitor.check_now();
        remote.set_connected(true);
        monitor.check_now();
        remote.set_connected(false);
        // Streak restarted; one failure is not enough again.
        assert!(monitor.check_now());
    }

    #[test]
    fn maybe_probe_respects_min_interval() {
        let remote = Arc::new(MockRemoteClient::new());
        let clock = Arc::new(ManualClock::new(0));
        let monitor = monitor(&remote, &clock);

        monitor.maybe_probe();
        monitor.maybe_probe();
        assert_eq!(remote.probe_calls(), 1);

        clock.advance(Duration::from_secs(30));
        monitor.maybe_probe();
        assert_eq!(remote.probe_calls(), 2);
    }

    #[test]
    fn subscribers_see_transitions() {
        let remote = Arc::new(MockRemoteClient::new());
        let clock = Arc::new(ManualClock::new(0));
        let monitor = monitor(&remote, &clock);

        let transitions = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&transitions);
        let id = monitor.subscribe(move |online| seen.lock().push(online));

        remote.set_connected(false);
        monitor.check_now();
        monitor.check_now();
        remote.set_connected(true);
        monitor.check_now();

        assert_eq!(*transitions.lock(), vec![false, true]);

        monitor.unsubscribe(id);
        assert_eq!(monitor.subscriber_count(), 0);
    }

    #[test]
    fn unsubscribed_callback_is_not_called() {
        let remote = Arc::new(MockRemoteClient::new());
        let clock = Arc::new(ManualClock::new(0));
        let monitor = monitor(&remote, &clock);

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let id = monitor.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        monitor.unsubscribe(id);

        remote.set_connected(false);
        monitor.check_now();
        monitor.check_now();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
