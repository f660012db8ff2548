//! Configuration for the sync engine.

use std::time::Duration;

/// Configuration for sync cycles and connectivity probing.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum operations drained per push batch. Bounded so a single
    /// cycle stays finite and one stuck record cannot block the rest.
    pub push_batch_size: usize,
    /// Maximum changes requested per pull page.
    pub pull_batch_size: usize,
    /// Interval between scheduled sync cycles.
    pub sync_interval: Duration,
    /// Minimum interval between reachability probes.
    pub probe_interval: Duration,
    /// Consecutive probe failures before flipping to offline.
    pub offline_after_failures: u32,
}

impl EngineConfig {
    /// Creates a configuration with defaults.
    pub fn new() -> Self {
        Self {
            push_batch_size: 50,
            pull_batch_size: 100,
            sync_interval: Duration::from_secs(60),
            probe_interval: Duration::from_secs(30),
            offline_after_failures: 2,
        }
    }

    /// Sets the push batch size.
    #[must_use]
    pub fn with_push_batch_size(mut self, size: usize) -> Self {
        self.push_batch_size = size;
        self
    }

    /// Sets the pull batch size.
    #[must_use]
    pub fn with_pull_batch_size(mut self, size: usize) -> Self {
        self.pull_batch_size = size;
        self
    }

    /// Sets the scheduled sync interval.
    #[must_use]
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the minimum probe interval.
    #[must_use]
    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Sets the offline debounce threshold.
    #[must_use]
    pub fn with_offline_after_failures(mut self, failures: u32) -> Self {
        self.offline_after_failures = failures.max(1);
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder() {
        let config = EngineConfig::new()
            .with_push_batch_size(10)
            .with_pull_batch_size(20)
            .with_sync_interval(Duration::from_secs(5))
            .with_offline_after_failures(3);

        assert_eq!(config.push_batch_size, 10);
        assert_eq!(config.pull_batch_size, 20);
        assert_eq!(config.sync_interval, Duration::from_secs(5));
        assert_eq!(config.offline_after_failures, 3);
    }

    #[test]
    fn offline_debounce_is_at_least_one() {
        let config = EngineConfig::new().with_offline_after_failures(0);
        assert_eq!(config.offline_after_failures, 1);
    }
}
