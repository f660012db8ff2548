//! Configuration for the local store.

use std::time::Duration;

/// Retry backoff schedule for failed queue operations.
///
/// Delays are looked up by retry count; counts past the end of the
/// schedule stay at the last step, which caps the backoff.
#[derive(Debug, Clone)]
pub struct BackoffSchedule {
    steps: Vec<Duration>,
}

impl BackoffSchedule {
    /// Creates a schedule from explicit steps.
    ///
    /// Steps should be non-decreasing; the retry delay never shrinks as
    /// the retry count grows as long as they are.
    pub fn new(steps: Vec<Duration>) -> Self {
        debug_assert!(!steps.is_empty());
        Self { steps }
    }

    /// Returns the delay before the given attempt (1-indexed).
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        if retry_count == 0 {
            return Duration::ZERO;
        }
        let index = (retry_count as usize - 1).min(self.steps.len() - 1);
        self.steps[index]
    }

    /// Returns the delay in milliseconds, for schedule arithmetic.
    pub fn delay_millis(&self, retry_count: u32) -> i64 {
        self.delay_for(retry_count).as_millis() as i64
    }
}

impl Default for BackoffSchedule {
    /// 30 seconds, 5 minutes, 30 minutes, then 1 hour capped.
    fn default() -> Self {
        Self::new(vec![
            Duration::from_secs(30),
            Duration::from_secs(5 * 60),
            Duration::from_secs(30 * 60),
            Duration::from_secs(60 * 60),
        ])
    }
}

/// Configuration for the local store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Retry attempts allowed per queued operation.
    pub max_retries: u32,
    /// Backoff schedule applied between retries.
    pub backoff: BackoffSchedule,
    /// How long an operation may stay in flight before the watchdog
    /// reclaims it as a transient failure.
    pub in_flight_timeout: Duration,
}

impl StoreConfig {
    /// Creates a configuration with defaults.
    pub fn new() -> Self {
        Self {
            max_retries: 3,
            backoff: BackoffSchedule::default(),
            in_flight_timeout: Duration::from_secs(5 * 60),
        }
    }

    /// Sets the retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the backoff schedule.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffSchedule) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the in-flight watchdog timeout.
    #[must_use]
    pub fn with_in_flight_timeout(mut self, timeout: Duration) -> Self {
        self.in_flight_timeout = timeout;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_steps() {
        let schedule = BackoffSchedule::default();

        assert_eq!(schedule.delay_for(0), Duration::ZERO);
        assert_eq!(schedule.delay_for(1), Duration::from_secs(30));
        assert_eq!(schedule.delay_for(2), Duration::from_secs(300));
        assert_eq!(schedule.delay_for(3), Duration::from_secs(1800));
        assert_eq!(schedule.delay_for(4), Duration::from_secs(3600));
        // Capped at the last step.
        assert_eq!(schedule.delay_for(50), Duration::from_secs(3600));
    }

    #[test]
    fn delays_never_decrease() {
        let schedule = BackoffSchedule::default();
        let mut previous = Duration::ZERO;
        for retry in 1..20 {
            let delay = schedule.delay_for(retry);
            assert!(delay >= previous, "delay shrank at retry {retry}");
            previous = delay;
        }
    }

    #[test]
    fn config_builder() {
        let config = StoreConfig::new()
            .with_max_retries(5)
            .with_in_flight_timeout(Duration::from_secs(60));

        assert_eq!(config.max_retries, 5);
        assert_eq!(config.in_flight_timeout, Duration::from_secs(60));
    }
}
