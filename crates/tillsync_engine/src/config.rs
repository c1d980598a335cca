//! Configuration for the sync engine.

use rand::Rng;
use std::time::Duration;

/// Configuration for draining the queue and reconciling the cache.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Backoff between retries of a transiently failing operation.
    pub retry: RetryConfig,
    /// Upper bound on any single remote call.
    pub request_timeout: Duration,
    /// Resource types pulled during reconciliation.
    pub tracked_resources: Vec<String>,
    /// Capacity of the event channel; slow subscribers lag beyond it.
    pub event_capacity: usize,
    /// Drop completed operations once a full drain has been reconciled.
    pub purge_completed: bool,
}

impl EngineConfig {
    /// Creates a configuration tracking the given resource types.
    pub fn new<I, S>(tracked_resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tracked_resources: tracked_resources.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Adds a resource type to reconcile.
    pub fn with_tracked_resource(mut self, resource: impl Into<String>) -> Self {
        self.tracked_resources.push(resource.into());
        self
    }

    /// Sets the event channel capacity (at least 1).
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Purges completed operations after every reconciled drain.
    pub fn with_purge_completed(mut self, purge: bool) -> Self {
        self.purge_completed = purge;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            request_timeout: Duration::from_secs(15),
            tracked_resources: vec!["products".into(), "customers".into()],
            event_capacity: 256,
            purge_completed: false,
        }
    }
}

/// Configuration for retry behavior.
///
/// The attempt ceiling belongs to each queued operation
/// (`StoreConfig::default_max_attempts`); this only shapes the waits.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Maximum delay between retries, before jitter.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a retry configuration with the given first delay.
    pub fn new(initial_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier (at least 1.0).
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Calculates the wait after `attempts` failed attempts.
    ///
    /// `initial_delay * multiplier^(attempts - 1)`, capped at `max_delay`,
    /// plus up to 25% jitter. Zero attempts means no wait. Delays too
    /// large for a `Duration` saturate at `max_delay`.
    pub fn delay_for_attempt(&self, attempts: u32) -> Duration {
        if attempts == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempts - 1).unwrap_or(i32::MAX);
        let multiplier = self.backoff_multiplier.max(1.0);
        let base_delay = self.initial_delay.as_secs_f64() * multiplier.powi(exponent);
        let mut delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter && delay_secs > 0.0 {
            delay_secs += delay_secs * rand::thread_rng().gen_range(0.0..=0.25);
        }
        Duration::try_from_secs_f64(delay_secs).unwrap_or(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

/// Configuration for the connectivity monitor.
#[derive(Debug, Clone)]
pub struct ConnectivityConfig {
    /// How long a changed signal must persist before it is committed.
    pub min_dwell: Duration,
    /// How often the reachability probe runs, when one is installed.
    pub probe_interval: Duration,
}

impl ConnectivityConfig {
    /// Shortest accepted probe interval.
    pub const MIN_PROBE_INTERVAL: Duration = Duration::from_secs(1);
    /// Longest accepted probe interval.
    pub const MAX_PROBE_INTERVAL: Duration = Duration::from_secs(600);

    /// Sets the debounce window.
    pub fn with_min_dwell(mut self, dwell: Duration) -> Self {
        self.min_dwell = dwell;
        self
    }

    /// Sets the probe interval, clamped to the accepted bounds.
    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval.clamp(Self::MIN_PROBE_INTERVAL, Self::MAX_PROBE_INTERVAL);
        self
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            min_dwell: Duration::from_secs(2),
            probe_interval: Duration::from_secs(20),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_config_builder() {
        let config = EngineConfig::new(["products"])
            .with_tracked_resource("customers")
            .with_request_timeout(Duration::from_secs(3))
            .with_event_capacity(0)
            .with_purge_completed(true);

        assert_eq!(config.tracked_resources, vec!["products", "customers"]);
        assert_eq!(config.request_timeout, Duration::from_secs(3));
        assert_eq!(config.event_capacity, 1);
        assert!(config.purge_completed);
        assert!(!EngineConfig::default().purge_completed);
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(Duration::from_millis(100)).with_backoff_multiplier(2.0);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);

        let delay1 = config.delay_for_attempt(1);
        assert!(delay1 >= Duration::from_millis(100));
        assert!(delay1 <= Duration::from_millis(126));

        let delay3 = config.delay_for_attempt(3);
        assert!(delay3 >= Duration::from_millis(399));
        assert!(delay3 <= Duration::from_millis(501));
    }

    #[test]
    fn retry_delay_without_jitter_is_exact() {
        let config = RetryConfig::new(Duration::from_secs(1)).with_jitter(false);
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(4), Duration::from_secs(8));
    }

    #[test]
    fn uncapped_delay_saturates() {
        let config = RetryConfig::new(Duration::from_secs(1)).with_max_delay(Duration::MAX);
        assert_eq!(config.delay_for_attempt(80), Duration::MAX);
        assert_eq!(config.delay_for_attempt(u32::MAX), Duration::MAX);

        let config = config.with_jitter(false);
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(4));
    }

    #[test]
    fn shrinking_multiplier_is_clamped() {
        let config = RetryConfig::new(Duration::from_secs(1))
            .with_backoff_multiplier(-2.0)
            .with_jitter(false);
        assert_eq!(config.backoff_multiplier, 1.0);
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(1));

        let config = RetryConfig {
            backoff_multiplier: f64::NAN,
            ..config
        };
        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(1));
    }

    #[test]
    fn probe_interval_is_bounded() {
        let config = ConnectivityConfig::default().with_probe_interval(Duration::from_millis(1));
        assert_eq!(config.probe_interval, ConnectivityConfig::MIN_PROBE_INTERVAL);

        let config = ConnectivityConfig::default().with_probe_interval(Duration::from_secs(86_400));
        assert_eq!(config.probe_interval, ConnectivityConfig::MAX_PROBE_INTERVAL);
    }

    proptest::proptest! {
        #[test]
        fn retry_delay_stays_within_cap(
            attempts in 1u32..64,
            initial_ms in 1u64..5_000,
            cap_ms in 1u64..60_000,
        ) {
            let config = RetryConfig::new(Duration::from_millis(initial_ms))
                .with_max_delay(Duration::from_millis(cap_ms));
            let delay = config.delay_for_attempt(attempts);
            let cap = Duration::from_millis(cap_ms);
            proptest::prop_assert!(delay <= cap + cap / 4 + Duration::from_millis(1));
        }

        #[test]
        fn retry_delay_never_shrinks(attempts in 1u32..30) {
            let config = RetryConfig::new(Duration::from_millis(50)).with_jitter(false);
            proptest::prop_assert!(
                config.delay_for_attempt(attempts + 1) >= config.delay_for_attempt(attempts)
            );
        }
    }
}
