//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use offsync_protocol::{ClientId, Operation, OperationStatus, Timestamp};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// Shortest interval a periodic background sync may be registered with.
pub const MIN_PERIODIC_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Largest fraction of a delay that jitter may add.
const MAX_JITTER: f64 = 0.25;

/// What the engine does with operations the server reports as conflicting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Leave them in `conflict` until the caller resolves them.
    #[default]
    Manual,
    /// Resolve with last-write-wins right after the drain that found them.
    AutoLastWriteWins,
}

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Identity of this client.
    pub client_id: ClientId,
    /// Server URL, e.g. `https://api.example.com`.
    pub server_url: String,
    /// Bearer token sent with every request.
    pub token: Option<String>,
    /// Bound on every replayed request.
    pub timeout: Duration,
    /// Maximum operations submitted per drain pass. `None` drains everything.
    pub batch_size: Option<usize>,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Conflict handling.
    pub conflict_policy: ConflictPolicy,
    /// Connectivity debounce.
    pub network: NetworkConfig,
    /// Drain triggers.
    pub trigger: TriggerConfig,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(client_id: ClientId, server_url: impl Into<String>) -> Self {
        Self {
            client_id,
            server_url: server_url.into(),
            token: None,
            timeout: Duration::from_secs(30),
            batch_size: None,
            retry: RetryConfig::default(),
            conflict_policy: ConflictPolicy::default(),
            network: NetworkConfig::default(),
            trigger: TriggerConfig::default(),
        }
    }

    /// Sets the bearer token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Limits how many operations one drain pass submits.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the conflict policy.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Sets the network configuration.
    pub fn with_network(mut self, network: NetworkConfig) -> Self {
        self.network = network;
        self
    }

    /// Sets the trigger configuration.
    pub fn with_trigger(mut self, trigger: TriggerConfig) -> Self {
        self.trigger = trigger;
        self
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] describing the first violation.
    pub fn validate(&self) -> SyncResult<()> {
        if self.timeout.is_zero() {
            return Err(SyncError::Config("request timeout must be non-zero".into()));
        }
        if self.batch_size == Some(0) {
            return Err(SyncError::Config("batch size must be at least 1".into()));
        }
        self.retry.validate()?;
        self.trigger.validate()
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(ClientId::new(), "")
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Transient failures tolerated before an operation becomes `failed`.
    pub max_retries: u32,
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: false,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.add_jitter = jitter;
        self
    }

    /// Checks that delays can never shrink between attempts.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] for a multiplier below 1 (or below
    /// 1.25 with jitter) or a cap below the initial delay.
    pub fn validate(&self) -> SyncResult<()> {
        let floor = if self.add_jitter { 1.0 + MAX_JITTER } else { 1.0 };
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier < floor {
            return Err(SyncError::Config(format!(
                "backoff multiplier {} must be at least {floor}",
                self.backoff_multiplier
            )));
        }
        if self.max_delay < self.initial_delay {
            return Err(SyncError::Config(
                "max delay must not be below the initial delay".into(),
            ));
        }
        Ok(())
    }

    /// Calculates the delay before retry number `attempt` (0 means none yet).
    ///
    /// Without jitter the delay is `initial * multiplier^(attempt-1)` capped
    /// at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.delay_with_seed(attempt, 0)
    }

    /// Like [`delay_for_attempt`](Self::delay_for_attempt), with jitter drawn
    /// from a generator seeded by `seed` and `attempt`.
    ///
    /// Jitter is applied before the cap and never exceeds 25%, so for a
    /// multiplier of at least 1.25 the sequence stays non-decreasing.
    pub fn delay_with_seed(&self, attempt: u32, seed: u64) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let mut delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);

        if self.add_jitter {
            let mut rng = StdRng::seed_from_u64(seed ^ u64::from(attempt));
            delay_secs *= 1.0 + rng.gen_range(0.0..=MAX_JITTER);
        }

        let capped = delay_secs.min(self.max_delay.as_secs_f64());
        if capped.is_finite() {
            Duration::from_secs_f64(capped.max(0.0))
        } else {
            self.max_delay
        }
    }

    /// Earliest time an `error` operation may be attempted again.
    ///
    /// `None` for operations that are not waiting on a backoff.
    pub fn next_attempt_at(&self, op: &Operation) -> Option<Timestamp> {
        if op.status != OperationStatus::Error {
            return None;
        }
        let last = op.last_retry_at?;
        let seed = op.id.as_uuid().as_u64_pair().0;
        let delay = self.delay_with_seed(op.retries, seed);
        Some(last.saturating_add(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

/// Connectivity debounce settings.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// A platform signal must hold this long before it is acted on.
    pub debounce: Duration,
    /// Whether the engine starts out assuming it is online.
    pub assume_online: bool,
}

impl NetworkConfig {
    /// Sets the debounce window.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Sets the initial connectivity assumption.
    pub fn with_assume_online(mut self, online: bool) -> Self {
        self.assume_online = online;
        self
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(2),
            assume_online: false,
        }
    }
}

/// When drains run.
#[derive(Debug, Clone)]
pub struct TriggerConfig {
    /// Drain right after an enqueue while online.
    pub sync_on_enqueue: bool,
    /// Drain when connectivity returns.
    pub sync_on_reconnect: bool,
    /// Interval for the periodic trigger, if any.
    pub periodic_interval: Option<Duration>,
}

impl TriggerConfig {
    /// Enables the periodic trigger.
    pub fn with_periodic_interval(mut self, interval: Duration) -> Self {
        self.periodic_interval = Some(interval);
        self
    }

    /// Enables or disables draining on enqueue.
    pub fn with_sync_on_enqueue(mut self, enabled: bool) -> Self {
        self.sync_on_enqueue = enabled;
        self
    }

    /// Enables or disables draining on reconnect.
    pub fn with_sync_on_reconnect(mut self, enabled: bool) -> Self {
        self.sync_on_reconnect = enabled;
        self
    }

    /// Checks the periodic interval against [`MIN_PERIODIC_INTERVAL`].
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] for an interval under one hour.
    pub fn validate(&self) -> SyncResult<()> {
        match self.periodic_interval {
            Some(interval) if interval < MIN_PERIODIC_INTERVAL => Err(SyncError::Config(format!(
                "periodic interval {interval:?} is below the minimum of {MIN_PERIODIC_INTERVAL:?}"
            ))),
            _ => Ok(()),
        }
    }
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            sync_on_enqueue: true,
            sync_on_reconnect: true,
            periodic_interval: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_protocol::HttpMethod;
    use proptest::prelude::*;

    #[test]
    fn sync_config_builder() {
        let client = ClientId::new();
        let config = SyncConfig::new(client, "https://sync.example.com")
            .with_token("abc")
            .with_batch_size(25)
            .with_timeout(Duration::from_secs(60))
            .with_conflict_policy(ConflictPolicy::AutoLastWriteWins);

        assert_eq!(config.client_id, client);
        assert_eq!(config.server_url, "https://sync.example.com");
        assert_eq!(config.token.as_deref(), Some("abc"));
        assert_eq!(config.batch_size, Some(25));
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.conflict_policy, ConflictPolicy::AutoLastWriteWins);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = SyncConfig::default().with_timeout(Duration::ZERO);
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));
    }

    #[test]
    fn retry_config_no_retry() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.delay_for_attempt(3), Duration::ZERO);
    }

    #[test]
    fn default_delays_double_up_to_cap() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(16));
        assert_eq!(config.delay_for_attempt(6), Duration::from_secs(30));
        assert_eq!(config.delay_for_attempt(60), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_a_quarter_and_below_cap() {
        let config = RetryConfig::default().with_jitter(true);
        for seed in 0..50 {
            let d = config.delay_with_seed(2, seed);
            assert!(d >= Duration::from_secs(2));
            assert!(d <= Duration::from_millis(2500));
            assert!(config.delay_with_seed(10, seed) <= Duration::from_secs(30));
        }
    }

    #[test]
    fn jitter_requires_headroom_in_multiplier() {
        let config = RetryConfig::default()
            .with_jitter(true)
            .with_backoff_multiplier(1.1);
        assert!(config.validate().is_err());
        assert!(config.with_jitter(false).validate().is_ok());
    }

    #[test]
    fn periodic_interval_below_an_hour_is_rejected() {
        let trigger = TriggerConfig::default().with_periodic_interval(Duration::from_secs(600));
        assert!(trigger.validate().is_err());
        let trigger = TriggerConfig::default().with_periodic_interval(MIN_PERIODIC_INTERVAL);
        assert!(trigger.validate().is_ok());
    }

    #[test]
    fn next_attempt_only_for_error_operations() {
        let config = RetryConfig::default();
        let mut op = Operation::new(ClientId::new(), HttpMethod::Post, "/items", None, 0);
        assert_eq!(config.next_attempt_at(&op), None);

        op.status = OperationStatus::Error;
        op.retries = 2;
        op.last_retry_at = Some(10_000);
        assert_eq!(config.next_attempt_at(&op), Some(12_000));
    }

    proptest! {
        #[test]
        fn delays_never_decrease(
            initial_ms in 1u64..5_000,
            multiplier in 1.5f64..2.0,
            cap_factor in 1u64..50,
            jitter in any::<bool>(),
            seed in any::<u64>(),
        ) {
            let config = RetryConfig::new(10)
                .with_initial_delay(Duration::from_millis(initial_ms))
                .with_max_delay(Duration::from_millis(initial_ms * cap_factor))
                .with_backoff_multiplier(multiplier)
                .with_jitter(jitter);
            prop_assert!(config.validate().is_ok());

            let mut previous = Duration::ZERO;
            for attempt in 1..=20 {
                let delay = config.delay_with_seed(attempt, seed);
                prop_assert!(delay >= previous, "attempt {attempt}: {delay:?} < {previous:?}");
                prop_assert!(delay <= config.max_delay);
                previous = delay;
            }
        }
    }
}
