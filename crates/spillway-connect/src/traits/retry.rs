//! Bounded retry with exponential backoff
//!
//! Used in two places: the export worker budgets how often a single block may
//! be restarted before the source is failed ([`RetryGuard`]), and importers
//! retry transient write-path failures ([`retry_result`]).

use crate::error::ConnectorResult;
use std::future::Future;
use std::time::Duration;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt)
    pub max_retries: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 doubles delay each retry)
    pub backoff_multiplier: f64,
    /// Optional jitter factor (0.0 to 1.0) to add randomness to delays
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    /// Create a new retry config
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a retry config with no retries (fail immediately)
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Create a retry config with fixed delay (no exponential backoff)
    pub fn fixed_delay(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }

    /// Set max retries (builder pattern)
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set initial delay (builder pattern)
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set max delay (builder pattern)
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier (builder pattern)
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set jitter factor (builder pattern)
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Calculate delay before retry number `attempt` (1-indexed; 0 means no delay)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let capped_attempt = attempt.min(30);
        let base_delay = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(capped_attempt as i32 - 1);
        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        // deterministic jitter so tests stay reproducible
        let jitter = if self.jitter_factor > 0.0 {
            let jitter_range = capped_delay * self.jitter_factor;
            let jitter_value = (attempt as f64 * 0.618033988749895) % 1.0;
            jitter_range * (jitter_value - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((capped_delay + jitter).max(0.0) as u64)
    }
}

/// Execute an async operation, retrying retryable errors with backoff.
///
/// Non-retryable errors are returned on the first failure.
pub async fn retry_result<T, F, Fut>(config: &RetryConfig, mut operation: F) -> ConnectorResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ConnectorResult<T>>,
{
    let mut guard = RetryGuard::new(config.clone());

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => match guard.record_attempt() {
                Some(delay) => {
                    tracing::debug!(
                        attempt = guard.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => return Err(e),
            },
            Err(e) => return Err(e),
        }
    }
}

/// Tracks consecutive attempts of one unit of work and yields backoff delays.
///
/// The export worker keeps one guard per source and resets it whenever a
/// block is acknowledged, so the budget applies to a single block.
#[derive(Debug)]
pub struct RetryGuard {
    config: RetryConfig,
    attempt: u32,
    start_time: std::time::Instant,
}

impl RetryGuard {
    /// Create a new retry guard
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            attempt: 0,
            start_time: std::time::Instant::now(),
        }
    }

    /// Check if another attempt should be made
    pub fn should_retry(&self) -> bool {
        self.attempt <= self.config.max_retries
    }

    /// Record a failed attempt and get the delay before the next one.
    ///
    /// Returns `None` once the retry budget is spent.
    pub fn record_attempt(&mut self) -> Option<Duration> {
        self.attempt += 1;

        if self.attempt <= self.config.max_retries {
            Some(self.config.delay_for_attempt(self.attempt))
        } else {
            None
        }
    }

    /// Failed attempts recorded so far
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Get elapsed time since guard creation or last reset
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Reset the guard for the next unit of work
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.start_time = std::time::Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectorError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_retry_config_no_retry() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_retries, 0);
        let mut guard = RetryGuard::new(config);
        assert!(guard.record_attempt().is_none());
    }

    #[test]
    fn test_delay_calculation_exponential() {
        let config = RetryConfig::new()
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0)
            .with_jitter(0.0);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let config = RetryConfig::new()
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0)
            .with_jitter(0.0);

        assert_eq!(config.delay_for_attempt(4), Duration::from_secs(5));
    }

    #[test]
    fn test_retry_guard_budget_and_reset() {
        let mut guard = RetryGuard::new(RetryConfig::fixed_delay(2, Duration::from_millis(5)));

        assert_eq!(guard.record_attempt(), Some(Duration::from_millis(5)));
        assert_eq!(guard.record_attempt(), Some(Duration::from_millis(5)));
        assert!(guard.record_attempt().is_none());
        assert_eq!(guard.attempt(), 3);
        assert!(!guard.should_retry());

        guard.reset();
        assert_eq!(guard.attempt(), 0);
        assert!(guard.should_retry());
    }

    #[tokio::test]
    async fn test_retry_result_transient_then_success() {
        let config = RetryConfig::fixed_delay(3, Duration::from_millis(1));
        let counter = Arc::new(AtomicU32::new(0));

        let result = retry_result(&config, || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ConnectorError::transient("busy"))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_result_exhausted() {
        let config = RetryConfig::fixed_delay(2, Duration::from_millis(1));
        let counter = Arc::new(AtomicU32::new(0));

        let result: ConnectorResult<()> = retry_result(&config, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ConnectorError::transient("always"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_result_fatal_not_retried() {
        let config = RetryConfig::fixed_delay(5, Duration::from_millis(1));
        let counter = Arc::new(AtomicU32::new(0));

        let result: ConnectorResult<()> = retry_result(&config, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ConnectorError::fatal("broken"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
