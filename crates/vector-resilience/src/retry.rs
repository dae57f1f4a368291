//! Retry policy with exponential backoff.
//!
//! Provides configurable retry logic with optional jitter for retryable errors.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use vector_core::{VectorError, VectorResult};
use vector_telemetry::MetricsAggregator;

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total number of attempts, including the first
    pub retry_attempts: u32,
    /// Delay after the first failed attempt
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    /// Backoff multiplier
    pub backoff_factor: f64,
    /// Maximum delay between attempts
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Jitter factor (0.0 - 1.0)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: 0.0,
        }
    }
}

/// Retry policy implementation
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    metrics: Option<Arc<MetricsAggregator>>,
}

impl RetryPolicy {
    /// Create a new retry policy with the given configuration
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            metrics: None,
        }
    }

    /// Create with default configuration
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Count retries in `metrics`
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MetricsAggregator>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Calculate the delay after a failed attempt (0-indexed)
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.config.retry_delay.as_nanos() as f64;
        let delay = base * self.config.backoff_factor.powi(attempt as i32);
        let delay = delay.min(self.config.max_delay.as_nanos() as f64);

        let jitter_range = delay * self.config.jitter;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };

        Duration::from_nanos((delay + jitter).max(0.0).round() as u64)
    }

    /// Execute an operation with retry logic
    ///
    /// Non-retryable errors, such as `CircuitOpen`, end the call immediately
    /// without backoff.
    ///
    /// # Errors
    /// Returns the last error, unchanged, once the attempt budget is spent
    pub async fn execute<F, Fut, T>(&self, operation: F) -> VectorResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = VectorResult<T>>,
    {
        let attempts = self.config.retry_attempts.max(1);

        for attempt in 0..attempts {
            match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!(attempt = attempt + 1, "Retry succeeded");
                    }
                    return Ok(result);
                }
                Err(error) => {
                    if !error.is_retryable() || attempt + 1 == attempts {
                        return Err(error);
                    }

                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        attempt = attempt + 1,
                        retry_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying after error"
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.record_retry();
                    }

                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(VectorError::internal("Retry loop ended without an attempt"))
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

/// Builder for retry policy
#[derive(Debug, Default)]
pub struct RetryPolicyBuilder {
    config: RetryConfig,
}

impl RetryPolicyBuilder {
    /// Create a new builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the total number of attempts
    #[must_use]
    pub fn retry_attempts(mut self, n: u32) -> Self {
        self.config.retry_attempts = n;
        self
    }

    /// Set the first retry delay
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    /// Set max delay
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    /// Set backoff multiplier
    #[must_use]
    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.config.backoff_factor = factor;
        self
    }

    /// Set jitter factor
    #[must_use]
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.config.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Build the policy
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        RetryPolicy::new(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn transport(message: &str) -> VectorError {
        VectorError::transport("localhost:8000", message, Some(503))
    }

    #[test]
    fn test_delay_calculation() {
        let policy = RetryPolicyBuilder::new()
            .retry_delay(Duration::from_millis(100))
            .backoff_factor(2.0)
            .build();

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_with_max() {
        let policy = RetryPolicyBuilder::new()
            .retry_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(300))
            .build();

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(300));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(300));
    }

    #[test]
    fn test_delay_jitter_bounds() {
        let policy = RetryPolicyBuilder::new()
            .retry_delay(Duration::from_millis(100))
            .jitter(0.5)
            .build();

        for _ in 0..50 {
            let delay = policy.delay_for_attempt(0);
            assert!(delay >= Duration::from_millis(50));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[tokio::test]
    async fn test_retry_success_first_attempt() {
        let policy = RetryPolicy::with_defaults();
        let counter = Arc::new(AtomicU32::new(0));

        let result = policy
            .execute(|| {
                let c = Arc::clone(&counter);
                async move {
                    c.fetch_add(1, Ordering::Relaxed);
                    Ok::<_, VectorError>(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_schedule_and_last_error() {
        let metrics = Arc::new(MetricsAggregator::default());
        let policy = RetryPolicyBuilder::new()
            .retry_attempts(3)
            .retry_delay(Duration::from_secs(1))
            .backoff_factor(2.0)
            .build()
            .with_metrics(Arc::clone(&metrics));

        let started = Instant::now();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let result: VectorResult<()> = policy
            .execute(|| {
                let calls = Arc::clone(&calls);
                async move {
                    let mut calls = calls.lock();
                    calls.push(started.elapsed());
                    Err(transport(&format!("failure {}", calls.len())))
                }
            })
            .await;

        assert_eq!(result.unwrap_err(), transport("failure 3"));

        let calls = calls.lock();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0], Duration::ZERO);
        assert_eq!(calls[1], Duration::from_secs(1));
        assert_eq!(calls[2], Duration::from_secs(3));
        assert_eq!(metrics.snapshot().retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_success_after_failures() {
        let policy = RetryPolicyBuilder::new().retry_attempts(4).build();
        let counter = Arc::new(AtomicU32::new(0));

        let result = policy
            .execute(|| {
                let c = Arc::clone(&counter);
                async move {
                    if c.fetch_add(1, Ordering::Relaxed) < 2 {
                        Err(transport("unavailable"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::Relaxed), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_open_is_not_retried() {
        let policy = RetryPolicy::with_defaults();
        let counter = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let result: VectorResult<()> = policy
            .execute(|| {
                let c = Arc::clone(&counter);
                async move {
                    c.fetch_add(1, Ordering::Relaxed);
                    Err(VectorError::circuit_open("localhost:8000"))
                }
            })
            .await;

        assert!(matches!(result, Err(VectorError::CircuitOpen { .. })));
        assert_eq!(counter.load(Ordering::Relaxed), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_is_not_retried() {
        let policy = RetryPolicy::with_defaults();
        let counter = Arc::new(AtomicU32::new(0));

        let result: VectorResult<()> = policy
            .execute(|| {
                let c = Arc::clone(&counter);
                async move {
                    c.fetch_add(1, Ordering::Relaxed);
                    Err(VectorError::transport("localhost:8000", "HTTP 404", Some(404)))
                }
            })
            .await;

        assert_eq!(result.unwrap_err().status_code(), Some(404));
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }
}
