//! Circuit breaker pattern implementation.
//!
//! The circuit breaker stops issuing calls to a failing endpoint and lets it
//! recover. Admission and outcome recording go through one lock, so
//! concurrent outcomes cannot race past the threshold comparison.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vector_core::{VectorError, VectorResult};
use vector_telemetry::MetricsAggregator;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed,
    /// Circuit is open, requests are rejected
    Open,
    /// Circuit is half-open, a single trial call is admitted
    HalfOpen,
}

impl CircuitState {
    /// State name for logs and reports
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Time since the last failure before a trial call is admitted
    #[serde(with = "humantime_serde")]
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    trial_in_flight: bool,
    times_opened: u64,
}

/// Circuit breaker for a single endpoint
pub struct CircuitBreaker {
    endpoint: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    metrics: Option<Arc<MetricsAggregator>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    #[must_use]
    pub fn new(endpoint: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            endpoint: endpoint.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure_at: None,
                trial_in_flight: false,
                times_opened: 0,
            }),
            metrics: None,
        }
    }

    /// Create with default configuration
    #[must_use]
    pub fn with_defaults(endpoint: impl Into<String>) -> Self {
        Self::new(endpoint, CircuitBreakerConfig::default())
    }

    /// Count rejections in `metrics`
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MetricsAggregator>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Get the endpoint this breaker guards
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get the current state
    ///
    /// An open circuit whose recovery timeout has elapsed reports `HalfOpen`
    /// even before the trial call is admitted.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let inner = self.inner.lock();
        if inner.state == CircuitState::Open && self.recovery_elapsed(&inner) {
            CircuitState::HalfOpen
        } else {
            inner.state
        }
    }

    /// Ask for admission of one call.
    ///
    /// The returned permit must be settled with [`CircuitPermit::success`] or
    /// [`CircuitPermit::failure`]. A permit dropped unsettled records nothing,
    /// but frees the half-open trial slot it may hold.
    ///
    /// # Errors
    /// Returns `VectorError::CircuitOpen` if the circuit rejects the call
    pub fn admit(&self) -> VectorResult<CircuitPermit<'_>> {
        let mut inner = self.inner.lock();
        let state = inner.state;

        let trial = match state {
            CircuitState::Closed => false,
            CircuitState::Open if self.recovery_elapsed(&inner) => {
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = true;
                info!(endpoint = %self.endpoint, "Circuit breaker half-open, testing");
                true
            }
            CircuitState::HalfOpen if !inner.trial_in_flight => {
                inner.trial_in_flight = true;
                true
            }
            CircuitState::Open | CircuitState::HalfOpen => {
                drop(inner);
                debug!(endpoint = %self.endpoint, "Circuit breaker rejected call");
                if let Some(metrics) = &self.metrics {
                    metrics.record_circuit_rejection();
                }
                return Err(VectorError::circuit_open(&self.endpoint));
            }
        };

        Ok(CircuitPermit {
            breaker: self,
            trial,
            settled: false,
        })
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.trial_in_flight = false;

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                self.transition_to_closed(&mut inner);
            }
            CircuitState::Open => {
                // A call admitted before the circuit opened; the open timer stands.
            }
        }
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.trial_in_flight = false;
        inner.last_failure_at = Some(Instant::now());

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    debug!(
                        endpoint = %self.endpoint,
                        failures = inner.consecutive_failures,
                        threshold = self.config.failure_threshold,
                        "Circuit breaker failure threshold reached"
                    );
                    self.transition_to_open(&mut inner);
                }
            }
            CircuitState::HalfOpen => {
                debug!(endpoint = %self.endpoint, "Circuit breaker half-open failure, reopening");
                inner.consecutive_failures += 1;
                self.transition_to_open(&mut inner);
            }
            CircuitState::Open => {
                inner.consecutive_failures += 1;
            }
        }
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        self.transition_to_closed(&mut inner);
    }

    /// Force the circuit open (for testing or manual intervention)
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        inner.last_failure_at = Some(Instant::now());
        self.transition_to_open(&mut inner);
    }

    /// Get current statistics
    #[must_use]
    pub fn stats(&self) -> CircuitBreakerStats {
        let state = self.state();
        let inner = self.inner.lock();
        CircuitBreakerStats {
            state,
            consecutive_failures: inner.consecutive_failures,
            failure_threshold: self.config.failure_threshold,
            since_last_failure: inner.last_failure_at.map(|at| at.elapsed()),
            times_opened: inner.times_opened,
        }
    }

    fn recovery_elapsed(&self, inner: &Inner) -> bool {
        inner
            .last_failure_at
            .map_or(true, |at| at.elapsed() >= self.config.recovery_timeout)
    }

    fn transition_to_open(&self, inner: &mut Inner) {
        let previous = inner.state;
        inner.state = CircuitState::Open;
        inner.trial_in_flight = false;

        if previous != CircuitState::Open {
            inner.times_opened += 1;
            warn!(
                endpoint = %self.endpoint,
                failures = inner.consecutive_failures,
                recovery_timeout_ms = self.config.recovery_timeout.as_millis() as u64,
                "Circuit breaker opened"
            );
        }
    }

    fn transition_to_closed(&self, inner: &mut Inner) {
        let previous = inner.state;
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.trial_in_flight = false;

        if previous != CircuitState::Closed {
            info!(endpoint = %self.endpoint, "Circuit breaker closed");
        }
    }

    fn release_trial(&self) {
        self.inner.lock().trial_in_flight = false;
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("endpoint", &self.endpoint)
            .field("config", &self.config)
            .field("inner", &*self.inner.lock())
            .finish_non_exhaustive()
    }
}

/// Admission granted by [`CircuitBreaker::admit`]
#[must_use = "a permit must be settled with success() or failure()"]
pub struct CircuitPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl CircuitPermit<'_> {
    /// Whether this permit is the half-open trial call
    #[must_use]
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    /// Settle the call as successful
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    /// Settle the call as failed
    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.release_trial();
        }
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    /// Current state
    pub state: CircuitState,
    /// Consecutive failures since the circuit last closed
    pub consecutive_failures: u32,
    /// Configured failure threshold
    pub failure_threshold: u32,
    /// Time since the last recorded failure
    #[serde(with = "humantime_serde")]
    pub since_last_failure: Option<Duration>,
    /// Transitions into the open state
    pub times_opened: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, recovery: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "localhost:8000",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                recovery_timeout: recovery,
            },
        )
    }

    #[test]
    fn test_circuit_breaker_initial_state() {
        let cb = CircuitBreaker::with_defaults("localhost:8000");
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.admit().unwrap().success();
        assert_eq!(cb.config().failure_threshold, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_opens_on_failures() {
        let cb = breaker(3, Duration::from_secs(60));

        cb.admit().unwrap().failure();
        cb.admit().unwrap().failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.admit().unwrap().failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.stats().times_opened, 1);

        for _ in 0..5 {
            let err = cb.admit().err().unwrap();
            assert!(matches!(err, VectorError::CircuitOpen { .. }));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_consecutive_count() {
        let cb = breaker(3, Duration::from_secs(60));

        cb.admit().unwrap().failure();
        cb.admit().unwrap().failure();
        cb.admit().unwrap().success();
        cb.admit().unwrap().failure();
        cb.admit().unwrap().failure();

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().consecutive_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_half_open_success() {
        let cb = breaker(2, Duration::from_secs(10));

        cb.admit().unwrap().failure();
        cb.admit().unwrap().failure();
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let trial = cb.admit().unwrap();
        assert!(trial.is_trial());
        // Only one trial is in flight at a time.
        assert!(cb.admit().is_err());

        trial.success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_half_open_failure() {
        let cb = breaker(2, Duration::from_secs(10));

        cb.admit().unwrap().failure();
        cb.admit().unwrap().failure();

        tokio::time::advance(Duration::from_secs(11)).await;
        cb.admit().unwrap().failure();
        assert_eq!(cb.state(), CircuitState::Open);

        // The open timer restarts from the trial failure.
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(cb.admit().is_err());
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cb.admit().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_releases_slot() {
        let cb = breaker(1, Duration::from_secs(1));
        cb.admit().unwrap().failure();
        tokio::time::advance(Duration::from_secs(2)).await;

        let trial = cb.admit().unwrap();
        drop(trial);

        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.admit().unwrap().success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_concurrent_failures_open_exactly_once() {
        const THREADS: usize = 8;
        const CALLS_PER_THREAD: usize = 4;

        let cb = breaker(5, Duration::from_secs(60));
        // Admit every call up front so all of them are in flight while closed.
        let mut permits: Vec<Vec<CircuitPermit<'_>>> = (0..THREADS)
            .map(|_| {
                (0..CALLS_PER_THREAD)
                    .map(|_| cb.admit().unwrap())
                    .collect()
            })
            .collect();
        let barrier = std::sync::Barrier::new(THREADS);

        std::thread::scope(|scope| {
            for batch in permits.drain(..) {
                let barrier = &barrier;
                scope.spawn(move || {
                    barrier.wait();
                    for permit in batch {
                        permit.failure();
                    }
                });
            }
        });

        let stats = cb.stats();
        assert_eq!(stats.state, CircuitState::Open);
        assert_eq!(stats.times_opened, 1);
        assert_eq!(stats.consecutive_failures, (THREADS * CALLS_PER_THREAD) as u32);
        assert!(cb.admit().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejections_are_counted() {
        let metrics = Arc::new(MetricsAggregator::default());
        let cb = breaker(1, Duration::from_secs(60)).with_metrics(Arc::clone(&metrics));

        cb.force_open();
        assert!(cb.admit().is_err());
        assert!(cb.admit().is_err());
        assert_eq!(metrics.snapshot().circuit_rejections, 2);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.admit().is_ok());
    }
}
