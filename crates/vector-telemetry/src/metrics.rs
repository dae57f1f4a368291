//! Metrics aggregation.
//!
//! Counters are lock-free atomics. Latency samples and the last
//! success/failure timestamps share one mutex.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Bounded FIFO of recent response times.
#[derive(Debug, Clone)]
pub struct ResponseTimeWindow {
    samples: VecDeque<Duration>,
    capacity: usize,
}

impl ResponseTimeWindow {
    /// Default number of retained samples.
    pub const DEFAULT_CAPACITY: usize = 1000;

    /// Create a window keeping the most recent `capacity` samples.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Add a sample, evicting the oldest when full.
    pub fn push(&mut self, sample: Duration) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Number of retained samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if the window is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Maximum number of retained samples.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Mean of the retained samples, zero when empty.
    #[must_use]
    pub fn average(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.samples.iter().sum();
        total / self.samples.len() as u32
    }

    /// 95th percentile of the retained samples, zero when empty.
    ///
    /// Uses the exclusive method over 20 quantiles (the 19th cut point) with
    /// linear interpolation between neighbouring ranks.
    #[must_use]
    pub fn p95(&self) -> Duration {
        let mut sorted: Vec<f64> = self.samples.iter().map(Duration::as_secs_f64).collect();
        sorted.sort_by(f64::total_cmp);

        let n = sorted.len();
        match n {
            0 => Duration::ZERO,
            1 => Duration::from_secs_f64(sorted[0]),
            _ => {
                const QUANTILES: usize = 20;
                const CUT: usize = 19;
                let m = n + 1;
                let j = (CUT * m / QUANTILES).clamp(1, n - 1);
                let delta = (CUT * m) as f64 - (j * QUANTILES) as f64;
                let value = sorted[j - 1].mul_add(QUANTILES as f64 - delta, sorted[j] * delta)
                    / QUANTILES as f64;
                Duration::from_secs_f64(value.max(0.0))
            }
        }
    }

    /// Drop all samples.
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

impl Default for ResponseTimeWindow {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[derive(Debug, Default)]
struct Timeline {
    window: ResponseTimeWindow,
    last_success: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
}

/// Rolling counters and response-time statistics for one client.
#[derive(Debug)]
pub struct MetricsAggregator {
    requests_total: AtomicU64,
    requests_success: AtomicU64,
    requests_failed: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    retries: AtomicU64,
    pool_exhausted: AtomicU64,
    circuit_rejections: AtomicU64,
    timeline: Mutex<Timeline>,
}

impl MetricsAggregator {
    /// Create an aggregator keeping `window_size` latency samples.
    #[must_use]
    pub fn new(window_size: usize) -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            requests_success: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            pool_exhausted: AtomicU64::new(0),
            circuit_rejections: AtomicU64::new(0),
            timeline: Mutex::new(Timeline {
                window: ResponseTimeWindow::new(window_size),
                ..Timeline::default()
            }),
        }
    }

    /// Record a successful remote call and its latency.
    pub fn record_success(&self, latency: Duration) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.requests_success.fetch_add(1, Ordering::Relaxed);

        let mut timeline = self.timeline.lock();
        timeline.window.push(latency);
        timeline.last_success = Some(Utc::now());
    }

    /// Record a failed remote call.
    pub fn record_failure(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
        self.timeline.lock().last_failure = Some(Utc::now());
    }

    /// Record a cache hit.
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cache miss.
    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a retry after a failed attempt.
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed pool acquisition.
    pub fn record_pool_exhausted(&self) {
        self.pool_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a call rejected by the circuit breaker.
    pub fn record_circuit_rejection(&self) {
        self.circuit_rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a consistent-enough snapshot of all counters and gauges.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let requests_total = self.requests_total.load(Ordering::Relaxed);
        let requests_success = self.requests_success.load(Ordering::Relaxed);
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.cache_misses.load(Ordering::Relaxed);

        let timeline = self.timeline.lock();
        MetricsSnapshot {
            requests_total,
            requests_success,
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            cache_hits,
            cache_misses,
            retries: self.retries.load(Ordering::Relaxed),
            pool_exhausted: self.pool_exhausted.load(Ordering::Relaxed),
            circuit_rejections: self.circuit_rejections.load(Ordering::Relaxed),
            success_rate: ratio(requests_success, requests_total),
            cache_hit_rate: ratio(cache_hits, cache_hits + cache_misses),
            average_response_time_ms: timeline.window.average().as_secs_f64() * 1000.0,
            p95_response_time_ms: timeline.window.p95().as_secs_f64() * 1000.0,
            samples: timeline.window.len(),
            last_success: timeline.last_success,
            last_failure: timeline.last_failure,
        }
    }

    /// Reset all counters and samples.
    pub fn reset(&self) {
        for counter in [
            &self.requests_total,
            &self.requests_success,
            &self.requests_failed,
            &self.cache_hits,
            &self.cache_misses,
            &self.retries,
            &self.pool_exhausted,
            &self.circuit_rejections,
        ] {
            counter.store(0, Ordering::Relaxed);
        }

        let mut timeline = self.timeline.lock();
        timeline.window.clear();
        timeline.last_success = None;
        timeline.last_failure = None;
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new(ResponseTimeWindow::DEFAULT_CAPACITY)
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Point-in-time view of the client metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Remote calls issued (successful + failed attempts).
    pub requests_total: u64,
    /// Successful remote calls.
    pub requests_success: u64,
    /// Failed remote calls.
    pub requests_failed: u64,
    /// Cache hits.
    pub cache_hits: u64,
    /// Cache misses.
    pub cache_misses: u64,
    /// Retries performed after failed attempts.
    pub retries: u64,
    /// Attempts that found the pool exhausted.
    pub pool_exhausted: u64,
    /// Calls rejected by the circuit breaker.
    pub circuit_rejections: u64,
    /// `requests_success / requests_total`, 0 when idle.
    pub success_rate: f64,
    /// `cache_hits / (cache_hits + cache_misses)`, 0 when idle.
    pub cache_hit_rate: f64,
    /// Mean latency over the sample window, in milliseconds.
    pub average_response_time_ms: f64,
    /// 95th percentile latency over the sample window, in milliseconds.
    pub p95_response_time_ms: f64,
    /// Number of latency samples in the window.
    pub samples: usize,
    /// Time of the last successful call.
    pub last_success: Option<DateTime<Utc>>,
    /// Time of the last failed call.
    pub last_failure: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut window = ResponseTimeWindow::new(3);
        for value in [10, 20, 30, 40] {
            window.push(ms(value));
        }

        assert_eq!(window.len(), 3);
        assert_eq!(window.average(), ms(30));
    }

    #[test]
    fn test_p95_exclusive_method() {
        let mut window = ResponseTimeWindow::new(100);
        assert_eq!(window.p95(), Duration::ZERO);

        window.push(ms(50));
        assert_eq!(window.p95(), ms(50));

        for value in 1..=20 {
            window.push(ms(value * 10));
        }
        // 21 samples: 10..=200 plus 50. The 19th cut point of 20 sits at
        // rank 20.9 -> between 190ms and 200ms.
        let p95 = window.p95().as_secs_f64() * 1000.0;
        assert!((p95 - 199.0).abs() < 0.01, "p95 was {p95}");
    }

    #[test]
    fn test_snapshot_rates() {
        let metrics = MetricsAggregator::new(10);
        let empty = metrics.snapshot();
        assert!(empty.success_rate.abs() < f64::EPSILON);
        assert!(empty.last_success.is_none());

        metrics.record_success(ms(100));
        metrics.record_success(ms(300));
        metrics.record_failure();
        metrics.record_cache_hit();
        metrics.record_cache_miss();
        metrics.record_cache_miss();
        metrics.record_cache_miss();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_total, 3);
        assert_eq!(snapshot.requests_success, 2);
        assert_eq!(snapshot.requests_failed, 1);
        assert!((snapshot.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((snapshot.cache_hit_rate - 0.25).abs() < 1e-9);
        assert!((snapshot.average_response_time_ms - 200.0).abs() < 1e-6);
        assert!(snapshot.last_success.is_some());
        assert!(snapshot.last_failure.is_some());
    }

    #[test]
    fn test_reset() {
        let metrics = MetricsAggregator::default();
        metrics.record_success(ms(5));
        metrics.record_retry();
        metrics.record_pool_exhausted();
        metrics.record_circuit_rejection();
        metrics.reset();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_total, 0);
        assert_eq!(snapshot.retries, 0);
        assert_eq!(snapshot.samples, 0);
        assert!(snapshot.last_success.is_none());
    }
}
