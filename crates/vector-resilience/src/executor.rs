//! Resilient execution of request descriptors.
//!
//! Each attempt passes the circuit breaker, borrows a pooled connection,
//! issues the call and settles the outcome before the connection returns to
//! the pool. Attempts are driven by the retry policy. An optional push
//! exporter receives a snapshot after every settled attempt.

use crate::circuit_breaker::CircuitBreaker;
use crate::connection_pool::ConnectionPool;
use crate::retry::RetryPolicy;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};
use vector_core::{Endpoint, RequestDescriptor, VectorError, VectorResult};
use vector_telemetry::{MetricsAggregator, MetricsExporter};

/// Runs descriptors against one endpoint with breaker, pool and retry.
pub struct ResilientExecutor {
    endpoint: Endpoint,
    endpoint_label: String,
    pool: Arc<ConnectionPool>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    metrics: Arc<MetricsAggregator>,
    exporter: Option<Arc<dyn MetricsExporter>>,
}

impl ResilientExecutor {
    /// Compose an executor from its parts
    pub fn new(
        endpoint: Endpoint,
        pool: Arc<ConnectionPool>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
        metrics: Arc<MetricsAggregator>,
    ) -> Self {
        Self {
            endpoint_label: endpoint.to_string(),
            endpoint,
            pool,
            breaker,
            retry,
            metrics,
            exporter: None,
        }
    }

    /// Push a snapshot to `exporter` after every settled attempt
    #[must_use]
    pub fn with_exporter(mut self, exporter: Arc<dyn MetricsExporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Execute `request`, retrying retryable failures.
    ///
    /// # Errors
    /// Returns `CircuitOpen` without retrying when the breaker rejects an
    /// attempt; otherwise the last attempt's error, unchanged
    pub async fn execute(&self, request: &RequestDescriptor) -> VectorResult<Value> {
        self.retry.execute(|| self.attempt(request)).await
    }

    async fn attempt(&self, request: &RequestDescriptor) -> VectorResult<Value> {
        let permit = self.breaker.admit()?;

        let connection = match self.pool.acquire(&self.endpoint) {
            Ok(connection) => connection,
            Err(error) => {
                if matches!(error, VectorError::PoolExhausted { .. }) {
                    self.metrics.record_pool_exhausted();
                }
                return Err(error);
            }
        };

        let started = Instant::now();
        let result = connection.send(request).await;
        let elapsed = started.elapsed();
        drop(connection);

        match &result {
            Ok(_) => {
                permit.success();
                self.metrics.record_success(elapsed);
                debug!(
                    operation = %request.kind(),
                    endpoint = %self.endpoint,
                    latency_ms = elapsed.as_millis() as u64,
                    "Request succeeded"
                );
            }
            Err(error) => {
                if error.is_remote_failure() {
                    permit.failure();
                } else {
                    drop(permit);
                }
                self.metrics.record_failure();
                warn!(
                    operation = %request.kind(),
                    endpoint = %self.endpoint,
                    error = %error,
                    "Request failed"
                );
            }
        }
        self.push_metrics();
        result
    }

    fn push_metrics(&self) {
        let Some(exporter) = &self.exporter else {
            return;
        };
        if let Err(error) = exporter.export_for(&self.endpoint_label, &self.metrics.snapshot()) {
            warn!(exporter = exporter.name(), error = %error, "Metrics push failed");
        }
    }

    /// Endpoint the executor targets
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The connection pool
    #[must_use]
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// The circuit breaker
    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// The metrics aggregator
    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        &self.metrics
    }
}

impl fmt::Debug for ResilientExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientExecutor")
            .field("endpoint", &self.endpoint)
            .field("pool", &self.pool)
            .field("breaker", &self.breaker)
            .field("retry", &self.retry)
            .field("exporter", &self.exporter.as_ref().map(|e| e.name()))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    use crate::connection_pool::PoolConfig;
    use crate::retry::RetryPolicyBuilder;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use vector_core::{Connection, Connector};
    use vector_telemetry::{ExportError, MetricsSnapshot};

    /// Replies from a script; repeats the last reply once the script runs out.
    struct ScriptedConnector {
        script: Mutex<VecDeque<VectorResult<Value>>>,
        sends: AtomicUsize,
    }

    impl ScriptedConnector {
        fn new(script: Vec<VectorResult<Value>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                sends: AtomicUsize::new(0),
            })
        }

        fn next(&self) -> VectorResult<Value> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock();
            if script.len() > 1 {
                script.pop_front().unwrap_or(Ok(Value::Null))
            } else {
                script.front().cloned().unwrap_or(Ok(Value::Null))
            }
        }
    }

    struct ScriptedConnection(Arc<ScriptedConnector>);

    #[async_trait]
    impl Connection for ScriptedConnection {
        async fn send(&self, _request: &RequestDescriptor) -> VectorResult<Value> {
            self.0.next()
        }

        async fn heartbeat(&self) -> VectorResult<()> {
            Ok(())
        }
    }

    struct Shared(Arc<ScriptedConnector>);

    impl Connector for Shared {
        fn connect(&self, _endpoint: &Endpoint) -> VectorResult<Arc<dyn Connection>> {
            Ok(Arc::new(ScriptedConnection(Arc::clone(&self.0))))
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    fn unavailable(n: u32) -> VectorError {
        VectorError::transport("localhost:8000", format!("HTTP 503 #{n}"), Some(503))
    }

    /// Every send hangs until the caller gives up.
    struct Stalled;

    #[async_trait]
    impl Connection for Stalled {
        async fn send(&self, _request: &RequestDescriptor) -> VectorResult<Value> {
            std::future::pending().await
        }

        async fn heartbeat(&self) -> VectorResult<()> {
            Ok(())
        }
    }

    impl Connector for Stalled {
        fn connect(&self, _endpoint: &Endpoint) -> VectorResult<Arc<dyn Connection>> {
            Ok(Arc::new(Self))
        }

        fn name(&self) -> &'static str {
            "stalled"
        }
    }

    fn executor(script: &Arc<ScriptedConnector>, threshold: u32) -> ResilientExecutor {
        executor_with(Arc::new(Shared(Arc::clone(script))), threshold)
    }

    fn executor_with(connector: Arc<dyn Connector>, threshold: u32) -> ResilientExecutor {
        let metrics = Arc::new(MetricsAggregator::default());
        let pool = Arc::new(ConnectionPool::new(
            connector,
            PoolConfig {
                max_connections: 2,
                ..PoolConfig::default()
            },
        ));
        let breaker = Arc::new(
            CircuitBreaker::new(
                "localhost:8000",
                CircuitBreakerConfig {
                    failure_threshold: threshold,
                    recovery_timeout: Duration::from_secs(60),
                },
            )
            .with_metrics(Arc::clone(&metrics)),
        );
        let retry = RetryPolicyBuilder::new()
            .retry_attempts(3)
            .retry_delay(Duration::from_secs(1))
            .backoff_factor(2.0)
            .build()
            .with_metrics(Arc::clone(&metrics));

        ResilientExecutor::new(
            Endpoint::new("localhost", 8000),
            pool,
            breaker,
            retry,
            metrics,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds() {
        let script = ScriptedConnector::new(vec![Err(unavailable(1)), Ok(json!({"ok": true}))]);
        let executor = executor(&script, 5);

        let value = executor
            .execute(&RequestDescriptor::list_collections())
            .await
            .unwrap();

        assert_eq!(value, json!({"ok": true}));
        let snapshot = executor.metrics().snapshot();
        assert_eq!(snapshot.requests_total, 2);
        assert_eq!(snapshot.requests_failed, 1);
        assert_eq!(snapshot.retries, 1);
        assert_eq!(executor.pool().stats().in_use, 0);
        assert_eq!(executor.breaker().stats().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_surfaces_last_error() {
        let script = ScriptedConnector::new(vec![
            Err(unavailable(1)),
            Err(unavailable(2)),
            Err(unavailable(3)),
        ]);
        let executor = executor(&script, 5);
        let started = Instant::now();

        let err = executor
            .execute(&RequestDescriptor::list_collections())
            .await
            .unwrap_err();

        assert_eq!(err, unavailable(3));
        assert_eq!(started.elapsed(), Duration::from_secs(3));
        assert_eq!(script.sends.load(Ordering::SeqCst), 3);
        assert_eq!(executor.pool().stats().in_use, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_short_circuits_transport() {
        let script = ScriptedConnector::new(vec![Err(unavailable(0))]);
        let executor = executor(&script, 3);

        let err = executor
            .execute(&RequestDescriptor::list_collections())
            .await
            .unwrap_err();
        assert!(matches!(err, VectorError::Transport { .. }));
        assert_eq!(executor.breaker().state(), CircuitState::Open);
        assert_eq!(script.sends.load(Ordering::SeqCst), 3);

        let started = Instant::now();
        for _ in 0..4 {
            let err = executor
                .execute(&RequestDescriptor::list_collections())
                .await
                .unwrap_err();
            assert!(matches!(err, VectorError::CircuitOpen { .. }));
        }
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(script.sends.load(Ordering::SeqCst), 3);
        assert_eq!(executor.metrics().snapshot().circuit_rejections, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_trial_closes_circuit() {
        let script = ScriptedConnector::new(vec![
            Err(unavailable(1)),
            Ok(json!([])),
        ]);
        let executor = executor(&script, 1);

        let err = executor
            .execute(&RequestDescriptor::list_collections())
            .await
            .unwrap_err();
        assert!(matches!(err, VectorError::CircuitOpen { .. }));
        assert_eq!(script.sends.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        let value = executor
            .execute(&RequestDescriptor::list_collections())
            .await
            .unwrap();
        assert_eq!(value, json!([]));
        assert_eq!(executor.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_attempt_releases_connection_and_trial() {
        let executor = executor_with(Arc::new(Stalled), 1);
        executor.breaker().force_open();
        tokio::time::advance(Duration::from_secs(61)).await;

        let result = tokio::time::timeout(
            Duration::from_millis(50),
            executor.execute(&RequestDescriptor::list_collections()),
        )
        .await;
        assert!(result.is_err());

        assert_eq!(executor.pool().stats().in_use, 0);
        assert_eq!(executor.breaker().state(), CircuitState::HalfOpen);
        let trial = executor.breaker().admit().unwrap();
        assert!(trial.is_trial());
        trial.success();
        assert_eq!(executor.breaker().state(), CircuitState::Closed);

        let snapshot = executor.metrics().snapshot();
        assert_eq!(snapshot.requests_failed, 0);
        assert_eq!(snapshot.requests_success, 0);
    }

    /// Remembers every pushed snapshot with its endpoint.
    #[derive(Default)]
    struct RecordingExporter {
        pushed: Mutex<Vec<(String, u64, u64)>>,
    }

    impl MetricsExporter for RecordingExporter {
        fn export(&self, snapshot: &MetricsSnapshot) -> Result<(), ExportError> {
            self.export_for("", snapshot)
        }

        fn export_for(&self, endpoint: &str, snapshot: &MetricsSnapshot) -> Result<(), ExportError> {
            self.pushed.lock().push((
                endpoint.to_string(),
                snapshot.requests_total,
                snapshot.requests_failed,
            ));
            Ok(())
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pushes_metrics_after_each_attempt() {
        let script = ScriptedConnector::new(vec![Err(unavailable(1)), Ok(json!([]))]);
        let exporter = Arc::new(RecordingExporter::default());
        let executor = executor(&script, 5).with_exporter(exporter.clone());

        executor
            .execute(&RequestDescriptor::list_collections())
            .await
            .unwrap();

        let pushed = exporter.pushed.lock().clone();
        assert_eq!(
            pushed,
            vec![
                ("localhost:8000".to_string(), 1, 1),
                ("localhost:8000".to_string(), 2, 1),
            ]
        );

        // Rejected calls never reach the transport and push nothing.
        executor.breaker().force_open();
        assert!(executor
            .execute(&RequestDescriptor::list_collections())
            .await
            .is_err());
        assert_eq!(exporter.pushed.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_does_not_retry() {
        let script = ScriptedConnector::new(vec![Err(VectorError::transport(
            "localhost:8000",
            "HTTP 404",
            Some(404),
        ))]);
        let executor = executor(&script, 5);

        let err = executor
            .execute(&RequestDescriptor::get_collection("missing").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(404));
        assert_eq!(script.sends.load(Ordering::SeqCst), 1);
    }
}
