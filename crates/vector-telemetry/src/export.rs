//! Metrics export hooks.
//!
//! An exporter receives a [`MetricsSnapshot`] and publishes it somewhere.
//! The client never depends on a concrete monitoring system.

use crate::metrics::MetricsSnapshot;
use thiserror::Error;
use tracing::info;

/// Error raised by an exporter.
#[derive(Debug, Error)]
pub enum ExportError {
    /// Metric registration failed.
    #[error("Failed to register metric: {0}")]
    Registration(String),
    /// Encoding the exposition format failed.
    #[error("Failed to encode metrics: {0}")]
    Encode(String),
}

/// Sink for metrics snapshots.
pub trait MetricsExporter: Send + Sync {
    /// Publish one snapshot.
    fn export(&self, snapshot: &MetricsSnapshot) -> Result<(), ExportError>;

    /// Publish one snapshot taken for `endpoint`.
    ///
    /// Exporters without per-endpoint dimensions publish it unlabelled.
    fn export_for(&self, endpoint: &str, snapshot: &MetricsSnapshot) -> Result<(), ExportError> {
        let _ = endpoint;
        self.export(snapshot)
    }

    /// Exporter name for logs.
    fn name(&self) -> &'static str;
}

/// Writes snapshots as structured log events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogExporter;

impl MetricsExporter for LogExporter {
    fn export(&self, snapshot: &MetricsSnapshot) -> Result<(), ExportError> {
        info!(
            requests_total = snapshot.requests_total,
            requests_failed = snapshot.requests_failed,
            success_rate = snapshot.success_rate,
            cache_hit_rate = snapshot.cache_hit_rate,
            avg_ms = snapshot.average_response_time_ms,
            p95_ms = snapshot.p95_response_time_ms,
            retries = snapshot.retries,
            circuit_rejections = snapshot.circuit_rejections,
            "Vector client metrics"
        );
        Ok(())
    }

    fn export_for(&self, endpoint: &str, snapshot: &MetricsSnapshot) -> Result<(), ExportError> {
        info!(
            endpoint,
            requests_total = snapshot.requests_total,
            requests_failed = snapshot.requests_failed,
            success_rate = snapshot.success_rate,
            cache_hit_rate = snapshot.cache_hit_rate,
            avg_ms = snapshot.average_response_time_ms,
            p95_ms = snapshot.p95_response_time_ms,
            retries = snapshot.retries,
            circuit_rejections = snapshot.circuit_rejections,
            "Vector client metrics"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

#[cfg(feature = "prometheus-export")]
pub use self::prometheus_export::PrometheusExporter;

#[cfg(feature = "prometheus-export")]
mod prometheus_export {
    use super::{ExportError, MetricsExporter};
    use crate::metrics::MetricsSnapshot;
    use parking_lot::Mutex;
    use prometheus::{Encoder, Gauge, IntCounter, Opts, Registry, TextEncoder};

    const COUNTERS: usize = 8;

    /// Publishes snapshots into a Prometheus registry.
    ///
    /// Counters advance by the delta since the previous export. After an
    /// aggregator reset the new totals are added as-is.
    pub struct PrometheusExporter {
        registry: Registry,
        counters: [IntCounter; COUNTERS],
        last_totals: Mutex<[u64; COUNTERS]>,
        success_rate: Gauge,
        cache_hit_rate: Gauge,
        average_ms: Gauge,
        p95_ms: Gauge,
    }

    impl PrometheusExporter {
        /// Create an exporter with its own registry.
        pub fn new(namespace: &str) -> Result<Self, ExportError> {
            Self::with_registry(namespace, Registry::new())
        }

        /// Create an exporter registering into `registry`.
        pub fn with_registry(namespace: &str, registry: Registry) -> Result<Self, ExportError> {
            let counter = |name: &str, help: &str| -> Result<IntCounter, ExportError> {
                let metric = IntCounter::with_opts(Opts::new(name, help).namespace(namespace))
                    .map_err(|e| ExportError::Registration(e.to_string()))?;
                registry
                    .register(Box::new(metric.clone()))
                    .map_err(|e| ExportError::Registration(e.to_string()))?;
                Ok(metric)
            };
            let counters = [
                counter("requests_total", "Remote calls issued")?,
                counter("requests_success_total", "Successful remote calls")?,
                counter("requests_failed_total", "Failed remote calls")?,
                counter("cache_hits_total", "Response cache hits")?,
                counter("cache_misses_total", "Response cache misses")?,
                counter("retries_total", "Retries after failed attempts")?,
                counter("pool_exhausted_total", "Attempts that found the pool exhausted")?,
                counter("circuit_rejections_total", "Calls rejected by the circuit breaker")?,
            ];

            let gauge = |name: &str, help: &str| -> Result<Gauge, ExportError> {
                let metric = Gauge::with_opts(Opts::new(name, help).namespace(namespace))
                    .map_err(|e| ExportError::Registration(e.to_string()))?;
                registry
                    .register(Box::new(metric.clone()))
                    .map_err(|e| ExportError::Registration(e.to_string()))?;
                Ok(metric)
            };
            let success_rate = gauge("success_rate", "Share of successful remote calls")?;
            let cache_hit_rate = gauge("cache_hit_rate", "Share of reads served from cache")?;
            let average_ms = gauge("response_time_avg_ms", "Mean response time")?;
            let p95_ms = gauge("response_time_p95_ms", "95th percentile response time")?;

            Ok(Self {
                registry,
                counters,
                last_totals: Mutex::new([0; COUNTERS]),
                success_rate,
                cache_hit_rate,
                average_ms,
                p95_ms,
            })
        }

        /// Registry holding the exported metrics.
        pub fn registry(&self) -> &Registry {
            &self.registry
        }

        /// Render the registry in the text exposition format.
        pub fn gather_text(&self) -> Result<String, ExportError> {
            let encoder = TextEncoder::new();
            let mut buffer = Vec::new();
            encoder
                .encode(&self.registry.gather(), &mut buffer)
                .map_err(|e| ExportError::Encode(e.to_string()))?;
            String::from_utf8(buffer).map_err(|e| ExportError::Encode(e.to_string()))
        }
    }

    impl MetricsExporter for PrometheusExporter {
        fn export(&self, snapshot: &MetricsSnapshot) -> Result<(), ExportError> {
            let totals = [
                snapshot.requests_total,
                snapshot.requests_success,
                snapshot.requests_failed,
                snapshot.cache_hits,
                snapshot.cache_misses,
                snapshot.retries,
                snapshot.pool_exhausted,
                snapshot.circuit_rejections,
            ];

            let mut last = self.last_totals.lock();
            for ((counter, total), previous) in self.counters.iter().zip(totals).zip(last.iter_mut()) {
                let delta = if total >= *previous { total - *previous } else { total };
                counter.inc_by(delta);
                *previous = total;
            }
            drop(last);

            self.success_rate.set(snapshot.success_rate);
            self.cache_hit_rate.set(snapshot.cache_hit_rate);
            self.average_ms.set(snapshot.average_response_time_ms);
            self.p95_ms.set(snapshot.p95_response_time_ms);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "prometheus"
        }
    }

    impl std::fmt::Debug for PrometheusExporter {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("PrometheusExporter").finish_non_exhaustive()
        }
    }
}
