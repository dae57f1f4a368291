//! # Vector Telemetry
//!
//! Observability for the resilient vector client.
//!
//! This crate provides:
//! - A metrics aggregator with rolling response-time statistics
//! - A pluggable export hook, with Prometheus and log exporters
//! - Structured logging initialisation

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod export;
pub mod logging;
pub mod metrics;

// Re-export main types
#[cfg(feature = "prometheus-export")]
pub use export::PrometheusExporter;
pub use export::{ExportError, LogExporter, MetricsExporter};
pub use logging::{init_logging, LogFormat, LoggingConfig, LoggingError};
pub use metrics::{MetricsAggregator, MetricsSnapshot, ResponseTimeWindow};
