//! # Vector Client
//!
//! Resilient client for a remote vector-search service.
//!
//! Every call passes through the same pipeline:
//! - the response cache, for reads
//! - the circuit breaker, which fails fast while the service is unhealthy
//! - the connection pool, which bounds concurrent load
//! - bounded retries with exponential backoff
//!
//! Requests are issued over HTTP with either the non-blocking or the blocking
//! reqwest client, selected by [`TransportStrategy`](vector_config::TransportStrategy).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod transport;

pub use client::{
    BatchOperation, BatchOutput, ClientMetrics, HealthReport, HealthStatus, VectorClient,
};
pub use transport::{connector_for, BlockingHttpConnector, HttpConnector};
