//! Client configuration types.

use serde::Deserialize;
use std::time::Duration;
use validator::{Validate, ValidationError};
use vector_core::Endpoint;
use vector_resilience::{CacheConfig, CircuitBreakerConfig, PoolConfig, RetryConfig};
use vector_telemetry::LoggingConfig;

/// Default port of the remote service
pub const DEFAULT_PORT: u16 = 8000;

/// Default host of the remote service
pub const DEFAULT_HOST: &str = "localhost";

/// Default number of concurrent operations in a batch
pub const DEFAULT_BATCH_CONCURRENCY: usize = 16;

/// Complete client configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Validate)]
#[serde(default)]
pub struct ClientConfig {
    /// Remote endpoint
    #[validate(nested)]
    pub endpoint: EndpointConfig,

    /// Connection pool
    #[validate(custom(function = "validate_pool"))]
    pub pool: PoolConfig,

    /// HTTP transport
    #[validate(nested)]
    pub transport: TransportConfig,

    /// Retry policy
    #[validate(custom(function = "validate_retry"))]
    pub retry: RetryConfig,

    /// Circuit breaker
    #[validate(custom(function = "validate_circuit_breaker"))]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Response cache
    #[validate(custom(function = "validate_cache"))]
    pub cache: CacheConfig,

    /// Metrics aggregation
    #[validate(nested)]
    pub metrics: MetricsConfig,

    /// Logging
    pub logging: LoggingConfig,

    /// Return empty results instead of errors from failed reads
    pub degrade_reads: bool,

    /// Maximum operations of one batch in flight at once
    #[validate(range(min = 1))]
    pub batch_concurrency: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            pool: PoolConfig::default(),
            transport: TransportConfig::default(),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            cache: CacheConfig::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
            degrade_reads: false,
            batch_concurrency: DEFAULT_BATCH_CONCURRENCY,
        }
    }
}

impl ClientConfig {
    /// Configuration for `host:port` with every other value defaulted
    pub fn for_endpoint(host: impl Into<String>, port: u16) -> Self {
        Self {
            endpoint: EndpointConfig {
                host: host.into(),
                port,
                ..EndpointConfig::default()
            },
            ..Self::default()
        }
    }
}

/// Address of the remote service
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Validate)]
#[serde(default)]
pub struct EndpointConfig {
    /// URL scheme
    #[validate(custom(function = "validate_scheme"))]
    pub scheme: String,
    /// Host name or address
    #[validate(length(min = 1))]
    pub host: String,
    /// TCP port
    #[validate(range(min = 1))]
    pub port: u16,
    /// REST API path prefix
    pub base_path: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            scheme: "http".to_string(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            base_path: Endpoint::DEFAULT_BASE_PATH.to_string(),
        }
    }
}

impl EndpointConfig {
    /// Build the endpoint address
    #[must_use]
    pub fn to_endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
            .with_scheme(self.scheme.clone())
            .with_base_path(self.base_path.clone())
    }
}

/// How requests are issued
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportStrategy {
    /// Non-blocking client on the async runtime
    #[default]
    Async,
    /// Blocking client on the runtime's blocking thread pool
    Blocking,
}

/// HTTP transport settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Validate)]
#[serde(default)]
pub struct TransportConfig {
    /// Request strategy
    pub strategy: TransportStrategy,
    /// TCP connect timeout
    #[serde(with = "humantime_serde")]
    #[validate(custom(function = "validate_timeout"))]
    pub connection_timeout: Duration,
    /// Whole-request timeout
    #[serde(with = "humantime_serde")]
    #[validate(custom(function = "validate_timeout"))]
    pub read_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            strategy: TransportStrategy::default(),
            connection_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
        }
    }
}

/// Exporter fed a snapshot after every settled call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricsPush {
    /// Snapshots are exported only on request
    #[default]
    None,
    /// Structured log event per call, labelled with the endpoint
    Log,
}

/// Metrics aggregation settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Validate)]
#[serde(default)]
pub struct MetricsConfig {
    /// Number of response-time samples retained
    #[validate(range(min = 1))]
    pub window_size: usize,
    /// Push exporter
    pub push: MetricsPush,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            window_size: 1000,
            push: MetricsPush::None,
        }
    }
}

fn invalid(code: &'static str, message: &'static str) -> ValidationError {
    ValidationError::new(code).with_message(message.into())
}

fn validate_scheme(scheme: &str) -> Result<(), ValidationError> {
    match scheme {
        "http" | "https" => Ok(()),
        _ => Err(invalid("scheme", "scheme must be http or https")),
    }
}

fn validate_timeout(timeout: &Duration) -> Result<(), ValidationError> {
    if timeout.is_zero() {
        return Err(invalid("timeout", "timeout must be greater than zero"));
    }
    Ok(())
}

fn validate_pool(pool: &PoolConfig) -> Result<(), ValidationError> {
    if pool.max_connections == 0 {
        return Err(invalid("max_connections", "max_connections must be at least 1"));
    }
    if pool.health_check_interval.is_zero() {
        return Err(invalid(
            "health_check_interval",
            "health_check_interval must be greater than zero",
        ));
    }
    Ok(())
}

fn validate_retry(retry: &RetryConfig) -> Result<(), ValidationError> {
    if retry.retry_attempts == 0 {
        return Err(invalid("retry_attempts", "retry_attempts must be at least 1"));
    }
    if retry.backoff_factor.is_nan() || retry.backoff_factor < 1.0 {
        return Err(invalid("backoff_factor", "backoff_factor must be at least 1.0"));
    }
    if !(0.0..=1.0).contains(&retry.jitter) {
        return Err(invalid("jitter", "jitter must be between 0.0 and 1.0"));
    }
    Ok(())
}

fn validate_circuit_breaker(breaker: &CircuitBreakerConfig) -> Result<(), ValidationError> {
    if breaker.failure_threshold == 0 {
        return Err(invalid(
            "failure_threshold",
            "failure_threshold must be at least 1",
        ));
    }
    Ok(())
}

fn validate_cache(cache: &CacheConfig) -> Result<(), ValidationError> {
    if cache.enabled && cache.max_size == 0 {
        return Err(invalid("max_size", "cache max_size must be at least 1"));
    }
    Ok(())
}
