//! Error types shared by every layer of the client.
//!
//! The taxonomy separates conditions the resilient executor may retry
//! (`Transport`, `PoolExhausted`, `Timeout`) from conditions that are terminal
//! for a call (`CircuitOpen`, `InvalidRequest`, ...).

use std::time::Duration;
use thiserror::Error;

/// Result type for client operations.
pub type VectorResult<T> = Result<T, VectorError>;

/// Errors surfaced by the vector client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VectorError {
    /// No free pooled connection and no capacity to create one.
    #[error("Connection pool exhausted for {endpoint} ({max_connections} connections in use)")]
    PoolExhausted {
        /// Endpoint the connection was requested for.
        endpoint: String,
        /// Configured pool capacity.
        max_connections: usize,
    },

    /// The circuit breaker rejected the call.
    #[error("Circuit breaker open for {endpoint}")]
    CircuitOpen {
        /// Endpoint guarded by the breaker.
        endpoint: String,
    },

    /// Network failure, read timeout, or non-2xx response from the remote service.
    #[error("Transport error for {endpoint}: {message}")]
    Transport {
        /// Endpoint the request was sent to.
        endpoint: String,
        /// Failure description.
        message: String,
        /// HTTP status code, when a response was received.
        status_code: Option<u16>,
        /// Whether another attempt could succeed.
        retryable: bool,
    },

    /// The operation did not complete in time.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// Operation that timed out.
        operation: String,
        /// Elapsed budget.
        duration: Duration,
    },

    /// A request or response body could not be (de)serialized.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Failure description.
        message: String,
    },

    /// The caller supplied invalid parameters.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Failure description.
        message: String,
    },

    /// The client was configured incorrectly.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Failure description.
        message: String,
    },

    /// Unexpected internal failure.
    #[error("Internal error: {message}")]
    Internal {
        /// Failure description.
        message: String,
    },
}

impl VectorError {
    /// Create a pool exhausted error.
    pub fn pool_exhausted(endpoint: impl Into<String>, max_connections: usize) -> Self {
        Self::PoolExhausted {
            endpoint: endpoint.into(),
            max_connections,
        }
    }

    /// Create a circuit open error.
    pub fn circuit_open(endpoint: impl Into<String>) -> Self {
        Self::CircuitOpen {
            endpoint: endpoint.into(),
        }
    }

    /// Create a transport error.
    ///
    /// Failures without a status code (connect, reset, read timeout) are
    /// retryable, as are 408, 429 and 5xx responses. Other client errors are
    /// not: repeating the same request cannot change the answer.
    pub fn transport(
        endpoint: impl Into<String>,
        message: impl Into<String>,
        status_code: Option<u16>,
    ) -> Self {
        let retryable = status_code.map_or(true, is_retryable_status);
        Self::Transport {
            endpoint: endpoint.into(),
            message: message.into(),
            status_code,
            retryable,
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if the error is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { retryable, .. } => *retryable,
            Self::PoolExhausted { .. } | Self::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Check if the failure should count against the remote endpoint's health.
    ///
    /// Only conditions observed on the wire qualify; local conditions such as
    /// pool exhaustion or bad input say nothing about the remote service.
    #[must_use]
    pub fn is_remote_failure(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Timeout { .. })
    }

    /// Get the HTTP status code if available.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Transport { status_code, .. } => *status_code,
            _ => None,
        }
    }

    /// Short machine-readable name of the error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PoolExhausted { .. } => "pool_exhausted",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Transport { .. } => "transport",
            Self::Timeout { .. } => "timeout",
            Self::Serialization { .. } => "serialization",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::Configuration { .. } => "configuration",
            Self::Internal { .. } => "internal",
        }
    }
}

impl From<serde_json::Error> for VectorError {
    fn from(error: serde_json::Error) -> Self {
        Self::serialization(error.to_string())
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429) || (500..=599).contains(&status)
}
