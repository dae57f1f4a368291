//! # Vector Resilience
//!
//! Resilience patterns for the vector client:
//! - Connection pool with background health eviction
//! - Circuit breaker for preventing cascading failures
//! - Retry policy with exponential backoff
//! - Response cache with pattern invalidation
//! - Resilient executor composing the above

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod circuit_breaker;
pub mod connection_pool;
pub mod executor;
pub mod retry;

// Re-export main types
#[cfg(feature = "redis")]
pub use cache::RedisCacheBackend;
pub use cache::{
    cache_key, CacheBackend, CacheConfig, CacheError, CacheResult, CacheStats,
    MemoryCacheBackend, ResponseCache,
};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitPermit, CircuitState,
};
pub use connection_pool::{ConnectionPool, PoolConfig, PoolStats, PooledConnection};
pub use executor::ResilientExecutor;
pub use retry::{RetryConfig, RetryPolicy, RetryPolicyBuilder};
