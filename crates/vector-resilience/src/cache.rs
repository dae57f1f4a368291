//! Response caching with pluggable backends.
//!
//! Provides a cache backend abstraction that supports:
//! - In-memory caching (default, single-instance)
//! - Redis caching (feature `redis`, shared between client instances)
//!
//! The cache is an optimization only. Backend failures are logged, counted,
//! and reported to callers as misses.

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vector_telemetry::MetricsAggregator;

/// Error types for cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    /// Backend not reachable
    #[error("Cache backend not available: {0}")]
    Unavailable(String),

    /// Value could not be encoded or decoded
    #[error("Cache serialization error: {0}")]
    Serialization(String),

    /// Backend rejected the operation
    #[error("Cache backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache backend trait for polymorphic cache implementations
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get a value from the cache
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Set a value in the cache with TTL
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()>;

    /// Delete a key from the cache
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Delete all keys matching a glob pattern (`*` and `?` wildcards)
    async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64>;

    /// Check if the backend is healthy
    async fn health_check(&self) -> CacheResult<()>;

    /// Get backend name for metrics
    fn name(&self) -> &'static str;

    /// Check if backend is shared between client instances
    fn is_distributed(&self) -> bool;
}

/// Configuration for the response cache
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether caching is enabled
    pub enabled: bool,
    /// Time-to-live of cached responses
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// Maximum entries held by the in-memory backend
    pub max_size: usize,
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub redis_url: Option<String>,
    /// Key prefix for Redis keys (namespace isolation)
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(120),
            max_size: 10_000,
            redis_url: None,
            key_prefix: "vector-client".to_string(),
        }
    }
}

#[derive(Debug)]
struct MemoryEntry {
    data: Vec<u8>,
    inserted_at: Instant,
    ttl: Duration,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) > self.ttl
    }
}

/// In-memory cache backend
#[derive(Debug)]
pub struct MemoryCacheBackend {
    entries: Mutex<HashMap<String, MemoryEntry>>,
    max_entries: usize,
}

impl MemoryCacheBackend {
    /// Create a new memory cache backend
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    /// Number of stored entries, expired ones included
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if the backend holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Make room for one insertion: drop expired entries, then the oldest.
    fn evict_if_needed(&self, entries: &mut HashMap<String, MemoryEntry>, now: Instant) {
        if entries.len() < self.max_entries {
            return;
        }

        entries.retain(|_, entry| !entry.is_expired(now));

        if entries.len() >= self.max_entries {
            let to_remove = entries.len() - self.max_entries + 1;
            let mut by_age: Vec<(String, Instant)> = entries
                .iter()
                .map(|(k, v)| (k.clone(), v.inserted_at))
                .collect();
            by_age.sort_by_key(|(_, inserted_at)| *inserted_at);

            for (key, _) in by_age.into_iter().take(to_remove) {
                entries.remove(&key);
            }
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get(key) {
            if entry.is_expired(Instant::now()) {
                entries.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.data.clone()));
        }

        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if !entries.contains_key(key) {
            self.evict_if_needed(&mut entries, now);
        }
        entries.insert(
            key.to_string(),
            MemoryEntry {
                data: value,
                inserted_at: now,
                ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64> {
        let matcher = glob_to_regex(pattern)?;
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|key, _| !matcher.is_match(key));
        Ok((before - entries.len()) as u64)
    }

    async fn health_check(&self) -> CacheResult<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }

    fn is_distributed(&self) -> bool {
        false
    }
}

/// Compile a Redis-style glob (`*`, `?`) into an anchored regex.
fn glob_to_regex(pattern: &str) -> CacheResult<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    expr.push('$');
    Regex::new(&expr).map_err(|e| CacheError::Backend(format!("invalid pattern '{pattern}': {e}")))
}

#[cfg(feature = "redis")]
pub use self::redis_backend::RedisCacheBackend;

#[cfg(feature = "redis")]
mod redis_backend {
    use super::{CacheBackend, CacheError, CacheResult};
    use async_trait::async_trait;
    use redis::aio::ConnectionManager;
    use std::time::Duration;
    use tracing::{debug, info};

    /// Redis cache backend
    pub struct RedisCacheBackend {
        manager: ConnectionManager,
        key_prefix: String,
    }

    impl RedisCacheBackend {
        /// Connect to Redis
        ///
        /// # Errors
        /// Returns error if the URL is invalid or the server is unreachable
        pub async fn connect(url: &str, key_prefix: impl Into<String>) -> CacheResult<Self> {
            let client =
                redis::Client::open(url).map_err(|e| CacheError::Unavailable(e.to_string()))?;
            let manager = ConnectionManager::new(client)
                .await
                .map_err(|e| CacheError::Unavailable(e.to_string()))?;
            let key_prefix = key_prefix.into();

            info!(prefix = %key_prefix, "Redis cache backend connected");
            Ok(Self {
                manager,
                key_prefix,
            })
        }

        fn prefixed_key(&self, key: &str) -> String {
            format!("{}:{}", self.key_prefix, key)
        }

        /// The prefix is literal; only `pattern` carries glob syntax.
        fn prefixed_pattern(&self, pattern: &str) -> String {
            format!("{}:{}", escape_glob(&self.key_prefix), pattern)
        }
    }

    /// Escape Redis glob metacharacters so `text` matches only itself.
    pub(super) fn escape_glob(text: &str) -> String {
        let mut escaped = String::with_capacity(text.len());
        for c in text.chars() {
            if matches!(c, '*' | '?' | '[' | ']' | '\\') {
                escaped.push('\\');
            }
            escaped.push(c);
        }
        escaped
    }

    /// Millisecond expiry for `PX`; Redis rejects zero.
    pub(super) fn ttl_millis(ttl: Duration) -> u64 {
        u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
    }

    fn backend_error(error: redis::RedisError) -> CacheError {
        if error.is_io_error() || error.is_connection_dropped() || error.is_timeout() {
            CacheError::Unavailable(error.to_string())
        } else {
            CacheError::Backend(error.to_string())
        }
    }

    #[async_trait]
    impl CacheBackend for RedisCacheBackend {
        async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
            let mut conn = self.manager.clone();
            redis::cmd("GET")
                .arg(self.prefixed_key(key))
                .query_async::<Option<Vec<u8>>>(&mut conn)
                .await
                .map_err(backend_error)
        }

        async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
            let mut conn = self.manager.clone();
            redis::cmd("SET")
                .arg(self.prefixed_key(key))
                .arg(value)
                .arg("PX")
                .arg(ttl_millis(ttl))
                .query_async::<()>(&mut conn)
                .await
                .map_err(backend_error)
        }

        async fn delete(&self, key: &str) -> CacheResult<()> {
            let mut conn = self.manager.clone();
            redis::cmd("DEL")
                .arg(self.prefixed_key(key))
                .query_async::<()>(&mut conn)
                .await
                .map_err(backend_error)
        }

        async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64> {
            let mut conn = self.manager.clone();
            let keys: Vec<String> = redis::cmd("KEYS")
                .arg(self.prefixed_pattern(pattern))
                .query_async(&mut conn)
                .await
                .map_err(backend_error)?;
            if keys.is_empty() {
                return Ok(0);
            }

            let removed: u64 = redis::cmd("DEL")
                .arg(&keys)
                .query_async(&mut conn)
                .await
                .map_err(backend_error)?;
            debug!(pattern = %pattern, removed, "Redis pattern delete");
            Ok(removed)
        }

        async fn health_check(&self) -> CacheResult<()> {
            let mut conn = self.manager.clone();
            redis::cmd("PING")
                .query_async::<String>(&mut conn)
                .await
                .map(|_| ())
                .map_err(backend_error)
        }

        fn name(&self) -> &'static str {
            "redis"
        }

        fn is_distributed(&self) -> bool {
            true
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Backend name
    pub backend: &'static str,
    /// Lookups answered from cache
    pub hits: u64,
    /// Lookups that missed
    pub misses: u64,
    /// Backend failures degraded to misses or skipped writes
    pub backend_errors: u64,
    /// Entries removed by invalidation
    pub invalidated: u64,
}

/// Response cache keyed by a canonical hash of the request
pub struct ResponseCache {
    config: CacheConfig,
    backend: Arc<dyn CacheBackend>,
    metrics: Option<Arc<MetricsAggregator>>,
    hits: AtomicU64,
    misses: AtomicU64,
    backend_errors: AtomicU64,
    invalidated: AtomicU64,
}

impl ResponseCache {
    /// Create a cache over an explicit backend
    pub fn new(config: CacheConfig, backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            config,
            backend,
            metrics: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            backend_errors: AtomicU64::new(0),
            invalidated: AtomicU64::new(0),
        }
    }

    /// Create an in-memory cache
    #[must_use]
    pub fn in_memory(config: CacheConfig) -> Self {
        let backend = Arc::new(MemoryCacheBackend::new(config.max_size));
        Self::new(config, backend)
    }

    /// Create a cache for `config`, using Redis when a URL is configured
    ///
    /// An unreachable Redis falls back to the in-memory backend.
    pub async fn from_config(config: CacheConfig) -> Self {
        #[cfg(feature = "redis")]
        if let Some(url) = config.redis_url.clone() {
            match RedisCacheBackend::connect(&url, config.key_prefix.clone()).await {
                Ok(backend) => return Self::new(config, Arc::new(backend)),
                Err(error) => {
                    warn!(error = %error, "Redis unavailable, using in-memory cache");
                }
            }
        }

        #[cfg(not(feature = "redis"))]
        if config.redis_url.is_some() {
            warn!("Redis URL configured but the redis feature is disabled, using in-memory cache");
        }

        Self::in_memory(config)
    }

    /// Record hits and misses in `metrics`
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MetricsAggregator>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Whether lookups and writes reach the backend
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Look up the cached response for `request` under `prefix`
    pub async fn get<R, T>(&self, prefix: &str, request: &R) -> Option<T>
    where
        R: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        if !self.config.enabled {
            return None;
        }

        let found = match cache_key(prefix, request) {
            Ok(key) => match self.backend.get(&key).await {
                Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                    Ok(value) => Some(value),
                    Err(error) => {
                        warn!(key = %key, error = %error, "Discarding undecodable cache entry");
                        None
                    }
                },
                Ok(None) => None,
                Err(error) => {
                    self.backend_failed("get", &error);
                    None
                }
            },
            Err(error) => {
                self.backend_failed("key", &error);
                None
            }
        };

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            if let Some(metrics) = &self.metrics {
                metrics.record_cache_hit();
            }
            debug!(prefix = %prefix, "Cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            if let Some(metrics) = &self.metrics {
                metrics.record_cache_miss();
            }
        }
        found
    }

    /// Store `value` as the response to `request` under `prefix`
    pub async fn set<R, T>(&self, prefix: &str, request: &R, value: &T)
    where
        R: Serialize + ?Sized,
        T: Serialize + ?Sized,
    {
        if !self.config.enabled {
            return;
        }

        let encoded = cache_key(prefix, request)
            .and_then(|key| Ok((key, serde_json::to_vec(value)?)));
        let result = match encoded {
            Ok((key, bytes)) => self.backend.set(&key, bytes, self.config.ttl).await,
            Err(error) => Err(error),
        };
        if let Err(error) = result {
            self.backend_failed("set", &error);
        }
    }

    /// Remove every entry whose key matches `pattern`
    ///
    /// Returns the number of removed entries; backend failures count as zero.
    pub async fn invalidate(&self, pattern: &str) -> u64 {
        if !self.config.enabled {
            return 0;
        }

        match self.backend.delete_pattern(pattern).await {
            Ok(removed) => {
                self.invalidated.fetch_add(removed, Ordering::Relaxed);
                debug!(pattern = %pattern, removed, "Cache invalidated");
                removed
            }
            Err(error) => {
                self.backend_failed("invalidate", &error);
                0
            }
        }
    }

    /// Remove every entry
    pub async fn clear(&self) -> u64 {
        let removed = self.invalidate("*").await;
        info!(removed, "Cache cleared");
        removed
    }

    /// Check backend reachability
    pub async fn health_check(&self) -> CacheResult<()> {
        self.backend.health_check().await
    }

    /// Current statistics
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            backend: self.backend.name(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            backend_errors: self.backend_errors.load(Ordering::Relaxed),
            invalidated: self.invalidated.load(Ordering::Relaxed),
        }
    }

    fn backend_failed(&self, operation: &str, error: &CacheError) {
        self.backend_errors.fetch_add(1, Ordering::Relaxed);
        warn!(
            backend = self.backend.name(),
            operation,
            error = %error,
            "Cache degraded"
        );
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Compute the cache key for `request` under `prefix`.
///
/// The request is serialized with object keys sorted recursively, so field
/// order never affects the key.
pub fn cache_key<R: Serialize + ?Sized>(prefix: &str, request: &R) -> CacheResult<String> {
    let canonical = canonicalize(serde_json::to_value(request)?);
    let bytes = serde_json::to_vec(&canonical)?;
    let digest = Sha256::digest(&bytes);
    Ok(format!("{prefix}:{}", hex::encode(digest)))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect::<Map<String, Value>>(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
