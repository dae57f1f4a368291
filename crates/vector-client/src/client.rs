//! Service client facade.

use crate::transport::connector_for;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use validator::Validate;
use vector_config::{ClientConfig, MetricsPush};
use vector_core::{
    AddDocuments, AddDocumentsResult, Collection, Connector, Endpoint, Metadata, QueryRequest,
    QueryResponse, RequestDescriptor, SearchFilters, VectorError, VectorResult,
};
use vector_resilience::{
    CacheStats, CircuitBreaker, CircuitBreakerStats, CircuitState, ConnectionPool, PoolStats,
    ResilientExecutor, ResponseCache, RetryPolicy,
};
use vector_telemetry::{
    ExportError, LogExporter, MetricsAggregator, MetricsExporter, MetricsSnapshot,
};

/// Client for a remote vector-search service.
///
/// Reads consult the response cache before the resilient executor; writes
/// invalidate the affected cache namespaces after they succeed.
///
/// # Example
///
/// ```rust,no_run
/// use vector_client::VectorClient;
/// use vector_config::ClientConfig;
/// use vector_core::SearchFilters;
///
/// # async fn example() -> Result<(), vector_core::VectorError> {
/// let client = VectorClient::new(ClientConfig::for_endpoint("localhost", 8000)).await?;
///
/// client.create_collection("docs", None).await?;
/// client
///     .add_documents("docs", vec!["Rust is fast".into()], None, None)
///     .await?;
///
/// let results = client
///     .similarity_search("docs", vec!["speed".into()], 5, SearchFilters::none())
///     .await?;
/// println!("{} hits", results.total_hits());
/// # Ok(())
/// # }
/// ```
pub struct VectorClient {
    config: ClientConfig,
    executor: ResilientExecutor,
    cache: ResponseCache,
    metrics: Arc<MetricsAggregator>,
}

impl VectorClient {
    /// Create a client using the configured HTTP transport strategy.
    ///
    /// Starts the pool health checker on the current runtime.
    pub async fn new(config: ClientConfig) -> VectorResult<Self> {
        let connector = connector_for(&config.transport)?;
        Self::with_connector(config, connector).await
    }

    /// Create a client over an explicit connector
    pub async fn with_connector(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
    ) -> VectorResult<Self> {
        config
            .validate()
            .map_err(|e| VectorError::configuration(e.to_string()))?;

        let endpoint = config.endpoint.to_endpoint();
        let metrics = Arc::new(MetricsAggregator::new(config.metrics.window_size));

        let strategy = connector.name();
        let pool = Arc::new(ConnectionPool::new(connector, config.pool.clone()));
        pool.start_health_checker();

        let breaker = Arc::new(
            CircuitBreaker::new(endpoint.to_string(), config.circuit_breaker.clone())
                .with_metrics(Arc::clone(&metrics)),
        );
        let retry = RetryPolicy::new(config.retry.clone()).with_metrics(Arc::clone(&metrics));
        let cache = ResponseCache::from_config(config.cache.clone())
            .await
            .with_metrics(Arc::clone(&metrics));

        info!(
            endpoint = %endpoint,
            transport = strategy,
            cache = cache.stats().backend,
            cache_enabled = cache.is_enabled(),
            "Vector client initialised"
        );

        let executor = ResilientExecutor::new(
            endpoint,
            pool,
            breaker,
            retry,
            Arc::clone(&metrics),
        );
        let executor = match config.metrics.push {
            MetricsPush::None => executor,
            MetricsPush::Log => executor.with_exporter(Arc::new(LogExporter)),
        };

        Ok(Self {
            config,
            executor,
            cache,
            metrics,
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Endpoint of the remote service
    pub fn endpoint(&self) -> &Endpoint {
        self.executor.endpoint()
    }

    /// Current circuit breaker state
    pub fn circuit_state(&self) -> CircuitState {
        self.executor.breaker().state()
    }

    /// Probe the remote service.
    ///
    /// Failures are reported in the returned report, never raised.
    #[instrument(skip(self), fields(endpoint = %self.endpoint()))]
    pub async fn health_check(&self) -> HealthReport {
        let started = Instant::now();
        let result = self.executor.execute(&RequestDescriptor::heartbeat()).await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        let cache_healthy = if self.cache.is_enabled() {
            Some(self.cache.health_check().await.is_ok())
        } else {
            None
        };

        let (status, error) = match result {
            Ok(_) => (HealthStatus::Healthy, None),
            Err(error) => {
                warn!(error = %error, "Health check failed");
                (HealthStatus::Unhealthy, Some(error.to_string()))
            }
        };

        HealthReport {
            status,
            endpoint: self.endpoint().to_string(),
            latency_ms,
            error,
            circuit_state: self.circuit_state(),
            pool: self.executor.pool().stats(),
            cache_healthy,
            metrics: self.metrics.snapshot(),
            checked_at: Utc::now(),
        }
    }

    /// List every collection
    #[instrument(skip(self))]
    pub async fn list_collections(&self) -> VectorResult<Vec<Collection>> {
        let result = self.read(&RequestDescriptor::list_collections()).await;
        self.degrade("list_collections", result, Vec::new)
    }

    /// Get one collection
    #[instrument(skip(self))]
    pub async fn get_collection(&self, name: &str) -> VectorResult<Collection> {
        self.read(&RequestDescriptor::get_collection(name)?).await
    }

    /// Create a collection
    #[instrument(skip(self, metadata))]
    pub async fn create_collection(
        &self,
        name: &str,
        metadata: Option<Metadata>,
    ) -> VectorResult<Collection> {
        let request = RequestDescriptor::create_collection(name, metadata.clone())?;
        let value = self.write(&request).await?;

        let collection = if value.is_null() {
            Collection {
                id: None,
                name: name.to_string(),
                metadata,
            }
        } else {
            decode(value)?
        };
        info!(collection = %collection.name, "Collection created");
        Ok(collection)
    }

    /// Delete a collection
    #[instrument(skip(self))]
    pub async fn delete_collection(&self, name: &str) -> VectorResult<()> {
        self.write(&RequestDescriptor::delete_collection(name)?)
            .await?;
        info!(collection = %name, "Collection deleted");
        Ok(())
    }

    /// Add documents to a collection.
    ///
    /// Missing metadata defaults to empty maps and missing ids are generated.
    #[instrument(skip(self, documents, metadatas, ids), fields(count = documents.len()))]
    pub async fn add_documents(
        &self,
        collection: &str,
        documents: Vec<String>,
        metadatas: Option<Vec<Metadata>>,
        ids: Option<Vec<String>>,
    ) -> VectorResult<AddDocumentsResult> {
        let payload = AddDocuments::new(documents, metadatas, ids)?;
        self.add(collection, payload).await
    }

    async fn add(&self, collection: &str, payload: AddDocuments) -> VectorResult<AddDocumentsResult> {
        self.write(&RequestDescriptor::add_documents(collection, &payload)?)
            .await?;
        debug!(collection = %collection, count = payload.len(), "Documents added");
        Ok(AddDocumentsResult {
            collection: collection.to_string(),
            ids: payload.ids,
        })
    }

    /// Find the `k` nearest documents for each query text
    #[instrument(skip(self, queries, filters), fields(queries = queries.len()))]
    pub async fn similarity_search(
        &self,
        collection: &str,
        queries: Vec<String>,
        k: usize,
        filters: SearchFilters,
    ) -> VectorResult<QueryResponse> {
        let query = QueryRequest::new(queries, k, filters)?;
        self.search(collection, &query).await
    }

    async fn search(&self, collection: &str, query: &QueryRequest) -> VectorResult<QueryResponse> {
        let result = self
            .read(&RequestDescriptor::query(collection, query)?)
            .await;
        let query_count = query.query_texts.len();
        self.degrade("similarity_search", result, || QueryResponse {
            ids: vec![Vec::new(); query_count],
            ..QueryResponse::default()
        })
    }

    /// Run independent operations concurrently.
    ///
    /// Results are positional. A failed operation yields an error at its
    /// index and does not affect the others.
    #[instrument(skip(self, operations), fields(operations = operations.len()))]
    pub async fn batch_execute(
        &self,
        operations: Vec<BatchOperation>,
    ) -> Vec<VectorResult<BatchOutput>> {
        let results: Vec<_> = stream::iter(operations)
            .map(|operation| self.run_operation(operation))
            .buffered(self.config.batch_concurrency)
            .collect()
            .await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            warn!(failed, total = results.len(), "Batch completed with failures");
        } else {
            debug!(total = results.len(), "Batch completed");
        }
        results
    }

    async fn run_operation(&self, operation: BatchOperation) -> VectorResult<BatchOutput> {
        match operation {
            BatchOperation::ListCollections => {
                self.list_collections().await.map(BatchOutput::Collections)
            }
            BatchOperation::GetCollection { name } => {
                self.get_collection(&name).await.map(BatchOutput::Collection)
            }
            BatchOperation::CreateCollection { name, metadata } => self
                .create_collection(&name, metadata)
                .await
                .map(BatchOutput::Collection),
            BatchOperation::DeleteCollection { name } => self
                .delete_collection(&name)
                .await
                .map(|()| BatchOutput::Deleted { name }),
            BatchOperation::AddDocuments {
                collection,
                documents,
            } => self.add(&collection, documents).await.map(BatchOutput::Added),
            BatchOperation::Search { collection, query } => self
                .search(&collection, &query)
                .await
                .map(BatchOutput::Search),
        }
    }

    /// Current client metrics
    pub fn metrics(&self) -> ClientMetrics {
        ClientMetrics {
            requests: self.metrics.snapshot(),
            pool: self.executor.pool().stats(),
            circuit_breaker: self.executor.breaker().stats(),
            cache: self.cache.stats(),
        }
    }

    /// Push the current metrics snapshot to `exporter`
    pub fn export_metrics(&self, exporter: &dyn MetricsExporter) -> Result<(), ExportError> {
        exporter.export(&self.metrics.snapshot())
    }

    /// Remove every cached response
    pub async fn clear_cache(&self) -> u64 {
        self.cache.clear().await
    }

    /// Stop the pool health checker and drop pooled connections
    pub fn close(&self) {
        self.executor.pool().close();
        info!(endpoint = %self.endpoint(), "Vector client closed");
    }

    async fn read<T>(&self, request: &RequestDescriptor) -> VectorResult<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let prefix = request.cache_prefix();
        if let Some(prefix) = &prefix {
            if let Some(cached) = self.cache.get(prefix, request).await {
                return Ok(cached);
            }
        }

        let value: T = decode(self.executor.execute(request).await?)?;
        if let Some(prefix) = &prefix {
            self.cache.set(prefix, request, &value).await;
        }
        Ok(value)
    }

    async fn write(&self, request: &RequestDescriptor) -> VectorResult<Value> {
        let value = self.executor.execute(request).await?;
        for pattern in request.invalidation_patterns() {
            self.cache.invalidate(&pattern).await;
        }
        Ok(value)
    }

    fn degrade<T>(
        &self,
        operation: &'static str,
        result: VectorResult<T>,
        fallback: impl FnOnce() -> T,
    ) -> VectorResult<T> {
        match result {
            Err(error)
                if self.config.degrade_reads
                    && !matches!(error, VectorError::InvalidRequest { .. }) =>
            {
                warn!(operation, error = %error, "Read failed, returning empty result");
                Ok(fallback())
            }
            other => other,
        }
    }
}

impl std::fmt::Debug for VectorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorClient")
            .field("endpoint", self.endpoint())
            .field("executor", &self.executor)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> VectorResult<T> {
    serde_json::from_value(value)
        .map_err(|e| VectorError::serialization(format!("Unexpected response shape: {e}")))
}

/// One operation of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BatchOperation {
    /// List every collection
    ListCollections,
    /// Get one collection
    GetCollection {
        /// Collection name
        name: String,
    },
    /// Create a collection
    CreateCollection {
        /// Collection name
        name: String,
        /// Collection metadata
        #[serde(default)]
        metadata: Option<Metadata>,
    },
    /// Delete a collection
    DeleteCollection {
        /// Collection name
        name: String,
    },
    /// Add documents to a collection
    AddDocuments {
        /// Target collection
        collection: String,
        /// Documents to add
        documents: AddDocuments,
    },
    /// Similarity search
    Search {
        /// Target collection
        collection: String,
        /// Query body
        query: QueryRequest,
    },
}

/// Result of one batch operation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum BatchOutput {
    /// Listed collections
    Collections(Vec<Collection>),
    /// Fetched or created collection
    Collection(Collection),
    /// Deleted collection
    Deleted {
        /// Collection name
        name: String,
    },
    /// Added documents
    Added(AddDocumentsResult),
    /// Search results
    Search(QueryResponse),
}

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Heartbeat succeeded
    Healthy,
    /// Heartbeat failed
    Unhealthy,
}

/// Outcome of [`VectorClient::health_check`]
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Overall status
    pub status: HealthStatus,
    /// Probed endpoint
    pub endpoint: String,
    /// Heartbeat latency, retries included
    pub latency_ms: f64,
    /// Failure description when unhealthy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Circuit breaker state after the probe
    pub circuit_state: CircuitState,
    /// Pool statistics
    pub pool: PoolStats,
    /// Cache backend reachability; `None` when caching is disabled
    pub cache_healthy: Option<bool>,
    /// Request metrics
    pub metrics: MetricsSnapshot,
    /// Time of the probe
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    /// Check whether the probe succeeded
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Metrics of every client component
#[derive(Debug, Clone, Serialize)]
pub struct ClientMetrics {
    /// Request statistics
    pub requests: MetricsSnapshot,
    /// Pool statistics
    pub pool: PoolStats,
    /// Circuit breaker statistics
    pub circuit_breaker: CircuitBreakerStats,
    /// Cache statistics
    pub cache: CacheStats,
}
