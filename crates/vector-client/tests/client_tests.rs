//! HTTP-level tests for the vector client against a mock service.

use serde_json::{json, Value};
use std::time::Duration;
use vector_client::{BatchOperation, BatchOutput, HealthStatus, VectorClient};
use vector_config::{ClientConfig, TransportStrategy};
use vector_core::{SearchFilters, VectorError};
use vector_resilience::CircuitState;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Mock vector-search service
struct MockVectorService {
    server: MockServer,
}

impl MockVectorService {
    async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Client config pointing at the mock, with fast retries
    fn config(&self) -> ClientConfig {
        let address = self.server.address();
        let mut config = ClientConfig::for_endpoint(address.ip().to_string(), address.port());
        config.retry.retry_delay = Duration::from_millis(10);
        config.retry.max_delay = Duration::from_millis(50);
        config
    }

    async fn mock(&self, verb: &str, route: &str, response: ResponseTemplate) {
        Mock::given(method(verb))
            .and(path(route))
            .respond_with(response)
            .mount(&self.server)
            .await;
    }

    async fn mock_times(&self, verb: &str, route: &str, response: ResponseTemplate, times: u64) {
        Mock::given(method(verb))
            .and(path(route))
            .respond_with(response)
            .expect(times)
            .mount(&self.server)
            .await;
    }

    async fn received(&self, route: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == route)
            .count()
    }
}

fn collections_body() -> Value {
    json!([
        {"id": "c1", "name": "docs", "metadata": {"owner": "search"}},
        {"id": "c2", "name": "notes"}
    ])
}

fn query_body() -> Value {
    json!({
        "ids": [["d1", "d2"]],
        "documents": [["Rust is fast", "Rust is safe"]],
        "metadatas": [[{"source": "wiki"}, null]],
        "distances": [[0.12, 0.34]]
    })
}

#[tokio::test]
async fn test_list_collections_is_cached() {
    let service = MockVectorService::start().await;
    service
        .mock_times(
            "GET",
            "/api/v1/collections",
            ResponseTemplate::new(200).set_body_json(collections_body()),
            1,
        )
        .await;

    let client = VectorClient::new(service.config()).await.unwrap();

    let first = client.list_collections().await.unwrap();
    let second = client.list_collections().await.unwrap();

    assert_eq!(first.len(), 2);
    assert_eq!(first[0].name, "docs");
    assert_eq!(first, second);

    let metrics = client.metrics();
    assert_eq!(metrics.requests.requests_total, 1);
    assert_eq!(metrics.requests.cache_hits, 1);
    assert!((metrics.requests.cache_hit_rate - 0.5).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_add_documents_invalidates_collection_queries() {
    let service = MockVectorService::start().await;
    service
        .mock_times(
            "POST",
            "/api/v1/collections/docs/query",
            ResponseTemplate::new(200).set_body_json(query_body()),
            2,
        )
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/collections/docs/add"))
        .and(body_partial_json(json!({"documents": ["Rust is fearless"], "ids": ["d3"]})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!(true)))
        .expect(1)
        .mount(&service.server)
        .await;

    let client = VectorClient::new(service.config()).await.unwrap();
    let search = || {
        client.similarity_search(
            "docs",
            vec!["speed".into()],
            2,
            SearchFilters::none().with_metadata(json!({"source": "wiki"})),
        )
    };

    let results = search().await.unwrap();
    assert_eq!(results.total_hits(), 2);
    let hits = results.hits(0);
    assert_eq!(hits[0].document.as_deref(), Some("Rust is fast"));
    assert_eq!(hits[1].metadata, None);

    search().await.unwrap();

    let added = client
        .add_documents(
            "docs",
            vec!["Rust is fearless".into()],
            None,
            Some(vec!["d3".into()]),
        )
        .await
        .unwrap();
    assert_eq!(added.ids, vec!["d3".to_string()]);

    search().await.unwrap();
}

#[tokio::test]
async fn test_retries_transient_failures() {
    let service = MockVectorService::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/collections/docs"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&service.server)
        .await;
    service
        .mock(
            "GET",
            "/api/v1/collections/docs",
            ResponseTemplate::new(200).set_body_json(json!({"id": "c1", "name": "docs"})),
        )
        .await;

    let client = VectorClient::new(service.config()).await.unwrap();
    let collection = client.get_collection("docs").await.unwrap();

    assert_eq!(collection.id.as_deref(), Some("c1"));
    let metrics = client.metrics();
    assert_eq!(metrics.requests.retries, 2);
    assert_eq!(metrics.requests.requests_failed, 2);
    assert_eq!(metrics.requests.requests_success, 1);
    assert_eq!(metrics.circuit_breaker.consecutive_failures, 0);
}

#[tokio::test]
async fn test_exhausted_retries_surface_last_error() {
    let service = MockVectorService::start().await;
    service
        .mock_times(
            "GET",
            "/api/v1/collections",
            ResponseTemplate::new(503).set_body_string("overloaded"),
            3,
        )
        .await;

    let client = VectorClient::new(service.config()).await.unwrap();
    let err = client.list_collections().await.unwrap_err();

    match err {
        VectorError::Transport {
            status_code,
            message,
            ..
        } => {
            assert_eq!(status_code, Some(503));
            assert!(message.contains("overloaded"), "{message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(client.metrics().pool.in_use, 0);
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let service = MockVectorService::start().await;
    service
        .mock_times(
            "GET",
            "/api/v1/collections/missing",
            ResponseTemplate::new(404).set_body_json(json!({"error": "not found"})),
            1,
        )
        .await;

    let client = VectorClient::new(service.config()).await.unwrap();
    let err = client.get_collection("missing").await.unwrap_err();

    assert_eq!(err.status_code(), Some(404));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_circuit_opens_and_stops_traffic() {
    let service = MockVectorService::start().await;
    service
        .mock(
            "GET",
            "/api/v1/collections",
            ResponseTemplate::new(500),
        )
        .await;

    let mut config = service.config();
    config.retry.retry_attempts = 1;
    config.circuit_breaker.failure_threshold = 2;
    config.circuit_breaker.recovery_timeout = Duration::from_secs(60);
    let client = VectorClient::new(config).await.unwrap();

    for _ in 0..2 {
        let err = client.list_collections().await.unwrap_err();
        assert!(matches!(err, VectorError::Transport { .. }));
    }
    assert_eq!(client.circuit_state(), CircuitState::Open);

    for _ in 0..3 {
        let err = client.list_collections().await.unwrap_err();
        assert!(matches!(err, VectorError::CircuitOpen { .. }));
    }

    assert_eq!(service.received("/api/v1/collections").await, 2);
    assert_eq!(client.metrics().requests.circuit_rejections, 3);
}

#[tokio::test]
async fn test_batch_partial_failure() {
    let service = MockVectorService::start().await;
    service
        .mock(
            "GET",
            "/api/v1/collections/alpha",
            ResponseTemplate::new(200).set_body_json(json!({"name": "alpha"})),
        )
        .await;
    service
        .mock(
            "GET",
            "/api/v1/collections/beta",
            ResponseTemplate::new(500).set_body_string("boom"),
        )
        .await;
    service
        .mock(
            "POST",
            "/api/v1/collections",
            ResponseTemplate::new(200).set_body_json(json!({"id": "c9", "name": "gamma"})),
        )
        .await;

    let mut config = service.config();
    config.retry.retry_attempts = 1;
    let client = VectorClient::new(config).await.unwrap();

    let results = client
        .batch_execute(vec![
            BatchOperation::GetCollection {
                name: "alpha".into(),
            },
            BatchOperation::GetCollection {
                name: "beta".into(),
            },
            BatchOperation::CreateCollection {
                name: "gamma".into(),
                metadata: None,
            },
        ])
        .await;

    assert_eq!(results.len(), 3);
    match &results[0] {
        Ok(BatchOutput::Collection(collection)) => assert_eq!(collection.name, "alpha"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(results[1].as_ref().unwrap_err().status_code(), Some(500));
    match &results[2] {
        Ok(BatchOutput::Collection(collection)) => {
            assert_eq!(collection.id.as_deref(), Some("c9"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_read_timeout() {
    let service = MockVectorService::start().await;
    service
        .mock(
            "GET",
            "/api/v1/collections",
            ResponseTemplate::new(200)
                .set_body_json(collections_body())
                .set_delay(Duration::from_secs(2)),
        )
        .await;

    let mut config = service.config();
    config.retry.retry_attempts = 1;
    config.transport.read_timeout = Duration::from_millis(200);
    let client = VectorClient::new(config).await.unwrap();

    let err = client.list_collections().await.unwrap_err();
    assert!(matches!(err, VectorError::Timeout { .. }), "{err:?}");
}

#[tokio::test]
async fn test_health_check_reports_failures() {
    let service = MockVectorService::start().await;
    service
        .mock(
            "GET",
            "/api/v1/heartbeat",
            ResponseTemplate::new(500),
        )
        .await;

    let mut config = service.config();
    config.retry.retry_attempts = 1;
    let client = VectorClient::new(config).await.unwrap();

    let report = client.health_check().await;
    assert_eq!(report.status, HealthStatus::Unhealthy);
    assert!(report.error.as_deref().unwrap_or_default().contains("HTTP 500"));
    assert_eq!(report.metrics.requests_failed, 1);
}

#[tokio::test]
async fn test_health_check_healthy() {
    let service = MockVectorService::start().await;
    service
        .mock(
            "GET",
            "/api/v1/heartbeat",
            ResponseTemplate::new(200).set_body_json(json!({"nanosecond heartbeat": 1})),
        )
        .await;

    let client = VectorClient::new(service.config()).await.unwrap();
    let report = client.health_check().await;

    assert!(report.is_healthy());
    assert_eq!(report.pool.total, 1);
    assert_eq!(report.pool.in_use, 0);
    assert_eq!(report.metrics.requests_success, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_strategy() {
    let service = MockVectorService::start().await;
    service
        .mock_times(
            "GET",
            "/api/v1/collections",
            ResponseTemplate::new(200).set_body_json(collections_body()),
            2,
        )
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/collections"))
        .and(body_partial_json(json!({"name": "archive"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "c3", "name": "archive"})))
        .expect(1)
        .mount(&service.server)
        .await;
    service
        .mock_times(
            "DELETE",
            "/api/v1/collections/archive",
            ResponseTemplate::new(200),
            1,
        )
        .await;

    let mut config = service.config();
    config.transport.strategy = TransportStrategy::Blocking;
    let client = VectorClient::new(config).await.unwrap();

    assert_eq!(client.list_collections().await.unwrap().len(), 2);

    let created = client.create_collection("archive", None).await.unwrap();
    assert_eq!(created.id.as_deref(), Some("c3"));

    // The create evicted the cached listing.
    client.list_collections().await.unwrap();

    client.delete_collection("archive").await.unwrap();
    client.close();
}
