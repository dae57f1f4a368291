//! HTTP transports.
//!
//! Two strategies implement the same [`Connector`] contract:
//! - [`HttpConnector`] issues requests with the non-blocking reqwest client
//! - [`BlockingHttpConnector`] issues requests with reqwest's blocking client
//!   on the runtime's blocking thread pool
//!
//! Both decode the response the same way: 2xx bodies are parsed as JSON (an
//! empty body is `null`), any other status becomes a `Transport` error that
//! carries the status code and response body.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, trace};
use vector_config::{TransportConfig, TransportStrategy};
use vector_core::{
    Connection, Connector, Endpoint, HttpMethod, RequestDescriptor, VectorError, VectorResult,
};

const USER_AGENT: &str = concat!("vector-client/", env!("CARGO_PKG_VERSION"));

/// Create the connector for the configured strategy
pub fn connector_for(config: &TransportConfig) -> VectorResult<Arc<dyn Connector>> {
    Ok(match config.strategy {
        TransportStrategy::Async => Arc::new(HttpConnector::new(config)?),
        TransportStrategy::Blocking => Arc::new(BlockingHttpConnector::new(config)),
    })
}

/// Non-blocking HTTP strategy.
///
/// Handles share one reqwest client, and with it the underlying keep-alive
/// sockets; the pool bounds how many requests are in flight.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    http: reqwest::Client,
    read_timeout: Duration,
}

impl HttpConnector {
    /// Build the connector
    pub fn new(config: &TransportConfig) -> VectorResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.read_timeout)
            .connect_timeout(config.connection_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| {
                VectorError::configuration(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            http,
            read_timeout: config.read_timeout,
        })
    }
}

impl Connector for HttpConnector {
    fn connect(&self, endpoint: &Endpoint) -> VectorResult<Arc<dyn Connection>> {
        Ok(Arc::new(HttpConnection {
            http: self.http.clone(),
            endpoint: endpoint.clone(),
            read_timeout: self.read_timeout,
        }))
    }

    fn name(&self) -> &'static str {
        "async"
    }
}

struct HttpConnection {
    http: reqwest::Client,
    endpoint: Endpoint,
    read_timeout: Duration,
}

#[async_trait]
impl Connection for HttpConnection {
    async fn send(&self, request: &RequestDescriptor) -> VectorResult<Value> {
        let url = self.endpoint.url_for(request.path());
        trace!(method = request.method().as_str(), url = %url, "Sending request");

        let mut builder = match request.method() {
            HttpMethod::Get => self.http.get(&url),
            HttpMethod::Post => self.http.post(&url),
            HttpMethod::Delete => self.http.delete(&url),
        };
        if let Some(body) = request.body() {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| map_reqwest_error(&self.endpoint, request, self.read_timeout, &e))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| map_reqwest_error(&self.endpoint, request, self.read_timeout, &e))?;

        decode_response(&self.endpoint, status, &body)
    }

    async fn heartbeat(&self) -> VectorResult<()> {
        self.send(&RequestDescriptor::heartbeat()).await.map(|_| ())
    }
}

/// Blocking HTTP strategy.
///
/// Each request runs on `tokio::task::spawn_blocking`. The blocking client is
/// built lazily on the first request, inside the blocking pool, since reqwest
/// refuses to build it from async context.
///
/// A blocking request cannot be aborted once started. Each connection carries
/// a single in-flight permit that moves into the blocking task, so a request
/// abandoned by a cancelled caller keeps its connection busy until it
/// finishes, and at most one request per pooled connection is on the wire.
#[derive(Debug, Clone)]
pub struct BlockingHttpConnector {
    client: Arc<BlockingClientSlot>,
    config: TransportConfig,
}

impl BlockingHttpConnector {
    /// Build the connector
    #[must_use]
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            client: Arc::new(BlockingClientSlot::default()),
            config: config.clone(),
        }
    }
}

impl BlockingHttpConnector {
    fn connection(&self, endpoint: &Endpoint) -> BlockingHttpConnection {
        BlockingHttpConnection {
            client: Arc::clone(&self.client),
            config: self.config.clone(),
            endpoint: endpoint.clone(),
            in_flight: Arc::new(Semaphore::new(1)),
        }
    }
}

impl Connector for BlockingHttpConnector {
    fn connect(&self, endpoint: &Endpoint) -> VectorResult<Arc<dyn Connection>> {
        Ok(Arc::new(self.connection(endpoint)))
    }

    fn name(&self) -> &'static str {
        "blocking"
    }
}

#[derive(Debug, Default)]
struct BlockingClientSlot(OnceLock<reqwest::blocking::Client>);

impl BlockingClientSlot {
    fn get_or_build(&self, config: &TransportConfig) -> VectorResult<&reqwest::blocking::Client> {
        if let Some(client) = self.0.get() {
            return Ok(client);
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(config.read_timeout)
            .connect_timeout(config.connection_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| {
                VectorError::configuration(format!("Failed to create blocking HTTP client: {e}"))
            })?;
        // A concurrent first request may have won the race; keep its client.
        let _ = self.0.set(client);
        debug!("Blocking HTTP client initialised");

        self.0
            .get()
            .ok_or_else(|| VectorError::internal("blocking HTTP client missing after init"))
    }
}

impl Drop for BlockingClientSlot {
    fn drop(&mut self) {
        // The blocking client owns an internal runtime that must not be shut
        // down from async context.
        if let Some(client) = self.0.take() {
            std::thread::spawn(move || drop(client));
        }
    }
}

struct BlockingHttpConnection {
    client: Arc<BlockingClientSlot>,
    config: TransportConfig,
    endpoint: Endpoint,
    in_flight: Arc<Semaphore>,
}

impl BlockingHttpConnection {
    fn send_blocking(
        client: &BlockingClientSlot,
        config: &TransportConfig,
        endpoint: &Endpoint,
        request: &RequestDescriptor,
    ) -> VectorResult<Value> {
        let http = client.get_or_build(config)?;
        let url = endpoint.url_for(request.path());
        trace!(method = request.method().as_str(), url = %url, "Sending blocking request");

        let mut builder = match request.method() {
            HttpMethod::Get => http.get(&url),
            HttpMethod::Post => http.post(&url),
            HttpMethod::Delete => http.delete(&url),
        };
        if let Some(body) = request.body() {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .map_err(|e| map_reqwest_error(endpoint, request, config.read_timeout, &e))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|e| map_reqwest_error(endpoint, request, config.read_timeout, &e))?;

        decode_response(endpoint, status, &body)
    }
}

#[async_trait]
impl Connection for BlockingHttpConnection {
    async fn send(&self, request: &RequestDescriptor) -> VectorResult<Value> {
        let client = Arc::clone(&self.client);
        let config = self.config.clone();
        let endpoint = self.endpoint.clone();
        let request = request.clone();
        let permit = Arc::clone(&self.in_flight)
            .acquire_owned()
            .await
            .map_err(|e| VectorError::internal(format!("Connection closed: {e}")))?;

        tokio::task::spawn_blocking(move || {
            let result = Self::send_blocking(&client, &config, &endpoint, &request);
            drop(permit);
            result
        })
        .await
        .map_err(|e| VectorError::internal(format!("Blocking request task failed: {e}")))?
    }

    async fn heartbeat(&self) -> VectorResult<()> {
        self.send(&RequestDescriptor::heartbeat()).await.map(|_| ())
    }
}

fn decode_response(endpoint: &Endpoint, status: u16, body: &str) -> VectorResult<Value> {
    if !(200..300).contains(&status) {
        let message = if body.trim().is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {}", body.trim())
        };
        return Err(VectorError::transport(
            endpoint.to_string(),
            message,
            Some(status),
        ));
    }

    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body)
        .map_err(|e| VectorError::serialization(format!("Failed to parse response: {e}")))
}

fn map_reqwest_error(
    endpoint: &Endpoint,
    request: &RequestDescriptor,
    read_timeout: Duration,
    error: &reqwest::Error,
) -> VectorError {
    if error.is_timeout() {
        VectorError::timeout(request.kind().as_str(), read_timeout)
    } else {
        VectorError::transport(
            endpoint.to_string(),
            error.to_string(),
            error.status().map(|s| s.as_u16()),
        )
    }
}
