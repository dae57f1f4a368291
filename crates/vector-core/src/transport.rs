//! Transport traits.
//!
//! A [`Connector`] creates transport handles bound to an endpoint; a
//! [`Connection`] issues descriptors over one handle. The blocking and
//! non-blocking HTTP strategies both implement these traits, so the pool and
//! the resilient executor are written once against them.

use crate::error::VectorResult;
use crate::request::RequestDescriptor;
use crate::types::Endpoint;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// A transport handle bound to one endpoint.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Issue a request and return the decoded JSON body.
    async fn send(&self, request: &RequestDescriptor) -> VectorResult<Value>;

    /// Lightweight liveness probe used by the pool health checker.
    async fn heartbeat(&self) -> VectorResult<()>;
}

/// Factory for transport handles.
pub trait Connector: Send + Sync {
    /// Create a new handle bound to `endpoint`.
    ///
    /// Handle creation must not perform I/O: the pool calls this while
    /// holding its lock.
    fn connect(&self, endpoint: &Endpoint) -> VectorResult<Arc<dyn Connection>>;

    /// Strategy name for logs.
    fn name(&self) -> &'static str;
}
