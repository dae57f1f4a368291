//! Request descriptors.
//!
//! A [`RequestDescriptor`] is the materialized form of one domain call. The
//! transport turns it into an HTTP request and the cache layer hashes it into
//! a key, so it is immutable once constructed.

use crate::error::{VectorError, VectorResult};
use crate::types::{AddDocuments, Metadata, QueryRequest};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;

/// Domain operation carried by a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Liveness probe.
    Heartbeat,
    /// List all collections.
    ListCollections,
    /// Fetch one collection.
    GetCollection,
    /// Create a collection.
    CreateCollection,
    /// Delete a collection.
    DeleteCollection,
    /// Ingest documents into a collection.
    AddDocuments,
    /// Similarity search within a collection.
    Query,
}

impl OperationKind {
    /// Operation name used in logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Heartbeat => "heartbeat",
            Self::ListCollections => "list_collections",
            Self::GetCollection => "get_collection",
            Self::CreateCollection => "create_collection",
            Self::DeleteCollection => "delete_collection",
            Self::AddDocuments => "add_documents",
            Self::Query => "query",
        }
    }

    /// Check whether the operation mutates remote state.
    #[must_use]
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::CreateCollection | Self::DeleteCollection | Self::AddDocuments
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP verb of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum HttpMethod {
    /// GET
    Get,
    /// POST
    Post,
    /// DELETE
    Delete,
}

impl HttpMethod {
    /// Upper-case method name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        }
    }
}

/// Materialized parameters of a single domain call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestDescriptor {
    kind: OperationKind,
    method: HttpMethod,
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    collection: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<Value>,
}

impl RequestDescriptor {
    fn new(
        kind: OperationKind,
        method: HttpMethod,
        path: String,
        collection: Option<String>,
        body: Option<Value>,
    ) -> Self {
        Self {
            kind,
            method,
            path,
            collection,
            body,
        }
    }

    /// `GET /heartbeat`
    #[must_use]
    pub fn heartbeat() -> Self {
        Self::new(
            OperationKind::Heartbeat,
            HttpMethod::Get,
            "/heartbeat".to_string(),
            None,
            None,
        )
    }

    /// `GET /collections`
    #[must_use]
    pub fn list_collections() -> Self {
        Self::new(
            OperationKind::ListCollections,
            HttpMethod::Get,
            "/collections".to_string(),
            None,
            None,
        )
    }

    /// `GET /collections/{name}`
    pub fn get_collection(name: &str) -> VectorResult<Self> {
        validate_collection_name(name)?;
        Ok(Self::new(
            OperationKind::GetCollection,
            HttpMethod::Get,
            format!("/collections/{name}"),
            Some(name.to_string()),
            None,
        ))
    }

    /// `POST /collections`
    pub fn create_collection(name: &str, metadata: Option<Metadata>) -> VectorResult<Self> {
        validate_collection_name(name)?;
        Ok(Self::new(
            OperationKind::CreateCollection,
            HttpMethod::Post,
            "/collections".to_string(),
            Some(name.to_string()),
            Some(json!({
                "name": name,
                "metadata": metadata.unwrap_or_default(),
            })),
        ))
    }

    /// `DELETE /collections/{name}`
    pub fn delete_collection(name: &str) -> VectorResult<Self> {
        validate_collection_name(name)?;
        Ok(Self::new(
            OperationKind::DeleteCollection,
            HttpMethod::Delete,
            format!("/collections/{name}"),
            Some(name.to_string()),
            None,
        ))
    }

    /// `POST /collections/{name}/add`
    pub fn add_documents(collection: &str, documents: &AddDocuments) -> VectorResult<Self> {
        validate_collection_name(collection)?;
        Ok(Self::new(
            OperationKind::AddDocuments,
            HttpMethod::Post,
            format!("/collections/{collection}/add"),
            Some(collection.to_string()),
            Some(serde_json::to_value(documents)?),
        ))
    }

    /// `POST /collections/{name}/query`
    pub fn query(collection: &str, query: &QueryRequest) -> VectorResult<Self> {
        validate_collection_name(collection)?;
        Ok(Self::new(
            OperationKind::Query,
            HttpMethod::Post,
            format!("/collections/{collection}/query"),
            Some(collection.to_string()),
            Some(serde_json::to_value(query)?),
        ))
    }

    /// Operation kind.
    #[must_use]
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// HTTP method.
    #[must_use]
    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// Path relative to the endpoint's base path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Target collection, if any.
    #[must_use]
    pub fn collection(&self) -> Option<&str> {
        self.collection.as_deref()
    }

    /// JSON body, if any.
    #[must_use]
    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// Cache namespace for read operations; `None` for uncacheable calls.
    ///
    /// Collection-scoped reads live under `collection:{name}:` so a write to
    /// that collection can evict them with `collection:{name}:*`.
    #[must_use]
    pub fn cache_prefix(&self) -> Option<String> {
        match (self.kind, self.collection.as_deref()) {
            (OperationKind::ListCollections, _) => Some("collections".to_string()),
            (OperationKind::GetCollection, Some(name)) => Some(format!("collection:{name}:info")),
            (OperationKind::Query, Some(name)) => Some(format!("collection:{name}:query")),
            _ => None,
        }
    }

    /// Cache patterns a successful write must invalidate.
    #[must_use]
    pub fn invalidation_patterns(&self) -> Vec<String> {
        match (self.kind, self.collection.as_deref()) {
            (OperationKind::CreateCollection | OperationKind::DeleteCollection, Some(name)) => {
                vec!["collections:*".to_string(), format!("collection:{name}:*")]
            }
            (OperationKind::AddDocuments, Some(name)) => vec![format!("collection:{name}:*")],
            _ => Vec::new(),
        }
    }
}

/// Validate a collection name before it is placed in a path or cache key.
///
/// # Errors
/// Returns `InvalidRequest` for empty names, whitespace, and characters
/// that are path separators or glob syntax in cache patterns (`/`, `:`, `*`,
/// `?`, `[`, `]`, `\`).
pub fn validate_collection_name(name: &str) -> VectorResult<()> {
    if name.is_empty() {
        return Err(VectorError::invalid_request("collection name is empty"));
    }
    if let Some(c) = name
        .chars()
        .find(|c| matches!(c, '/' | ':' | '*' | '?' | '[' | ']' | '\\') || c.is_whitespace())
    {
        return Err(VectorError::invalid_request(format!(
            "collection name '{name}' contains invalid character '{c}'"
        )));
    }
    Ok(())
}
