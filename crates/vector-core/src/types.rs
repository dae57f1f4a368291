//! Wire types for the remote vector-search service.

use crate::error::{VectorError, VectorResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Free-form metadata attached to collections and documents.
pub type Metadata = serde_json::Map<String, Value>;

/// Address of the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// URL scheme (`http` or `https`).
    pub scheme: String,
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Path prefix of the REST API.
    pub base_path: String,
}

impl Endpoint {
    /// Default API path prefix.
    pub const DEFAULT_BASE_PATH: &'static str = "/api/v1";

    /// Create an HTTP endpoint with the default base path.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: "http".to_string(),
            host: host.into(),
            port,
            base_path: Self::DEFAULT_BASE_PATH.to_string(),
        }
    }

    /// Set the URL scheme.
    #[must_use]
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Set the API path prefix.
    #[must_use]
    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    /// Base URL, e.g. `http://localhost:8000/api/v1`.
    #[must_use]
    pub fn base_url(&self) -> String {
        let base_path = self.base_path.trim_end_matches('/');
        format!("{}://{}:{}{}", self.scheme, self.host, self.port, base_path)
    }

    /// Full URL for an API path relative to the base path.
    #[must_use]
    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url(), path.trim_start_matches('/'))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A collection on the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    /// Server-assigned identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Collection name.
    pub name: String,
    /// Collection metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

/// Documents to ingest into a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddDocuments {
    /// Document texts.
    pub documents: Vec<String>,
    /// One metadata map per document.
    pub metadatas: Vec<Metadata>,
    /// One id per document.
    pub ids: Vec<String>,
}

impl AddDocuments {
    /// Build an ingestion payload.
    ///
    /// Missing metadata defaults to empty maps and missing ids are generated.
    ///
    /// # Errors
    /// Returns `InvalidRequest` when there are no documents or when the
    /// supplied metadata or id lists do not match the document count.
    pub fn new(
        documents: Vec<String>,
        metadatas: Option<Vec<Metadata>>,
        ids: Option<Vec<String>>,
    ) -> VectorResult<Self> {
        if documents.is_empty() {
            return Err(VectorError::invalid_request("no documents to add"));
        }

        let count = documents.len();
        let metadatas = metadatas.unwrap_or_else(|| vec![Metadata::new(); count]);
        if metadatas.len() != count {
            return Err(VectorError::invalid_request(format!(
                "expected {count} metadatas, got {}",
                metadatas.len()
            )));
        }

        let ids = ids.unwrap_or_else(|| {
            (0..count)
                .map(|_| uuid::Uuid::new_v4().to_string())
                .collect()
        });
        if ids.len() != count {
            return Err(VectorError::invalid_request(format!(
                "expected {count} ids, got {}",
                ids.len()
            )));
        }

        Ok(Self {
            documents,
            metadatas,
            ids,
        })
    }

    /// Number of documents in the payload.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Check whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Outcome of a document ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddDocumentsResult {
    /// Collection the documents were added to.
    pub collection: String,
    /// Ids of the ingested documents, in input order.
    pub ids: Vec<String>,
}

/// Optional filters for a similarity search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Filter on document metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Filter on document content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<Value>,
}

impl SearchFilters {
    /// No filters.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Filter on document metadata.
    #[must_use]
    pub fn with_metadata(mut self, filter: Value) -> Self {
        self.metadata = Some(filter);
        self
    }

    /// Filter on document content.
    #[must_use]
    pub fn with_document(mut self, filter: Value) -> Self {
        self.document = Some(filter);
        self
    }
}

/// Body of a similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Query texts, one result set per text.
    pub query_texts: Vec<String>,
    /// Number of neighbours per query.
    pub n_results: usize,
    /// Metadata filter.
    #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
    pub where_filter: Option<Value>,
    /// Document content filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub where_document: Option<Value>,
}

impl QueryRequest {
    /// Build a query body.
    ///
    /// # Errors
    /// Returns `InvalidRequest` when there are no queries or `k` is zero.
    pub fn new(queries: Vec<String>, k: usize, filters: SearchFilters) -> VectorResult<Self> {
        if queries.is_empty() {
            return Err(VectorError::invalid_request("no query texts"));
        }
        if k == 0 {
            return Err(VectorError::invalid_request("k must be at least 1"));
        }
        Ok(Self {
            query_texts: queries,
            n_results: k,
            where_filter: filters.metadata,
            where_document: filters.document,
        })
    }
}

/// Result of a similarity search, one inner list per query text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    /// Matching document ids.
    #[serde(default)]
    pub ids: Vec<Vec<String>>,
    /// Matching document texts.
    #[serde(default)]
    pub documents: Option<Vec<Vec<Option<String>>>>,
    /// Matching document metadata.
    #[serde(default)]
    pub metadatas: Option<Vec<Vec<Option<Metadata>>>>,
    /// Distance of each match from its query.
    #[serde(default)]
    pub distances: Option<Vec<Vec<f32>>>,
}

/// A single match of a similarity search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// Document id.
    pub id: String,
    /// Document text, when returned.
    pub document: Option<String>,
    /// Document metadata, when returned.
    pub metadata: Option<Metadata>,
    /// Distance from the query, when returned.
    pub distance: Option<f32>,
}

impl QueryResponse {
    /// Number of query result sets.
    #[must_use]
    pub fn query_count(&self) -> usize {
        self.ids.len()
    }

    /// Total number of matches over all queries.
    #[must_use]
    pub fn total_hits(&self) -> usize {
        self.ids.iter().map(Vec::len).sum()
    }

    /// Flatten the matches for one query into hits.
    #[must_use]
    pub fn hits(&self, query_index: usize) -> Vec<SearchHit> {
        let Some(ids) = self.ids.get(query_index) else {
            return Vec::new();
        };

        ids.iter()
            .enumerate()
            .map(|(i, id)| SearchHit {
                id: id.clone(),
                document: self
                    .documents
                    .as_ref()
                    .and_then(|d| d.get(query_index))
                    .and_then(|row| row.get(i).cloned().flatten()),
                metadata: self
                    .metadatas
                    .as_ref()
                    .and_then(|m| m.get(query_index))
                    .and_then(|row| row.get(i).cloned().flatten()),
                distance: self
                    .distances
                    .as_ref()
                    .and_then(|d| d.get(query_index))
                    .and_then(|row| row.get(i).copied()),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_endpoint_urls() {
        let endpoint = Endpoint::new("localhost", 8000);
        assert_eq!(endpoint.base_url(), "http://localhost:8000/api/v1");
        assert_eq!(
            endpoint.url_for("/collections"),
            "http://localhost:8000/api/v1/collections"
        );
        assert_eq!(endpoint.to_string(), "localhost:8000");

        let endpoint = Endpoint::new("db.internal", 443)
            .with_scheme("https")
            .with_base_path("/");
        assert_eq!(endpoint.url_for("heartbeat"), "https://db.internal:443/heartbeat");
    }

    #[test]
    fn test_add_documents_defaults() {
        let add = AddDocuments::new(vec!["a".into(), "b".into()], None, None).unwrap();
        assert_eq!(add.len(), 2);
        assert_eq!(add.metadatas, vec![Metadata::new(), Metadata::new()]);
        assert_eq!(add.ids.len(), 2);
        assert_ne!(add.ids[0], add.ids[1]);
    }

    #[test]
    fn test_add_documents_length_mismatch() {
        let err = AddDocuments::new(vec!["a".into()], None, Some(vec![])).unwrap_err();
        assert!(matches!(err, VectorError::InvalidRequest { .. }));

        let err = AddDocuments::new(vec![], None, None).unwrap_err();
        assert!(matches!(err, VectorError::InvalidRequest { .. }));
    }

    #[test]
    fn test_query_request_serializes_where() {
        let filters = SearchFilters::none().with_metadata(json!({"source": "wiki"}));
        let request = QueryRequest::new(vec!["rust".into()], 4, filters).unwrap();
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["where"], json!({"source": "wiki"}));
        assert_eq!(value["n_results"], 4);
        assert!(value.get("where_document").is_none());
        assert!(QueryRequest::new(vec!["rust".into()], 0, SearchFilters::none()).is_err());
    }

    #[test]
    fn test_query_response_hits() {
        let response: QueryResponse = serde_json::from_value(json!({
            "ids": [["d1", "d2"]],
            "documents": [["first", null]],
            "distances": [[0.1, 0.4]]
        }))
        .unwrap();

        assert_eq!(response.query_count(), 1);
        assert_eq!(response.total_hits(), 2);

        let hits = response.hits(0);
        assert_eq!(hits[0].id, "d1");
        assert_eq!(hits[0].document.as_deref(), Some("first"));
        assert_eq!(hits[1].document, None);
        assert_eq!(hits[1].distance, Some(0.4));
        assert!(response.hits(3).is_empty());
    }
}
