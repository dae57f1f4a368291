//! # Vector Core
//!
//! Core types, traits, and error handling for the resilient vector client.
//!
//! This crate provides the foundational types used throughout the client:
//! - The error taxonomy shared by every layer
//! - Request descriptors dispatched to the transport and used as cache keys
//! - Wire types for collections, documents and query results
//! - Transport traits implemented by the blocking and non-blocking strategies

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod request;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use error::{VectorError, VectorResult};
pub use request::{HttpMethod, OperationKind, RequestDescriptor};
pub use transport::{Connection, Connector};
pub use types::{
    AddDocuments, AddDocumentsResult, Collection, Endpoint, Metadata, QueryRequest,
    QueryResponse, SearchFilters, SearchHit,
};
