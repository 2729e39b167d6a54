//! Query engine for raged
//!
//! Dispatches a request to one of three strategies (semantic kNN, metadata
//! scan, full-text), shapes a unified result, and serves the two companion
//! endpoints returning the top document's raw bytes or concatenated text.

pub mod error;
pub mod service;

pub use error::QueryError;
pub use service::{
    DownloadedDocument, FulltextDocument, QueryRequest, QueryResponse, QueryResult, QueryRouting,
    QueryService, Strategy,
};
