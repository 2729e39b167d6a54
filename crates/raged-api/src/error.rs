//! API error mapping
//!
//! Every internal error kind gets its HTTP status here, at the boundary,
//! never at the call site. The wire shape is `{"error": "<message>"}` with
//! no stack traces.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use raged_common::CommonError;
use raged_data::DatabaseError;
use raged_ingestion::IngestError;
use raged_query::QueryError;

/// Result type alias for handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// Boundary error carrying its status
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl CommonError for ApiError {
    fn io_error(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    fn config_error(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    fn parse_error(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    fn other_error(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.message, "request failed");
        }
        (self.status, Json(json!({"error": self.message}))).into_response()
    }
}

fn database_status(err: &DatabaseError) -> StatusCode {
    match err {
        DatabaseError::NotFound { .. } => StatusCode::NOT_FOUND,
        DatabaseError::ChunkIdInvalid { .. } => StatusCode::BAD_REQUEST,
        DatabaseError::VectorDimensionMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        DatabaseError::BlobStoreUnavailable { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        Self::new(database_status(&err), err.to_string())
    }
}

impl From<raged_data::FilterError> for ApiError {
    fn from(err: raged_data::FilterError) -> Self {
        Self::bad_request(err.to_string())
    }
}

impl From<raged_embeddings::EmbeddingError> for ApiError {
    fn from(err: raged_embeddings::EmbeddingError) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, err.to_string())
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Embedding(inner) => inner.into(),
            IngestError::Database(inner) => inner.into(),
            IngestError::InvalidRequest(message) => Self::bad_request(message),
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::EmptyQuery => {
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
            }
            QueryError::UnknownStrategy(_) => Self::bad_request(err.to_string()),
            QueryError::Filter(inner) => inner.into(),
            QueryError::Database(inner) => inner.into(),
            QueryError::Embedding(inner) => inner.into(),
            QueryError::NotFound(message) => Self::not_found(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_mismatch_is_422() {
        let err: ApiError = DatabaseError::VectorDimensionMismatch {
            got: 1536,
            expected: 768,
        }
        .into();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn chunk_id_invalid_is_400() {
        let err: ApiError = DatabaseError::ChunkIdInvalid {
            message: "bad".to_string(),
        }
        .into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn blob_unavailable_is_502() {
        let err: ApiError = DatabaseError::BlobStoreUnavailable {
            message: "down".to_string(),
        }
        .into();
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn empty_query_is_422() {
        let err: ApiError = QueryError::EmptyQuery.into();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn upstream_embedding_is_502() {
        let err: ApiError = raged_embeddings::EmbeddingError::Upstream {
            message: "down".to_string(),
        }
        .into();
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
    }
}
