use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use oc_cache::CacheError;
use oc_common::CodecError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;
use utoipa::ToSchema;

#[derive(Error, Debug)]
pub enum QueryError {
    /// The request itself is malformed; never retried
    #[error("Invalid query: {0}")]
    Input(String),

    #[error("Cache store error: {0}")]
    Store(#[from] CacheError),

    #[error("Stored tags could not be decoded: {0}")]
    Codec(#[from] CodecError),
}

impl QueryError {
    pub fn input(message: impl Into<String>) -> Self {
        QueryError::Input(message.into())
    }
}

/// Error response body
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        match self {
            QueryError::Input(message) => (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: "invalid query".to_string(),
                    message: Some(message),
                }),
            )
                .into_response(),
            other => {
                // Details stay in the log, the caller gets an opaque failure
                error!(error = %other, "Query failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse {
                        error: "internal error".to_string(),
                        message: None,
                    }),
                )
                    .into_response()
            }
        }
    }
}
