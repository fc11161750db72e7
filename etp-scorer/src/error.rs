//! HTTP error mapping for etp-scorer
//!
//! Every failure reaches the client as
//! `{"error": {"code": "...", "message": "...", "stage": "..."}}`
//! with `stage` present only for pipeline failures.

use crate::pipeline::{ExtractionError, PipelineError};
use crate::resources::ResourceError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request body or parameter (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Resource configuration or connection failure (400)
    #[error(transparent)]
    Resources(#[from] ResourceError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::Resources(_) => StatusCode::BAD_REQUEST,
            ApiError::Pipeline(e) => match e {
                PipelineError::NotReady | PipelineError::InvalidBatchSize(_) => {
                    StatusCode::BAD_REQUEST
                }
                PipelineError::Extraction(ExtractionError::InsufficientBatch { .. })
                | PipelineError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> String {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST".to_string(),
            ApiError::Resources(ResourceError::Configuration(_)) => "INVALID_RESOURCE_CONFIG".to_string(),
            ApiError::Resources(ResourceError::Connection { .. }) => "RESOURCE_CONNECTION_FAILED".to_string(),
            ApiError::Pipeline(e) => e.kind().to_ascii_uppercase(),
            ApiError::Internal(_) => "INTERNAL_ERROR".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let message = self.to_string();

        let body = match &self {
            ApiError::Pipeline(e) => match e.stage() {
                Some(stage) => json!({
                    "error": {
                        "code": code,
                        "message": message,
                        "stage": stage,
                    }
                }),
                None => json!({ "error": { "code": code, "message": message } }),
            },
            _ => json!({ "error": { "code": code, "message": message } }),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
