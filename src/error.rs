use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::conditioning::ConditioningError;
use crate::storage::StorageError;

/// Terminal failures of a generation call. Everything else is absorbed and logged.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Generator not initialized. Call initialize() first.")]
    NotInitialized,
    #[error("Failed to prepare control image from product image: {0}")]
    Preprocess(#[from] ConditioningError),
    #[error("No images were generated successfully (0/{requested})")]
    NoImagesGenerated { requested: usize },
    #[error("Could not create output directory: {0}")]
    OutputDirectory(#[source] StorageError),
    #[error("Generation task stopped unexpectedly: {0}")]
    Interrupted(String),
}

/// Errors surfaced by the HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Generation(GenerationError::NotInitialized) => {
                (StatusCode::SERVICE_UNAVAILABLE, "NOT_INITIALIZED")
            }
            // Worker crashes and a bad canvas size are server faults, not bad input.
            ApiError::Generation(GenerationError::Preprocess(
                ConditioningError::Interrupted(_) | ConditioningError::InvalidTargetSize(..),
            )) => (StatusCode::INTERNAL_SERVER_ERROR, "PREPROCESS_FAILURE"),
            ApiError::Generation(GenerationError::Preprocess(_)) => {
                (StatusCode::BAD_REQUEST, "PREPROCESS_ERROR")
            }
            ApiError::Generation(GenerationError::NoImagesGenerated { .. }) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "NO_IMAGES_GENERATED")
            }
            ApiError::Generation(GenerationError::OutputDirectory(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "OUTPUT_DIRECTORY_ERROR")
            }
            ApiError::Generation(GenerationError::Interrupted(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "GENERATION_INTERRUPTED")
            }
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Generation request failed");
        }
        (status, Json(json!({ "error": self.to_string(), "code": code }))).into_response()
    }
}
