//! Request-level error type.
//!
//! Handlers return `Result<T, AppError>`. Client errors carry their message to the
//! caller; internal failures are logged in full and answered with a short message.

use axum::http::StatusCode;
use axum::response::{ IntoResponse, Response };
use axum::Json;
use log::error;
use thiserror::Error;

use crate::extract::ExtractionError;
use crate::history::StoreError;
use crate::llm::ModelError;
use crate::models::api::ErrorResponse;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("No session")]
    Unauthorized,

    #[error("Too many requests")]
    RateLimited,

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Persistence(#[from] StoreError),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::Extraction(_) |
            AppError::Model(_) |
            AppError::Persistence(_) |
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Extraction(e) => format!("Could not read the uploaded file: {}", e),
            AppError::Model(_) => "The language model request failed".to_string(),
            AppError::Persistence(_) => "Could not save to the database".to_string(),
            AppError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        let body = ErrorResponse { error: self.client_message() };
        (status, Json(body)).into_response()
    }
}
