//! HTTP-facing error taxonomy.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed transfer id, empty upload payload. No state changed.
    #[error("{0}")]
    BadRequest(String),

    /// Recognized intent without a handler.
    #[error("{0} not handled")]
    NotHandled(&'static str),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::BadRequest(msg) => {
                tracing::debug!(reason = %msg, "Rejecting request");
                (StatusCode::BAD_REQUEST, msg).into_response()
            }
            AppError::NotHandled(intent) => (
                StatusCode::NOT_IMPLEMENTED,
                format!("{intent} not handled"),
            )
                .into_response(),
            AppError::Internal(err) => {
                tracing::error!(error = %format!("{err:#}"), "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
            }
        }
    }
}
