//! HTTP error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domain_notifications::NotificationError;
use serde::Serialize;

/// Error body returned by every endpoint.
///
/// ```json
/// { "error": "NOT_FOUND", "message": "Activity not found" }
/// ```
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Domain(NotificationError),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<NotificationError> for ApiError {
    fn from(err: NotificationError) -> Self {
        ApiError::Domain(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::Domain(err) => match err {
                NotificationError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
                NotificationError::Conflict(msg) | NotificationError::InvalidRequest(msg) => {
                    (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg)
                }
                NotificationError::InvalidEmail(email) => (
                    StatusCode::BAD_REQUEST,
                    "INVALID_EMAIL",
                    format!("Invalid email address: {}", email),
                ),
                other => {
                    tracing::error!(error = %other, "Request failed");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_SERVER_ERROR",
                        "An internal error occurred".to_string(),
                    )
                }
            },
        };

        let body = ErrorResponse {
            error: error.to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}
