//! Error handling for the countgate server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Stream source unreachable or read loop gave up
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Stream or job concurrency cap hit
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Operation needs an active stream
    #[error("Not active: {0}")]
    NotActive(String),

    /// Operation needs a queued/processing job
    #[error("Not running: {0}")]
    NotRunning(String),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// External inference failure
    #[error("Detector error: {0}")]
    Detector(String),

    /// Validation error (zones, lines, request bodies)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Conflict (duplicate active job id, stream already bound)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// SQLx database error
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl Error {
    /// HTTP status and machine-readable code for this error
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Error::ConnectionFailed(_) => (StatusCode::BAD_GATEWAY, "CONNECTION_FAILED"),
            Error::ResourceExhausted(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "RESOURCE_EXHAUSTED")
            }
            Error::NotActive(_) => (StatusCode::CONFLICT, "NOT_ACTIVE"),
            Error::NotRunning(_) => (StatusCode::CONFLICT, "NOT_RUNNING"),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Error::Detector(_) => (StatusCode::BAD_GATEWAY, "DETECTOR_ERROR"),
            Error::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Error::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Error::Database(_) | Error::Sqlx(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR")
            }
            Error::Serialization(_) => (StatusCode::INTERNAL_SERVER_ERROR, "SERIALIZATION_ERROR"),
            Error::Http(_) => (StatusCode::BAD_GATEWAY, "HTTP_ERROR"),
            Error::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
            Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code) = self.status_and_code();
        let message = match &self {
            Error::ConnectionFailed(msg)
            | Error::ResourceExhausted(msg)
            | Error::NotActive(msg)
            | Error::NotRunning(msg)
            | Error::NotFound(msg)
            | Error::Detector(msg)
            | Error::Validation(msg)
            | Error::Conflict(msg)
            | Error::Database(msg)
            | Error::Internal(msg) => msg.clone(),
            other => other.to_string(),
        };

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                error_code = %error_code,
                message = %message,
                "Request error"
            );
        } else {
            tracing::warn!(
                status = %status,
                error_code = %error_code,
                message = %message,
                "Request rejected"
            );
        }

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_status_codes() {
        assert_eq!(
            Error::ResourceExhausted("cap".into()).status_and_code().0,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            Error::NotFound("job".into()).status_and_code(),
            (StatusCode::NOT_FOUND, "NOT_FOUND")
        );
        assert_eq!(
            Error::NotRunning("job".into()).status_and_code().1,
            "NOT_RUNNING"
        );
        assert_eq!(
            Error::Validation("polygon".into()).status_and_code().0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::ConnectionFailed("probe".into()).status_and_code().0,
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_into_response_status() {
        let resp = Error::Conflict("job-1 already processing".into()).into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }
}
