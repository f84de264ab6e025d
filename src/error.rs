use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};
use std::fmt::Display;
use thiserror::Error;

use crate::config::Environment;

/// Error surface of every route. Renders as `{"error", "message"}`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    /// Also used for rows the caller does not own.
    #[error("{0}")]
    NotFound(String),

    /// Reserved for the edge rate limiter's taxonomy.
    #[error("{0}")]
    TooManyRequests(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::NotFound(msg)
            | ApiError::TooManyRequests(msg)
            | ApiError::Internal(msg) => msg,
        }
    }

    /// Canonical reason phrase of the status, e.g. "Bad Request".
    pub fn reason(&self) -> &'static str {
        self.status_code().canonical_reason().unwrap_or("Error")
    }

    /// Body sent to clients
    pub fn to_json(&self) -> Value {
        json!({
            "error": self.reason(),
            "message": self.message(),
        })
    }
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        ApiError::TooManyRequests(message.into())
    }

    /// Log the underlying failure and build a 500. The detail is only shown
    /// to clients in development; other environments get `public` alone.
    pub fn internal(environment: Environment, public: &str, detail: impl Display) -> Self {
        tracing::error!(error = %detail, "{}", public);
        match environment {
            Environment::Development => ApiError::Internal(format!("{}: {}", public, detail)),
            _ => ApiError::Internal(public.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status_code(), Json(self.to_json())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_error_and_message() {
        let err = ApiError::bad_request("\"items\" must be an array");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            err.to_json(),
            json!({"error": "Bad Request", "message": "\"items\" must be an array"})
        );
    }

    #[test]
    fn internal_detail_only_in_development() {
        let dev = ApiError::internal(Environment::Development, "Failed to sync data", "relation missing");
        assert_eq!(dev.message(), "Failed to sync data: relation missing");

        let prod = ApiError::internal(Environment::Production, "Failed to sync data", "relation missing");
        assert_eq!(prod.message(), "Failed to sync data");
        assert_eq!(prod.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
