use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type for handler-level operations
pub type Result<T> = std::result::Result<T, AppError>;

/// Message returned to clients that exceeded their quota
pub const RATE_LIMIT_MESSAGE: &str = "Rate limit exceeded. Please try again later.";

/// Errors surfaced to HTTP clients
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{}", RATE_LIMIT_MESSAGE)]
    RateLimited { limit: u32, retry_after: u64 },

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        let mut headers = HeaderMap::new();
        if let AppError::RateLimited { limit, retry_after } = &self {
            headers.insert("Retry-After", HeaderValue::from(*retry_after));
            headers.insert("X-RateLimit-Limit", HeaderValue::from(*limit));
            headers.insert("X-RateLimit-Remaining", HeaderValue::from_static("0"));
        }

        (status, headers, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            AppError::Validation("test".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::NotFound("test".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::RateLimited {
                limit: 30,
                retry_after: 12
            }
            .status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn test_error_display() {
        let err = AppError::Validation("Keyword is required".to_string());
        assert_eq!(err.to_string(), "Keyword is required");

        let err = AppError::RateLimited {
            limit: 3,
            retry_after: 60,
        };
        assert_eq!(err.to_string(), RATE_LIMIT_MESSAGE);
    }

    #[test]
    fn test_rate_limited_response_headers() {
        let response = AppError::RateLimited {
            limit: 3,
            retry_after: 42,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let headers = response.headers();
        assert_eq!(headers.get("Retry-After").unwrap(), "42");
        assert_eq!(headers.get("X-RateLimit-Limit").unwrap(), "3");
        assert_eq!(headers.get("X-RateLimit-Remaining").unwrap(), "0");
    }

    #[test]
    fn test_other_errors_have_no_rate_limit_headers() {
        let response = AppError::Internal("boom".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get("Retry-After").is_none());
    }
}
