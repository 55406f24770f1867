use crate::error::{AppError, Result};
use crate::observability::REQUEST_ID_HEADER;
use axum::http::{HeaderName, HeaderValue, Method};
use std::time::Duration;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tracing::debug;

/// Response headers the frontend is allowed to read
const EXPOSED_HEADERS: [&str; 4] = [
    "x-ratelimit-limit",
    "x-ratelimit-remaining",
    "retry-after",
    REQUEST_ID_HEADER,
];

const MAX_AGE_SECS: u64 = 600;

/// Build the CORS layer admitting the configured frontend origin with
/// credentials
///
/// Requests from any other origin get no `access-control-allow-origin`.
pub fn cors_layer(frontend_url: &str) -> Result<CorsLayer> {
    let origin = HeaderValue::from_str(frontend_url.trim_end_matches('/')).map_err(|e| {
        AppError::Config(format!("Invalid CORS origin {}: {}", frontend_url, e))
    })?;

    // A credentialed response cannot name the wildcard origin
    if origin == "*" {
        return Err(AppError::Config(
            "CORS origin must be a concrete URL when credentials are allowed".to_string(),
        ));
    }

    let exposed: Vec<HeaderName> = EXPOSED_HEADERS
        .into_iter()
        .map(HeaderName::from_static)
        .collect();

    debug!(origin = %frontend_url, "CORS: Configured allowed origin");

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list([origin]))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(AllowHeaders::mirror_request())
        .expose_headers(exposed)
        .allow_credentials(true)
        .max_age(Duration::from_secs(MAX_AGE_SECS)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, routing::get, Router};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route("/discover", get(|| async { "ok" }))
            .layer(cors_layer("http://localhost:3000").unwrap())
    }

    #[test]
    fn test_invalid_origin() {
        assert!(cors_layer("http://bad\norigin").is_err());
        assert!(cors_layer("*").is_err());
    }

    #[tokio::test]
    async fn test_allowed_origin_with_credentials() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/discover")
                    .header("origin", "http://localhost:3000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let headers = response.headers();
        assert_eq!(
            headers.get("access-control-allow-origin").unwrap(),
            "http://localhost:3000"
        );
        assert_eq!(
            headers.get("access-control-allow-credentials").unwrap(),
            "true"
        );
    }

    #[tokio::test]
    async fn test_other_origin_not_allowed() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/discover")
                    .header("origin", "https://evil.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response
            .headers()
            .get("access-control-allow-origin")
            .is_none());
    }

    #[tokio::test]
    async fn test_trailing_slash_in_config_is_ignored() {
        let app = Router::new()
            .route("/discover", get(|| async { "ok" }))
            .layer(cors_layer("http://localhost:3000/").unwrap());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/discover")
                    .header("origin", "http://localhost:3000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "http://localhost:3000"
        );
    }

    #[tokio::test]
    async fn test_preflight() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/discover")
                    .header("origin", "http://localhost:3000")
                    .header("access-control-request-method", "POST")
                    .header("access-control-request-headers", "content-type")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response.status().is_success());
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-headers")
                .unwrap(),
            "content-type"
        );
    }
}
