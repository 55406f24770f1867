use super::service::RateLimiter;
use super::types::Decision;
use crate::error::AppError;
use crate::metrics;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;

/// Identity used when neither a forwarded header nor a peer address is known
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Resolve the client identity: first `X-Forwarded-For` entry, then the peer
/// address
pub fn client_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| UNKNOWN_IDENTITY.to_string())
}

/// Axum middleware function for rate limiting
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0);
    let identity = client_identity(request.headers(), peer);

    let decision = limiter.check(&path, &identity, SystemTime::now()).await;

    if !decision.allowed {
        metrics::record_rate_limit_exceeded(&path);
        return AppError::RateLimited {
            limit: decision.limit,
            retry_after: decision.retry_after.unwrap_or(limiter.settings().window_secs),
        }
        .into_response();
    }

    debug!(
        identity = %identity,
        remaining = decision.remaining,
        source = ?decision.source,
        "Rate limit check passed"
    );

    let response = next.run(request).await;
    add_rate_limit_headers(response, &decision)
}

/// Add rate limit headers to successful responses
pub fn add_rate_limit_headers(mut response: Response, decision: &Decision) -> Response {
    let headers = response.headers_mut();
    headers.insert("X-RateLimit-Limit", HeaderValue::from(decision.limit));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(decision.remaining));
    response
}
