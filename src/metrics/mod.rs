use crate::error::{AppError, Result};
use axum::{
    body::Body,
    extract::State,
    http::{Response, StatusCode},
    response::IntoResponse,
};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Metrics service for collecting and exposing Prometheus metrics
#[derive(Clone)]
pub struct MetricsService {
    handle: Arc<PrometheusHandle>,
}

impl MetricsService {
    /// Install the global Prometheus recorder
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            AppError::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

        Self::register_metrics();

        info!("Metrics service initialized successfully");

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    fn register_metrics() {
        describe_counter!(
            "pincart_rate_limit_exceeded_total",
            "Total number of requests rejected due to rate limiting"
        );
        describe_counter!(
            "pincart_store_fallback_total",
            "Shared store failures absorbed by a fallback path"
        );
        describe_counter!(
            "pincart_cache_requests_total",
            "Result cache lookups by outcome"
        );
        describe_counter!(
            "pincart_fetch_total",
            "External fetches by source and outcome"
        );
        describe_histogram!(
            "pincart_fetch_duration_seconds",
            "External fetch latencies in seconds"
        );

        debug!("All metrics registered with descriptions");
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Metrics endpoint handler
pub async fn metrics_handler(State(service): State<MetricsService>) -> impl IntoResponse {
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(Body::from(service.render()))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Record a request rejected by the rate limiter
pub fn record_rate_limit_exceeded(route: &str) {
    let labels = [("route", route.to_string())];
    counter!("pincart_rate_limit_exceeded_total", &labels).increment(1);
}

/// Record a shared store failure that was absorbed by `component`
pub fn record_store_fallback(component: &'static str) {
    let labels = [("component", component.to_string())];
    counter!("pincart_store_fallback_total", &labels).increment(1);
}

/// Record a cache lookup
pub fn record_cache_lookup(prefix: &str, hit: bool) {
    let labels = [
        ("prefix", prefix.to_string()),
        ("result", if hit { "hit" } else { "miss" }.to_string()),
    ];
    counter!("pincart_cache_requests_total", &labels).increment(1);
}

/// Timer for an external fetch
pub struct FetchTimer {
    start: Instant,
    source: String,
}

impl FetchTimer {
    pub fn start(source: &str) -> Self {
        Self {
            start: Instant::now(),
            source: source.to_string(),
        }
    }

    /// Record the elapsed time with the fetch outcome
    pub fn record(self, outcome: &'static str) {
        let labels = [
            ("source", self.source.clone()),
            ("outcome", outcome.to_string()),
        ];
        counter!("pincart_fetch_total", &labels).increment(1);
        histogram!("pincart_fetch_duration_seconds", &labels)
            .record(self.start.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_dont_panic() {
        // These functions should not panic even if recorder isn't installed
        record_rate_limit_exceeded("/discover");
        record_store_fallback("cache");
        record_cache_lookup("discover", true);
        record_cache_lookup("match", false);
        FetchTimer::start("scraper").record("ok");
    }

    #[tokio::test]
    async fn test_metrics_service_creation() {
        // Installing the recorder can only succeed once per process
        match MetricsService::new() {
            Ok(service) => {
                record_cache_lookup("discover", true);
                assert!(service.render().contains("pincart_cache_requests_total"));
            }
            Err(e) => {
                assert!(e.to_string().contains("recorder"));
            }
        }
    }
}
