pub mod cache;
pub mod config;
pub mod cors;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod observability;
pub mod rate_limit;
pub mod sources;
pub mod store;

use crate::config::AppConfig;
use crate::cors::cors_layer;
use crate::error::{AppError, Result};
use crate::handlers::AppState;
use crate::metrics::{metrics_handler, MetricsService};
use crate::observability::request_id_middleware;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use axum::{
    body::Body,
    extract::Request,
    middleware,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Assemble the application router
///
/// Layer order, outermost first: tracing, request ID, CORS, rate limiting.
/// CORS sits outside the limiter so rejections stay readable by the frontend.
pub fn build_app(
    state: AppState,
    limiter: Arc<RateLimiter>,
    metrics: Option<MetricsService>,
    frontend_url: &str,
) -> Result<Router> {
    let mut app = handlers::routes(state);

    if let Some(metrics) = metrics {
        app = app.merge(
            Router::new()
                .route("/metrics", get(metrics_handler))
                .with_state(metrics),
        );
    }

    let app = app
        .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
        .layer(cors_layer(frontend_url)?)
        .layer(middleware::from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
                tracing::info_span!(
                    "request",
                    method = %req.method(),
                    uri = %req.uri(),
                    request_id = tracing::field::Empty,
                )
            }),
        );

    Ok(app)
}

/// Run the server until Ctrl-C or SIGTERM
///
/// Background sweepers for the fallback limiter and, with `memory://`, the
/// store are aborted before the store connection is released.
pub async fn run(config: AppConfig) -> Result<()> {
    config.validate()?;

    info!("Starting PinCart");

    let store = store::connect(&config.store);
    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit.clone(),
        Some(store.clone()),
    ));
    let sweeper = limiter.spawn_fallback_sweeper();
    // Redis expires keys itself; the in-process store needs a sweep
    let store_sweeper = config
        .store
        .is_memory()
        .then(|| store::spawn_sweeper(store.clone(), config.rate_limit.sweep_interval()));

    let metrics = match MetricsService::new() {
        Ok(metrics) => Some(metrics),
        Err(e) => {
            warn!(error = %e, "Metrics disabled");
            None
        }
    };

    let state = AppState::from_config(&config, store.clone())
        .map_err(|e| AppError::Config(e.to_string()))?;
    let app = build_app(state, limiter, metrics, &config.server.frontend_url)?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        address = %addr,
        store = store.kind(),
        requests_per_minute = config.rate_limit.requests_per_minute,
        "PinCart ready to accept connections"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| AppError::Internal(format!("Server error: {}", e)))?;

    sweeper.abort();
    if let Some(store_sweeper) = store_sweeper {
        store_sweeper.abort();
    }
    store.shutdown().await;
    info!("PinCart stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
