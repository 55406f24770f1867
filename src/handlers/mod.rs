//! HTTP handlers for the product endpoints
//!
//! Handlers check the [`ResultCache`] before calling an external
//! [`Fetcher`]; fetch failures reach the client as "no results", never as a
//! server error.

pub mod discover;
pub mod health;
pub mod matching;

pub use discover::{discover_handler, rank_pins, TrendingPin};
pub use health::{health_handler, openapi_handler};
pub use matching::{fallback_estimates, match_product_handler, SupplierMatch};

use crate::cache::ResultCache;
use crate::config::AppConfig;
use crate::sources::{EmptyFetcher, FetchError, Fetcher, HttpFetcher};
use crate::store::KeyValueStore;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Shared state for the product handlers
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<ResultCache>,
    pub store: Arc<dyn KeyValueStore>,
    pub pins: Arc<dyn Fetcher<TrendingPin>>,
    pub suppliers: Arc<dyn Fetcher<SupplierMatch>>,
    pub discover_ttl: Duration,
}

impl AppState {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        cache: Arc<ResultCache>,
        pins: Arc<dyn Fetcher<TrendingPin>>,
        suppliers: Arc<dyn Fetcher<SupplierMatch>>,
        discover_ttl: Duration,
    ) -> Self {
        Self {
            cache,
            store,
            pins,
            suppliers,
            discover_ttl,
        }
    }

    /// Build the state from configuration, using HTTP fetchers for the
    /// configured collaborators
    pub fn from_config(
        config: &AppConfig,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self, FetchError> {
        let cache = Arc::new(ResultCache::new(store.clone(), &config.cache));
        let timeout = config.cache.fetch_timeout();

        let pins: Arc<dyn Fetcher<TrendingPin>> = match &config.sources.scraper_url {
            Some(url) => Arc::new(HttpFetcher::new("scraper", url, timeout)?),
            None => {
                info!("No scraper configured, discovery returns no results");
                Arc::new(EmptyFetcher)
            }
        };
        let suppliers: Arc<dyn Fetcher<SupplierMatch>> = match &config.sources.supplier_url {
            Some(url) => Arc::new(HttpFetcher::new("supplier", url, timeout)?),
            None => {
                info!("No supplier search configured, matching uses estimates");
                Arc::new(EmptyFetcher)
            }
        };

        Ok(Self::new(
            store,
            cache,
            pins,
            suppliers,
            config.cache.discover_ttl(),
        ))
    }
}

/// Routes served by this process
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/discover", get(discover_handler))
        .route("/match-product", post(match_product_handler))
        .route("/health", get(health_handler))
        .route("/openapi.json", get(openapi_handler))
        .with_state(state)
}
