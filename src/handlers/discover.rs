use super::AppState;
use crate::error::{AppError, Result};
use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};

/// Cache namespace for discovery results
pub const CACHE_PREFIX: &str = "discover";

pub const MAX_KEYWORD_LEN: usize = 80;

/// Pins considered for ranking
const RANKED_POOL: usize = 30;

/// Pins returned to the client
const TOP_PINS: usize = 20;

pub const NO_RESULTS_MESSAGE: &str = "No trending products found for this keyword. Try a broader term like 'home decor' or 'pet accessories'.";

/// A pin returned by the scraper, scored once ranked
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendingPin {
    #[serde(default)]
    pub image: String,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default)]
    pub pin_url: String,
    #[serde(default)]
    pub saves_text: String,
    #[serde(default)]
    pub demand_score: u32,
}

fn default_title() -> String {
    "Untitled Pin".to_string()
}

#[derive(Debug, Deserialize)]
pub struct DiscoverParams {
    pub keyword: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DiscoverResponse {
    pub keyword: String,
    pub count: usize,
    pub products: Vec<TrendingPin>,
}

/// Deduplicate pins by image, score by position and keep the top results
///
/// Earlier pins score higher: `max(0, 100 - 3 * position)`. Pins without an
/// image are dropped.
pub fn rank_pins(pins: Vec<TrendingPin>) -> Vec<TrendingPin> {
    let mut seen = HashSet::new();

    let mut ranked: Vec<TrendingPin> = pins
        .into_iter()
        .filter(|pin| !pin.image.is_empty() && seen.insert(pin.image.clone()))
        .take(RANKED_POOL)
        .enumerate()
        .map(|(position, mut pin)| {
            pin.demand_score = 100u32.saturating_sub(3 * position as u32);
            pin
        })
        .collect();

    // Stable sort keeps scraper order between equal scores
    ranked.sort_by(|a, b| b.demand_score.cmp(&a.demand_score));
    ranked.truncate(TOP_PINS);
    ranked
}

fn validate_keyword(raw: Option<&str>) -> Result<String> {
    let keyword = raw.map(str::trim).unwrap_or_default();

    if keyword.is_empty() {
        return Err(AppError::Validation("Keyword is required".to_string()));
    }
    if keyword.chars().count() > MAX_KEYWORD_LEN {
        return Err(AppError::Validation(format!(
            "Keyword must be at most {} characters",
            MAX_KEYWORD_LEN
        )));
    }

    Ok(keyword.to_string())
}

/// `GET /discover?keyword=` - trending pins for a niche keyword
pub async fn discover_handler(
    State(state): State<AppState>,
    Query(params): Query<DiscoverParams>,
) -> Result<Json<DiscoverResponse>> {
    let keyword = validate_keyword(params.keyword.as_deref())?;

    let products = state
        .cache
        .get_or_fetch(
            CACHE_PREFIX,
            &keyword.to_lowercase(),
            Some(state.discover_ttl),
            || async { state.pins.fetch(&keyword).await.map(rank_pins) },
        )
        .await
        .unwrap_or_else(|e| {
            warn!(keyword = %keyword, error = %e, "Trend discovery failed");
            Vec::new()
        });

    if products.is_empty() {
        return Err(AppError::NotFound(NO_RESULTS_MESSAGE.to_string()));
    }

    info!(keyword = %keyword, count = products.len(), "Discovered trending products");

    Ok(Json(DiscoverResponse {
        keyword,
        count: products.len(),
        products,
    }))
}
