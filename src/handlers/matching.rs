use super::AppState;
use crate::error::{AppError, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

/// Cache namespace for supplier search results
pub const CACHE_PREFIX: &str = "match";

/// Retail price multiple applied to unit cost
pub const MARKUP: f64 = 2.8;

/// Supplier matches returned to the client
const TOP_MATCHES: usize = 3;

pub const DISCLAIMER: &str = "Margin estimates assume 2.8x markup. Actual margins vary after fees, ads, and shipping costs.";

const FALLBACK_SOURCES: [&str; 2] = ["AliExpress", "CJdropshipping"];
const FALLBACK_REGIONS: [&str; 5] = ["US", "UK", "AU", "CA", "EU"];

#[derive(Debug, Deserialize)]
pub struct MatchRequest {
    #[serde(default)]
    pub product_title: String,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// A supplier offer for a product, with margin estimates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplierMatch {
    pub source: String,
    pub supplier_name: String,
    pub product_title: String,
    pub unit_cost: f64,
    pub suggested_retail: f64,
    pub estimated_margin_pct: f64,
    #[serde(default)]
    pub shipping_regions: Vec<String>,
    #[serde(default)]
    pub product_url: String,
    #[serde(default)]
    pub image: String,
}

#[derive(Debug, Serialize)]
pub struct MatchResponse {
    pub product_title: String,
    pub match_count: usize,
    pub suppliers: Vec<SupplierMatch>,
    pub disclaimer: &'static str,
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Suggested retail price and margin percentage for a unit cost
pub fn price_with_markup(unit_cost: f64) -> (f64, f64) {
    let retail = round_to(unit_cost * MARKUP, 2);
    let margin = round_to((retail - unit_cost) / retail * 100.0, 1);
    (retail, margin)
}

fn keyword_seed(keyword: &str) -> u32 {
    let digest = Sha256::digest(keyword.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

fn search_url(source: &str, keyword: &str) -> String {
    let query = keyword.replace(' ', "+");
    match source {
        "AliExpress" => format!("https://www.aliexpress.com/wholesale?SearchText={}", query),
        _ => format!(
            "https://cjdropshipping.com/search-product.html?keyword={}",
            query
        ),
    }
}

/// Deterministic supplier estimates used when no live results are available
///
/// Prices vary by keyword but are stable for the same keyword.
pub fn fallback_estimates(keyword: &str) -> Vec<SupplierMatch> {
    let base_cost = 3.0 + f64::from(keyword_seed(keyword) % 25);

    FALLBACK_SOURCES
        .iter()
        .enumerate()
        .map(|(i, source)| {
            let unit_cost = round_to(base_cost + i as f64 * 1.5, 2);
            let (suggested_retail, estimated_margin_pct) = price_with_markup(unit_cost);
            SupplierMatch {
                source: source.to_string(),
                supplier_name: format!("{} Top Seller", source),
                product_title: keyword.to_string(),
                unit_cost,
                suggested_retail,
                estimated_margin_pct,
                shipping_regions: FALLBACK_REGIONS.iter().map(|r| r.to_string()).collect(),
                product_url: search_url(source, keyword),
                image: String::new(),
            }
        })
        .collect()
}

/// Cheapest offers first, at most three
pub fn select_matches(mut matches: Vec<SupplierMatch>) -> Vec<SupplierMatch> {
    matches.sort_by(|a, b| a.unit_cost.total_cmp(&b.unit_cost));
    matches.truncate(TOP_MATCHES);
    matches
}

/// `POST /match-product` - supplier offers for a product title
pub async fn match_product_handler(
    State(state): State<AppState>,
    payload: std::result::Result<Json<MatchRequest>, JsonRejection>,
) -> Result<Json<MatchResponse>> {
    let Json(request) = payload.map_err(|e| AppError::Validation(e.body_text()))?;

    let keyword = request.product_title.trim().to_string();
    if keyword.is_empty() {
        return Err(AppError::Validation("Product title is required".to_string()));
    }
    if let Some(image_url) = &request.image_url {
        debug!(image_url = %image_url, "Image hint supplied with match request");
    }

    let live = state
        .cache
        .get_or_fetch(CACHE_PREFIX, &keyword.to_lowercase(), None, || async {
            state.suppliers.fetch(&keyword).await
        })
        .await
        .unwrap_or_else(|e| {
            warn!(keyword = %keyword, error = %e, "Supplier search failed");
            Vec::new()
        });

    let candidates = if live.is_empty() {
        debug!(keyword = %keyword, "No live supplier results, using estimates");
        fallback_estimates(&keyword)
    } else {
        live
    };

    let suppliers = select_matches(candidates);
    info!(keyword = %keyword, matches = suppliers.len(), "Matched suppliers");

    Ok(Json(MatchResponse {
        product_title: keyword,
        match_count: suppliers.len(),
        suppliers,
        disclaimer: DISCLAIMER,
    }))
}
