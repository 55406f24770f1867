use super::AppState;
use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::warn;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub store: &'static str,
}

/// `GET /health` - process liveness plus shared store reachability
///
/// Always answers 200 so load balancers keep routing while the store is
/// down; the `store` field reports the ping result.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let store = match state.store.ping().await {
        Ok(()) => "up",
        Err(e) => {
            warn!(store = state.store.kind(), error = %e, "Health check: store unreachable");
            "down"
        }
    };

    Json(HealthResponse {
        status: "ok",
        store,
    })
}

/// `GET /openapi.json` - minimal description of the public routes
pub async fn openapi_handler() -> Json<Value> {
    Json(json!({
        "openapi": "3.0.3",
        "info": {
            "title": "PinCart",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "paths": {
            "/discover": {
                "get": {
                    "summary": "Discover trending Pinterest products for a keyword",
                    "parameters": [{
                        "name": "keyword",
                        "in": "query",
                        "required": true,
                        "schema": {"type": "string", "maxLength": 80}
                    }],
                    "responses": {
                        "200": {"description": "Ranked products"},
                        "400": {"description": "Missing or invalid keyword"},
                        "404": {"description": "No trending products found"},
                        "429": {"description": "Rate limit exceeded"}
                    }
                }
            },
            "/match-product": {
                "post": {
                    "summary": "Find supplier matches for a product",
                    "requestBody": {
                        "required": true,
                        "content": {"application/json": {"schema": {
                            "type": "object",
                            "required": ["product_title"],
                            "properties": {
                                "product_title": {"type": "string"},
                                "image_url": {"type": "string"}
                            }
                        }}}
                    },
                    "responses": {
                        "200": {"description": "Up to three supplier matches"},
                        "400": {"description": "Missing product title"},
                        "429": {"description": "Rate limit exceeded"}
                    }
                }
            },
            "/health": {
                "get": {
                    "summary": "Process health and shared store reachability",
                    "responses": {"200": {"description": "Health report"}}
                }
            }
        }
    }))
}
