//! Rate limiting module
//!
//! Per-identity sliding window limiter with two tiers:
//!
//! - **Shared**: a sorted event log per identity in the shared store, updated
//!   atomically so every server instance sees one counter per client
//! - **Fallback**: an in-process window counter used whenever the shared store
//!   errors or times out
//!
//! # Features
//!
//! - Exempt paths (health probe, API docs) bypass the limiter before any store access
//! - Rate limit headers in responses (`X-RateLimit-Limit`, `X-RateLimit-Remaining`)
//! - Distinct 429 rejection with `Retry-After`
//!
//! # Example
//!
//! ```rust,no_run
//! use pincart::rate_limit::{RateLimiter, RateLimitSettings};
//! use std::time::SystemTime;
//!
//! #[tokio::main]
//! async fn main() {
//!     let limiter = RateLimiter::local_only(RateLimitSettings::with_limit(30));
//!     let decision = limiter.admit("203.0.113.7", SystemTime::now()).await;
//!     assert!(decision.allowed);
//! }
//! ```

pub mod local;
pub mod middleware;
pub mod service;
pub mod types;

// Re-export commonly used types
pub use local::FallbackWindows;
pub use middleware::{add_rate_limit_headers, client_identity, rate_limit_middleware};
pub use service::RateLimiter;
pub use types::{Decision, DecisionSource, RateLimitSettings};
