use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Namespace for rate limit keys in the shared store
pub const KEY_PREFIX: &str = "pincart:rl:";

/// Rate limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Maximum number of requests per identity per window
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    /// Length of the sliding window in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Paths that bypass the limiter entirely
    #[serde(default = "default_exempt_paths")]
    pub exempt_paths: Vec<String>,
    /// Upper bound on identities tracked by the in-process fallback
    #[serde(default = "default_fallback_max_identities")]
    pub fallback_max_identities: usize,
    /// How often expired fallback windows are swept
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_requests_per_minute() -> u32 {
    30
}

fn default_window_secs() -> u64 {
    60
}

fn default_exempt_paths() -> Vec<String> {
    vec![
        "/health".to_string(),
        "/docs".to_string(),
        "/openapi.json".to_string(),
        "/redoc".to_string(),
    ]
}

fn default_fallback_max_identities() -> usize {
    10_000
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            requests_per_minute: default_requests_per_minute(),
            window_secs: default_window_secs(),
            exempt_paths: default_exempt_paths(),
            fallback_max_identities: default_fallback_max_identities(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl RateLimitSettings {
    /// Settings with the given per-minute limit and defaults elsewhere
    pub fn with_limit(requests_per_minute: u32) -> Self {
        Self {
            requests_per_minute,
            ..Default::default()
        }
    }

    /// Get the window as a Duration
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Whether the path bypasses rate limiting
    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths.iter().any(|p| p == path)
    }
}

/// Which tier produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionSource {
    /// Shared store sliding window
    Shared,
    /// In-process fallback window
    Fallback,
    /// Rate limiting is turned off
    Disabled,
    /// The path is exempt
    Exempt,
}

/// Outcome of an admission check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request is allowed
    pub allowed: bool,
    /// Remaining requests in the current window
    pub remaining: u32,
    /// Total limit
    pub limit: u32,
    /// Seconds until a slot frees up (for 429 responses)
    pub retry_after: Option<u64>,
    /// Tier that made the decision
    pub source: DecisionSource,
}

impl Decision {
    /// Create an allowed result after `count` prior events in the window
    pub fn allowed(limit: u32, count: u64, source: DecisionSource) -> Self {
        let remaining = (limit as u64).saturating_sub(count + 1) as u32;
        Self {
            allowed: true,
            remaining,
            limit,
            retry_after: None,
            source,
        }
    }

    /// Create a denied result
    pub fn denied(limit: u32, retry_after: u64, source: DecisionSource) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            limit,
            retry_after: Some(retry_after.max(1)),
            source,
        }
    }

    /// Allowed without consulting any store
    pub fn bypass(limit: u32, source: DecisionSource) -> Self {
        Self {
            allowed: true,
            remaining: limit,
            limit,
            retry_after: None,
            source,
        }
    }
}

/// Milliseconds since the unix epoch; clocks before the epoch read as zero
pub fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Convert the identity to its shared store key
pub fn to_store_key(identity: &str) -> String {
    format!("{}{}", KEY_PREFIX, identity)
}
