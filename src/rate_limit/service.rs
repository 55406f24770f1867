use super::local::FallbackWindows;
use super::types::{
    to_store_key, unix_millis, Decision, DecisionSource, RateLimitSettings,
};
use crate::metrics;
use crate::store::{KeyValueStore, StoreError};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Rate limiter that prefers the shared store and falls back to process memory
///
/// The shared path keeps a full sorted event log per identity so only events
/// that actually left the window are purged. When the shared store errors for
/// any reason, the same check runs against [`FallbackWindows`], which is only
/// accurate for this process.
pub struct RateLimiter {
    settings: RateLimitSettings,
    shared: Option<Arc<dyn KeyValueStore>>,
    fallback: Arc<FallbackWindows>,
}

impl RateLimiter {
    /// Create a rate limiter backed by `shared`, if any
    pub fn new(settings: RateLimitSettings, shared: Option<Arc<dyn KeyValueStore>>) -> Self {
        info!(
            enabled = settings.enabled,
            requests_per_minute = settings.requests_per_minute,
            shared = shared.as_ref().map(|s| s.kind()).unwrap_or("none"),
            "Initializing rate limiter"
        );

        Self {
            fallback: Arc::new(FallbackWindows::new(&settings)),
            settings,
            shared,
        }
    }

    /// Create a rate limiter that only uses process memory
    pub fn local_only(settings: RateLimitSettings) -> Self {
        Self::new(settings, None)
    }

    /// Check a request for `path` from `identity`
    ///
    /// Exempt paths and a disabled limiter never touch a store.
    pub async fn check(&self, path: &str, identity: &str, now: SystemTime) -> Decision {
        if self.settings.is_exempt(path) {
            return Decision::bypass(self.settings.requests_per_minute, DecisionSource::Exempt);
        }
        self.admit(identity, now).await
    }

    /// Check and record a request from `identity` at `now`
    pub async fn admit(&self, identity: &str, now: SystemTime) -> Decision {
        let limit = self.settings.requests_per_minute;
        if !self.settings.enabled {
            return Decision::bypass(limit, DecisionSource::Disabled);
        }

        let now_ms = unix_millis(now);

        if let Some(shared) = &self.shared {
            match self.admit_shared(shared.as_ref(), identity, now_ms).await {
                Ok(decision) => return decision,
                Err(e) => {
                    warn!(
                        error = %e,
                        identity = %identity,
                        "Shared rate limit check failed, using local fallback"
                    );
                    metrics::record_store_fallback("rate_limit");
                }
            }
        }

        self.fallback.admit(identity, now_ms)
    }

    async fn admit_shared(
        &self,
        store: &dyn KeyValueStore,
        identity: &str,
        now_ms: u64,
    ) -> Result<Decision, StoreError> {
        let limit = self.settings.requests_per_minute;
        let window = self.settings.window();
        let member = format!("{}:{}", now_ms, uuid::Uuid::new_v4());

        let state = store
            .record_event(&to_store_key(identity), now_ms, window, limit, &member)
            .await?;

        debug!(
            identity = %identity,
            count = state.count,
            recorded = state.recorded,
            "Sliding window check"
        );

        if state.recorded {
            return Ok(Decision::allowed(limit, state.count, DecisionSource::Shared));
        }

        let window_ms = window.as_millis() as u64;
        let retry_after = state
            .oldest_ms
            .map(|oldest| (oldest + window_ms).saturating_sub(now_ms).div_ceil(1000))
            .unwrap_or(self.settings.window_secs);

        warn!(identity = %identity, "Rate limit exceeded (sliding window)");
        Ok(Decision::denied(limit, retry_after, DecisionSource::Shared))
    }

    /// Start the periodic sweep of the fallback map
    pub fn spawn_fallback_sweeper(&self) -> JoinHandle<()> {
        self.fallback.spawn_sweeper(self.settings.sweep_interval())
    }

    pub fn settings(&self) -> &RateLimitSettings {
        &self.settings
    }

    /// Check if a shared store is configured
    pub fn has_shared_store(&self) -> bool {
        self.shared.is_some()
    }

    /// Get the fallback limiter (for testing/monitoring)
    pub fn fallback(&self) -> &Arc<FallbackWindows> {
        &self.fallback
    }
}
