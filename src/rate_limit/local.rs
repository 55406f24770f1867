use super::types::{unix_millis, Decision, DecisionSource, RateLimitSettings};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Window start and number of admitted requests
#[derive(Debug, Clone, Copy)]
struct FixedWindow {
    start_ms: u64,
    count: u32,
}

/// In-process rate limiter used while the shared store is unreachable
///
/// Keeps one coarse window per identity rather than a full event log. The map
/// is bounded: expired windows are swept periodically and on demand, and when
/// the map is still full the oldest tenth of the windows is evicted in one
/// pass, so the scan runs once per batch of new identities rather than once
/// per request.
///
/// The bound is soft. The size check and the insert are not one atomic step,
/// so concurrent new identities can overshoot `max_identities` by at most the
/// number of requests racing past the check.
pub struct FallbackWindows {
    windows: DashMap<String, FixedWindow>,
    limit: u32,
    window_ms: u64,
    max_identities: usize,
}

impl FallbackWindows {
    /// Create a new fallback limiter
    pub fn new(settings: &RateLimitSettings) -> Self {
        Self {
            windows: DashMap::new(),
            limit: settings.requests_per_minute,
            window_ms: settings.window().as_millis() as u64,
            max_identities: settings.fallback_max_identities.max(1),
        }
    }

    /// Check and record a request for `identity` at `now_ms`
    pub fn admit(&self, identity: &str, now_ms: u64) -> Decision {
        if !self.windows.contains_key(identity) && self.windows.len() >= self.max_identities {
            self.make_room(now_ms);
        }

        // The entry guard holds the shard lock for the whole read-modify-write
        let mut window = self
            .windows
            .entry(identity.to_string())
            .or_insert(FixedWindow {
                start_ms: now_ms,
                count: 0,
            });

        if now_ms.saturating_sub(window.start_ms) >= self.window_ms {
            *window = FixedWindow {
                start_ms: now_ms,
                count: 0,
            };
        }

        if window.count >= self.limit {
            let ends_at = window.start_ms + self.window_ms;
            let retry_after = ends_at.saturating_sub(now_ms).div_ceil(1000);
            warn!(identity = %identity, "Rate limit exceeded (fallback window)");
            return Decision::denied(self.limit, retry_after, DecisionSource::Fallback);
        }

        let prior = window.count;
        window.count += 1;
        Decision::allowed(self.limit, prior as u64, DecisionSource::Fallback)
    }

    /// Drop windows that have fully elapsed, returning how many were removed
    pub fn sweep(&self, now_ms: u64) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, window| now_ms.saturating_sub(window.start_ms) < self.window_ms);
        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            debug!(removed, "Swept expired fallback windows");
        }
        removed
    }

    fn make_room(&self, now_ms: u64) {
        if self.sweep(now_ms) > 0 && self.windows.len() < self.max_identities {
            return;
        }

        let mut by_age: Vec<(u64, String)> = self
            .windows
            .iter()
            .map(|entry| (entry.value().start_ms, entry.key().clone()))
            .collect();
        let batch = eviction_batch(self.max_identities).min(by_age.len());
        if batch == 0 {
            return;
        }
        if batch < by_age.len() {
            by_age.select_nth_unstable(batch - 1);
        }

        for (_, identity) in by_age.into_iter().take(batch) {
            self.windows.remove(&identity);
        }
        debug!(evicted = batch, "Evicted oldest fallback windows");
    }

    /// Start a background task that sweeps expired windows every `interval`
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let windows = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                windows.sweep(unix_millis(SystemTime::now()));
            }
        })
    }

    /// Get the number of tracked identities (for testing/monitoring)
    pub fn tracked_identities(&self) -> usize {
        self.windows.len()
    }
}

/// Windows evicted at once when the map is full
fn eviction_batch(max_identities: usize) -> usize {
    (max_identities / 10).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(limit: u32, max_identities: usize) -> RateLimitSettings {
        RateLimitSettings {
            fallback_max_identities: max_identities,
            ..RateLimitSettings::with_limit(limit)
        }
    }

    #[test]
    fn test_fallback_allows_within_limit() {
        let windows = FallbackWindows::new(&settings(10, 100));
        let now = 1_000_000;

        for i in 0..10 {
            let result = windows.admit("192.168.1.1", now + i);
            assert!(result.allowed, "Request {} should be allowed", i);
            assert_eq!(result.remaining, 9 - i as u32);
            assert_eq!(result.source, DecisionSource::Fallback);
        }
    }

    #[test]
    fn test_fallback_denies_over_limit() {
        let windows = FallbackWindows::new(&settings(3, 100));
        let now = 1_000_000;

        for _ in 0..3 {
            assert!(windows.admit("192.168.1.2", now).allowed);
        }

        let result = windows.admit("192.168.1.2", now + 10_000);
        assert!(!result.allowed);
        assert_eq!(result.remaining, 0);
        assert_eq!(result.retry_after, Some(50));
    }

    #[test]
    fn test_fallback_different_identities() {
        let windows = FallbackWindows::new(&settings(2, 100));
        let now = 1_000_000;

        for _ in 0..2 {
            assert!(windows.admit("a", now).allowed);
        }
        assert!(!windows.admit("a", now).allowed);
        assert!(windows.admit("b", now).allowed);
        assert_eq!(windows.tracked_identities(), 2);
    }

    #[test]
    fn test_fallback_window_resets() {
        let windows = FallbackWindows::new(&settings(2, 100));
        let now = 1_000_000;

        assert!(windows.admit("a", now).allowed);
        assert!(windows.admit("a", now).allowed);
        assert!(!windows.admit("a", now + 59_999).allowed);
        assert!(windows.admit("a", now + 60_000).allowed);
    }

    #[test]
    fn test_sweep_removes_expired() {
        let windows = FallbackWindows::new(&settings(5, 100));
        windows.admit("old", 1_000);
        windows.admit("new", 50_000);

        assert_eq!(windows.sweep(61_000), 1);
        assert_eq!(windows.tracked_identities(), 1);
    }

    #[test]
    fn test_bounded_growth() {
        let windows = FallbackWindows::new(&settings(5, 3));
        let now = 1_000_000;

        for i in 0..10u64 {
            windows.admit(&format!("10.0.0.{}", i), now + i);
        }

        assert!(windows.tracked_identities() <= 3);
        // The most recent identity is still tracked
        let result = windows.admit("10.0.0.9", now + 20);
        assert_eq!(result.remaining, 3);
    }

    #[test]
    fn test_full_map_evicts_oldest_batch() {
        let windows = FallbackWindows::new(&settings(5, 20));
        let now = 1_000_000;

        for i in 0..20u64 {
            windows.admit(&format!("10.0.0.{}", i), now + i);
        }
        assert_eq!(windows.tracked_identities(), 20);

        // One arrival frees room for a whole batch
        windows.admit("10.0.1.0", now + 100);
        assert_eq!(windows.tracked_identities(), 19);
        assert!(!windows.windows.contains_key("10.0.0.0"));
        assert!(!windows.windows.contains_key("10.0.0.1"));
        assert!(windows.windows.contains_key("10.0.0.2"));

        windows.admit("10.0.1.1", now + 101);
        assert_eq!(windows.tracked_identities(), 20);
    }

    #[test]
    fn test_eviction_batch_size() {
        assert_eq!(eviction_batch(1), 1);
        assert_eq!(eviction_batch(20), 2);
        assert_eq!(eviction_batch(10_000), 1_000);
    }

    #[tokio::test]
    async fn test_sweeper_task_runs() {
        let windows = Arc::new(FallbackWindows::new(&settings(5, 100)));
        windows.admit("stale", 0);

        let handle = windows.spawn_sweeper(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        assert_eq!(windows.tracked_identities(), 0);
    }
}
