use super::{KeyValueStore, StoreError, WindowState};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    /// member -> score
    Window(BTreeMap<String, u64>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-process store with per-entry expiry
///
/// Mutations for a key go through the map's entry lock, so each operation is
/// atomic with respect to concurrent callers on the same key. Expired entries
/// are dropped when touched and by [`KeyValueStore::purge_expired`], which
/// [`spawn_sweeper`](super::spawn_sweeper) runs periodically.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live and not-yet-purged entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let value = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => match &entry.value {
                Value::Text(text) => Some(text.clone()),
                Value::Window(_) => {
                    return Err(StoreError::Protocol(format!(
                        "key {} holds a sorted set",
                        key
                    )))
                }
            },
            _ => None,
        };

        if value.is_none() {
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn record_event(
        &self,
        key: &str,
        now_ms: u64,
        window: Duration,
        limit: u32,
        member: &str,
    ) -> Result<WindowState, StoreError> {
        let now = Instant::now();
        let window_ms = window.as_millis() as u64;
        let cutoff = now_ms.saturating_sub(window_ms);

        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Window(BTreeMap::new()),
            expires_at: now + window * 2,
        });

        if entry.is_expired(now) {
            entry.value = Value::Window(BTreeMap::new());
        }

        let events = match &mut entry.value {
            Value::Window(events) => events,
            _ => {
                return Err(StoreError::Protocol(format!(
                    "key {} does not hold a sorted set",
                    key
                )))
            }
        };

        events.retain(|_, score| *score > cutoff);
        let count = events.len() as u64;
        let recorded = count < limit as u64;
        if recorded {
            events.insert(member.to_string(), now_ms);
        }
        let oldest_ms = events.values().min().copied();

        entry.expires_at = now + window * 2;

        Ok(WindowState {
            count,
            oldest_ms,
            recorded,
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    async fn shutdown(&self) {}

    fn kind(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_missing_key() {
        let store = MemoryStore::new();
        assert_eq!(store.get("pincart:missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let store = MemoryStore::new();
        store
            .set_ex("pincart:k", "v", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get("pincart:k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let store = MemoryStore::new();
        store
            .set_ex("pincart:short", "v", Duration::from_millis(20))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(store.get("pincart:short").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_record_event_enforces_limit() {
        let store = MemoryStore::new();
        let window = Duration::from_secs(60);
        let now = 1_000_000u64;

        for i in 0..3u64 {
            let state = store
                .record_event("rl", now + i, window, 3, &format!("m{}", i))
                .await
                .unwrap();
            assert!(state.recorded);
            assert_eq!(state.count, i);
        }

        let state = store.record_event("rl", now + 5, window, 3, "m3").await.unwrap();
        assert!(!state.recorded);
        assert_eq!(state.count, 3);
        assert_eq!(state.oldest_ms, Some(now));
    }

    #[tokio::test]
    async fn test_record_event_slides() {
        let store = MemoryStore::new();
        let window = Duration::from_secs(60);
        let now = 1_000_000u64;

        store.record_event("rl", now, window, 2, "a").await.unwrap();
        store.record_event("rl", now + 30_000, window, 2, "b").await.unwrap();
        let state = store.record_event("rl", now + 40_000, window, 2, "c").await.unwrap();
        assert!(!state.recorded);

        // Exactly one window after the first event, it no longer counts
        let state = store.record_event("rl", now + 60_000, window, 2, "d").await.unwrap();
        assert!(state.recorded);
        assert_eq!(state.count, 1);
        assert_eq!(state.oldest_ms, Some(now + 30_000));
    }

    #[tokio::test]
    async fn test_type_mismatch_is_protocol_error() {
        let store = MemoryStore::new();
        store
            .record_event("rl", 1, Duration::from_secs(60), 5, "a")
            .await
            .unwrap();
        assert!(matches!(
            store.get("rl").await,
            Err(StoreError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = MemoryStore::new();
        store
            .set_ex("a", "1", Duration::from_millis(10))
            .await
            .unwrap();
        store.set_ex("b", "2", Duration::from_secs(60)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(store.purge_expired().await, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_purge_reclaims_rate_limit_windows() {
        let store = MemoryStore::new();
        let window = Duration::from_millis(10);

        for i in 0..50u64 {
            store
                .record_event(&format!("pincart:rl:10.0.0.{}", i), i, window, 5, "m")
                .await
                .unwrap();
        }
        assert_eq!(store.len(), 50);

        // Window keys live for twice the window and are never read back
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(store.purge_expired().await, 50);
        assert!(store.is_empty());
    }
}
