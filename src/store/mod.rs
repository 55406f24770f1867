//! Key-value store abstraction shared by the rate limiter and the result cache
//!
//! Two implementations:
//!
//! - [`RedisStore`]: the shared, externally visible store. The connection is
//!   established lazily on first use and released by [`KeyValueStore::shutdown`].
//! - [`MemoryStore`]: an in-process store with the same semantics, selected
//!   with a `memory://` URL and used heavily in tests.
//!
//! Every operation returns a typed [`StoreError`] so callers can decide how to
//! degrade (fall back, or treat as a miss) instead of catching everything.

pub mod lua_scripts;
pub mod memory;
pub mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

use crate::config::StoreConfig;
use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Failure kinds reported by a store adapter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("unexpected store reply: {0}")]
    Protocol(String),
}

/// Sliding window state observed while recording an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    /// Events in the window before this one was considered
    pub count: u64,
    /// Score (unix millis) of the oldest event still in the window
    pub oldest_ms: Option<u64>,
    /// Whether this event was added to the window
    pub recorded: bool,
}

/// Operations the core needs from a key-value store
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a string value
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a string value that expires after `ttl`
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Atomically purge events older than `window`, count the rest and, if
    /// the count is below `limit`, record `member` at `now_ms`
    async fn record_event(
        &self,
        key: &str,
        now_ms: u64,
        window: Duration,
        limit: u32,
        member: &str,
    ) -> Result<WindowState, StoreError>;

    /// Check reachability
    async fn ping(&self) -> Result<(), StoreError>;

    /// Release any held connection; later calls reconnect lazily
    async fn shutdown(&self);

    /// Drop entries whose expiry has passed, returning how many were removed
    ///
    /// Stores that expire keys on their own keep the default.
    async fn purge_expired(&self) -> usize {
        0
    }

    /// Short name for logs and health output
    fn kind(&self) -> &'static str;
}

/// Build the store selected by the configured URL
pub fn connect(config: &StoreConfig) -> Arc<dyn KeyValueStore> {
    if config.is_memory() {
        info!("Using in-process memory store");
        Arc::new(MemoryStore::new())
    } else {
        info!("Using Redis store (connection established on first use)");
        Arc::new(RedisStore::new(
            config.url.expose_secret().clone(),
            config.timeout(),
        ))
    }
}

/// Start a background task that purges expired entries every `interval`
pub fn spawn_sweeper(store: Arc<dyn KeyValueStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = store.purge_expired().await;
            if removed > 0 {
                debug!(removed, store = store.kind(), "Purged expired store entries");
            }
        }
    })
}
