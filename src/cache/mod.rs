//! Result cache for expensive external fetches
//!
//! Values are stored as JSON in the shared [`KeyValueStore`] under keys
//! derived by [`cache_key`]. The cache is best effort: store failures and
//! undecodable values read as a miss, and failed writes are dropped.

pub mod key;
pub mod single_flight;

pub use key::cache_key;
pub use single_flight::{CallRole, SingleFlight};

use crate::config::CacheConfig;
use crate::metrics::{record_cache_lookup, record_store_fallback};
use crate::sources::FetchError;
use crate::store::KeyValueStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

type SharedFetch = Result<serde_json::Value, FetchError>;

/// Keyed, TTL'd cache of fetch results
pub struct ResultCache {
    store: Arc<dyn KeyValueStore>,
    default_ttl: Duration,
    fetch_timeout: Duration,
    in_flight: Option<SingleFlight<SharedFetch>>,
}

impl ResultCache {
    pub fn new(store: Arc<dyn KeyValueStore>, config: &CacheConfig) -> Self {
        info!(
            store = store.kind(),
            default_ttl_secs = config.default_ttl_secs,
            single_flight = config.single_flight,
            "Initialized result cache"
        );

        Self {
            store,
            default_ttl: config.default_ttl(),
            fetch_timeout: config.fetch_timeout(),
            in_flight: config.single_flight.then(SingleFlight::new),
        }
    }

    /// Look up a cached value; store errors and decode failures are a miss
    pub async fn get<T: DeserializeOwned>(&self, prefix: &str, identifier: &str) -> Option<T> {
        let key = cache_key(prefix, identifier);

        let raw = match self.store.get(&key).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                record_store_fallback("cache");
                None
            }
        };

        let value = raw.and_then(|raw| match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %key, error = %e, "Cached value could not be decoded, treating as miss");
                None
            }
        });

        record_cache_lookup(prefix, value.is_some());
        debug!(key = %key, hit = value.is_some(), "Cache lookup");
        value
    }

    /// Store a value; `ttl` of `None` uses the configured default
    ///
    /// Failures are logged and dropped.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        prefix: &str,
        identifier: &str,
        value: &T,
        ttl: Option<Duration>,
    ) {
        let key = cache_key(prefix, identifier);
        let ttl = ttl.unwrap_or(self.default_ttl);

        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %key, error = %e, "Value could not be serialized, not caching");
                return;
            }
        };

        match self.store.set_ex(&key, &raw, ttl).await {
            Ok(()) => debug!(key = %key, ttl_secs = ttl.as_secs(), "Cached result"),
            Err(e) => {
                warn!(key = %key, error = %e, "Cache write failed, continuing without caching");
                record_store_fallback("cache");
            }
        }
    }

    /// Return the cached records for `(prefix, identifier)`, or run `fetch`
    ///
    /// The fetch is bounded by the configured fetch timeout. Non-empty results
    /// are written back; failures and empty results are returned but never
    /// cached. With single-flight enabled, concurrent misses for the same key
    /// share one fetch, and the leader looks the key up once more before
    /// fetching.
    pub async fn get_or_fetch<T, F, Fut>(
        &self,
        prefix: &str,
        identifier: &str,
        ttl: Option<Duration>,
        fetch: F,
    ) -> Result<Vec<T>, FetchError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<T>, FetchError>>,
    {
        if let Some(records) = self.get::<Vec<T>>(prefix, identifier).await {
            return Ok(records);
        }

        let Some(in_flight) = &self.in_flight else {
            return self.fetch_and_store(prefix, identifier, ttl, fetch).await;
        };

        let key = cache_key(prefix, identifier);
        let (shared, role) = in_flight
            .run(&key, || async move {
                // A leader that finished after our first lookup may have filled the key
                let records = match self.get::<Vec<T>>(prefix, identifier).await {
                    Some(records) => records,
                    None => self.fetch_and_store(prefix, identifier, ttl, fetch).await?,
                };
                serde_json::to_value(&records).map_err(|e| FetchError::Decode(e.to_string()))
            })
            .await;

        if role == CallRole::Follower {
            debug!(key = %key, "Reused in-flight fetch");
        }

        serde_json::from_value(shared?).map_err(|e| FetchError::Decode(e.to_string()))
    }

    async fn fetch_and_store<T, F, Fut>(
        &self,
        prefix: &str,
        identifier: &str,
        ttl: Option<Duration>,
        fetch: F,
    ) -> Result<Vec<T>, FetchError>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<T>, FetchError>>,
    {
        let records = match tokio::time::timeout(self.fetch_timeout, fetch()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(prefix, timeout = ?self.fetch_timeout, "External fetch timed out");
                return Err(FetchError::Timeout(self.fetch_timeout));
            }
        };

        if records.is_empty() {
            debug!(prefix, "Fetch returned no results, not caching");
        } else {
            self.set(prefix, identifier, &records, ttl).await;
        }

        Ok(records)
    }

    /// Default TTL applied when callers pass `None`
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }
}
