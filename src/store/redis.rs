use super::lua_scripts::SLIDING_WINDOW_SCRIPT;
use super::{KeyValueStore, StoreError, WindowState};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, ErrorKind, RedisError, Script};
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// After a failed connect, calls fail fast for this long instead of redialing
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Redis-backed shared store
///
/// Holds at most one live connection handle. The handle is created on first
/// use, shared by all concurrent callers (the connection manager multiplexes),
/// dropped by [`KeyValueStore::shutdown`] and recreated lazily afterwards.
pub struct RedisStore {
    url: String,
    timeout: Duration,
    connection: RwLock<Option<ConnectionManager>>,
    last_connect_failure: Mutex<Option<Instant>>,
    sliding_window: Script,
}

impl RedisStore {
    /// Create a store; nothing is dialed until the first operation
    pub fn new(url: String, timeout: Duration) -> Self {
        Self {
            url,
            timeout,
            connection: RwLock::new(None),
            last_connect_failure: Mutex::new(None),
            sliding_window: Script::new(SLIDING_WINDOW_SCRIPT),
        }
    }

    /// Whether a connection handle is currently held
    pub async fn is_connected(&self) -> bool {
        self.connection.read().await.is_some()
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        if let Some(conn) = self.connection.read().await.as_ref() {
            return Ok(conn.clone());
        }

        if self.in_backoff() {
            return Err(StoreError::Unavailable(
                "recent connection attempt failed".to_string(),
            ));
        }

        let mut guard = self.connection.write().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        debug!("Establishing Redis connection");
        let client = redis::Client::open(self.url.as_str()).map_err(map_redis_error)?;

        let result = match tokio::time::timeout(self.timeout, ConnectionManager::new(client)).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(map_redis_error(e)),
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        };

        match result {
            Ok(conn) => {
                info!("Redis connection established");
                self.set_connect_failure(None);
                *guard = Some(conn.clone());
                Ok(conn)
            }
            Err(e) => {
                warn!(error = %e, "Redis connection failed");
                self.set_connect_failure(Some(Instant::now()));
                Err(e)
            }
        }
    }

    fn in_backoff(&self) -> bool {
        match self.last_connect_failure.lock() {
            Ok(guard) => guard.map_or(false, |at| at.elapsed() < RECONNECT_BACKOFF),
            Err(_) => false,
        }
    }

    fn set_connect_failure(&self, at: Option<Instant>) {
        if let Ok(mut guard) = self.last_connect_failure.lock() {
            *guard = at;
        }
    }

    /// Bound a Redis call by the configured timeout
    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, RedisError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(map_redis_error(e)),
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }
}

fn map_redis_error(e: RedisError) -> StoreError {
    match e.kind() {
        ErrorKind::TypeError => StoreError::Protocol(e.to_string()),
        _ => StoreError::Unavailable(e.to_string()),
    }
}

fn millis(duration: Duration) -> u64 {
    (duration.as_millis() as u64).max(1)
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        self.bounded(conn.get::<_, Option<String>>(key)).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        self.bounded(conn.pset_ex::<_, _, ()>(key, value, millis(ttl)))
            .await
    }

    async fn record_event(
        &self,
        key: &str,
        now_ms: u64,
        window: Duration,
        limit: u32,
        member: &str,
    ) -> Result<WindowState, StoreError> {
        let mut conn = self.connection().await?;
        let mut invocation = self.sliding_window.prepare_invoke();
        invocation
            .key(key)
            .arg(now_ms)
            .arg(millis(window))
            .arg(limit)
            .arg(member);

        let reply = self
            .bounded(invocation.invoke_async::<_, Vec<i64>>(&mut conn))
            .await?;

        match reply.as_slice() {
            [recorded, count, oldest] => Ok(WindowState {
                recorded: *recorded == 1,
                count: (*count).max(0) as u64,
                oldest_ms: (*oldest >= 0).then_some(*oldest as u64),
            }),
            other => Err(StoreError::Protocol(format!(
                "sliding window script returned {} values",
                other.len()
            ))),
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        self.bounded(redis::cmd("PING").query_async::<_, ()>(&mut conn))
            .await
    }

    async fn shutdown(&self) {
        if self.connection.write().await.take().is_some() {
            info!("Released Redis connection");
        }
        self.set_connect_failure(None);
    }

    fn kind(&self) -> &'static str {
        "redis"
    }
}
