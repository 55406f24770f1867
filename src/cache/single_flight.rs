use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use tokio::sync::oneshot;
use tracing::debug;

/// Per-key call coalescing
///
/// The first caller for a key runs its future; callers arriving while it is
/// in flight wait for that result instead of starting their own. If the
/// leading call is dropped before finishing, waiters run their own future.
pub struct SingleFlight<V> {
    calls: DashMap<String, Vec<oneshot::Sender<V>>>,
}

/// How a call obtained its value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    /// Ran the future
    Leader,
    /// Received the leader's result
    Follower,
}

impl<V: Clone + Send> SingleFlight<V> {
    pub fn new() -> Self {
        Self {
            calls: DashMap::new(),
        }
    }

    /// Run `f` for `key`, or wait for the call already in flight
    pub async fn run<F, Fut>(&self, key: &str, f: F) -> (V, CallRole)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let waiter = match self.calls.entry(key.to_string()) {
            Entry::Occupied(mut call) => {
                let (tx, rx) = oneshot::channel();
                call.get_mut().push(tx);
                Some(rx)
            }
            Entry::Vacant(slot) => {
                slot.insert(Vec::new());
                None
            }
        };

        if let Some(rx) = waiter {
            match rx.await {
                Ok(value) => return (value, CallRole::Follower),
                Err(_) => {
                    debug!(key = %key, "In-flight call was dropped, running our own");
                    return (f().await, CallRole::Leader);
                }
            }
        }

        let guard = CallGuard {
            calls: &self.calls,
            key,
            finished: false,
        };
        let value = f().await;
        guard.finish(&value);
        (value, CallRole::Leader)
    }

    /// Number of keys with a call in flight
    pub fn in_flight(&self) -> usize {
        self.calls.len()
    }
}

impl<V: Clone + Send> Default for SingleFlight<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes the in-flight entry even if the leading future is dropped
struct CallGuard<'a, V> {
    calls: &'a DashMap<String, Vec<oneshot::Sender<V>>>,
    key: &'a str,
    finished: bool,
}

impl<V: Clone> CallGuard<'_, V> {
    fn finish(mut self, value: &V) {
        if let Some((_, waiters)) = self.calls.remove(self.key) {
            if !waiters.is_empty() {
                debug!(key = %self.key, waiters = waiters.len(), "Sharing result with waiters");
            }
            for tx in waiters {
                let _ = tx.send(value.clone());
            }
        }
        self.finished = true;
    }
}

impl<V> Drop for CallGuard<'_, V> {
    fn drop(&mut self) {
        if !self.finished {
            self.calls.remove(self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_single_caller_leads() {
        let flight = SingleFlight::new();
        let (value, role) = flight.run("k", || async { 7 }).await;
        assert_eq!(value, 7);
        assert_eq!(role, CallRole::Leader);
        assert_eq!(flight.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_call() {
        let flight = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let flight = flight.clone();
                let calls = calls.clone();
                tokio::spawn(async move {
                    flight
                        .run("home decor", || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            "pins".to_string()
                        })
                        .await
                })
            })
            .collect();

        let mut followers = 0;
        for handle in handles {
            let (value, role) = handle.await.unwrap();
            assert_eq!(value, "pins");
            if role == CallRole::Follower {
                followers += 1;
            }
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(followers, 9);
        assert_eq!(flight.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_different_keys_run_independently() {
        let flight = SingleFlight::new();
        let ((a, ra), (b, rb)) = tokio::join!(
            flight.run("a", || async { 1 }),
            flight.run("b", || async { 2 })
        );
        assert_eq!((a, b), (1, 2));
        assert_eq!((ra, rb), (CallRole::Leader, CallRole::Leader));
    }

    #[tokio::test]
    async fn test_cancelled_leader_releases_waiters() {
        let flight = Arc::new(SingleFlight::new());

        let leader = {
            let flight = flight.clone();
            tokio::spawn(async move {
                flight
                    .run("k", || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        0
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let follower = {
            let flight = flight.clone();
            tokio::spawn(async move { flight.run("k", || async { 42 }).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        leader.abort();

        let (value, role) = follower.await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(role, CallRole::Leader);
        assert_eq!(flight.in_flight(), 0);
    }
}
