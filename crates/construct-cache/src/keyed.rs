//! Single-flight keyed waiter cache.
//!
//! Used everywhere the kernel fetches something identified by a key that
//! multiple concurrent evaluations might ask for at once — a missing
//! `prev_event` during backfill, a server's signing keys, a remote room's
//! `/state` response: the first caller becomes responsible for computing
//! the answer, every other caller for the same key queues behind it and is
//! called back with the same result, in the order they arrived.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::sieve::SieveCache;

type Callback<V, E> = Box<dyn FnOnce(Result<V, Arc<E>>) + Send>;

struct State<K, V, E> {
    cache: SieveCache<K, V>,
    waiters: HashMap<K, Vec<Callback<V, E>>>,
}

/// A bounded, single-flight cache keyed by `K`.
pub struct KeyedCache<K, V, E> {
    state: Mutex<State<K, V, E>>,
}

impl<K, V, E> KeyedCache<K, V, E>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
    E: Send + Sync + 'static,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                cache: SieveCache::new(capacity),
                waiters: HashMap::new(),
            }),
        }
    }

    /// Registers `cb` for `key`'s answer.
    ///
    /// - If `key` is cached, `cb` runs inline with `Ok(value)` and this
    ///   returns `false`.
    /// - If another caller is already computing `key`'s answer, `cb` is
    ///   queued and this returns `false`.
    /// - Otherwise `cb` is queued as the first waiter and this returns
    ///   `true`: the caller is now responsible for calling [`Self::put`]
    ///   or [`Self::put_err`] for `key`.
    pub async fn get(&self, key: K, cb: impl FnOnce(Result<V, Arc<E>>) + Send + 'static) -> bool {
        let mut state = self.state.lock().await;
        if let Some(v) = state.cache.get(&key) {
            let v = v.clone();
            drop(state);
            cb(Ok(v));
            return false;
        }
        match state.waiters.get_mut(&key) {
            Some(queue) => {
                queue.push(Box::new(cb));
                false
            }
            None => {
                state.waiters.insert(key, vec![Box::new(cb)]);
                true
            }
        }
    }

    /// Resolves every waiter for `key`, in FIFO arrival order, with
    /// `Ok(value)`, and caches `value` for future [`Self::get`] calls.
    pub async fn put(&self, key: K, value: V) {
        let mut state = self.state.lock().await;
        state.cache.insert(key.clone(), value.clone());
        let queue = state.waiters.remove(&key).unwrap_or_default();
        drop(state);
        for cb in queue {
            cb(Ok(value.clone()));
        }
    }

    /// Resolves every waiter for `key`, in FIFO arrival order, with
    /// `Err(error)`. Nothing is cached: the next `get` for `key` retries.
    pub async fn put_err(&self, key: K, error: E) {
        let error = Arc::new(error);
        let mut state = self.state.lock().await;
        let queue = state.waiters.remove(&key).unwrap_or_default();
        drop(state);
        for cb in queue {
            cb(Err(error.clone()));
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.cache.len()
    }

    /// Future-based convenience over `get`/`put`/`put_err`: awaits the
    /// single-flight answer for `key`, running `compute` only if this call
    /// becomes the leader.
    pub async fn get_or_compute<Fut>(
        &self,
        key: K,
        compute: impl FnOnce() -> Fut,
    ) -> Result<V, Arc<E>>
    where
        Fut: std::future::Future<Output = Result<V, E>>,
    {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let is_leader = self
            .get(key.clone(), move |res| {
                let _ = tx.send(res);
            })
            .await;

        if is_leader {
            match compute().await {
                Ok(value) => {
                    self.put(key, value.clone()).await;
                    Ok(value)
                }
                Err(error) => {
                    self.put_err(key, error).await;
                    rx.await.expect("put_err always fires every registered waiter, including the leader's")
                }
            }
        } else {
            rx.await.expect("put/put_err always fires every registered waiter before the sender drops")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn leader_computes_followers_wait() {
        let cache: Arc<KeyedCache<&str, i32, String>> = Arc::new(KeyedCache::new(8));
        let computed = Arc::new(AtomicUsize::new(0));
        let results = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let mut leaders = 0;
        for _ in 0..5 {
            let cache = cache.clone();
            let results = results.clone();
            let is_leader = cache
                .get("room-state", move |res| {
                    let results = results.clone();
                    tokio::spawn(async move {
                        results.lock().await.push(res.unwrap());
                    });
                })
                .await;
            if is_leader {
                leaders += 1;
            }
        }
        assert_eq!(leaders, 1);

        computed.fetch_add(1, Ordering::SeqCst);
        cache.put("room-state", 42).await;
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert_eq!(results.lock().await.len(), 5);
        assert!(results.lock().await.iter().all(|v| *v == 42));
    }

    #[tokio::test]
    async fn cached_value_short_circuits_to_inline_callback() {
        let cache: KeyedCache<&str, i32, String> = KeyedCache::new(8);
        cache.put("k", 7).await;
        let seen = Arc::new(std::sync::Mutex::new(None));
        let seen_clone = seen.clone();
        let is_leader = cache
            .get("k", move |res| {
                *seen_clone.lock().unwrap() = Some(res.unwrap());
            })
            .await;
        assert!(!is_leader);
        assert_eq!(*seen.lock().unwrap(), Some(7));
    }

    #[tokio::test]
    async fn errors_are_not_cached_and_propagate_to_waiters() {
        let cache: KeyedCache<&str, i32, String> = KeyedCache::new(8);
        let is_leader = cache.get("k", |_| {}).await;
        assert!(is_leader);
        cache.put_err("k", "fetch failed".to_owned()).await;
        assert_eq!(cache.len().await, 0);

        // nothing was cached, so this key is a fresh miss: a new leader.
        let is_leader_again = cache.get("k", |_| {}).await;
        assert!(is_leader_again);
    }

    #[tokio::test]
    async fn get_or_compute_runs_compute_exactly_once_for_concurrent_callers() {
        let cache: Arc<KeyedCache<&str, i32, String>> = Arc::new(KeyedCache::new(8));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("room-state", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                        Ok::<_, String>(42)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn get_or_compute_propagates_the_error_without_caching() {
        let cache: KeyedCache<&str, i32, String> = KeyedCache::new(8);
        let result = cache
            .get_or_compute("k", || async { Err::<i32, _>("boom".to_owned()) })
            .await;
        match result {
            Err(err) => assert_eq!(*err, "boom"),
            Ok(_) => panic!("expected an error"),
        }
        assert_eq!(cache.len().await, 0);
    }
}
