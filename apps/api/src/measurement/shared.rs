//! Process-wide handle around [`MeasurementCache`].
//!
//! `get_or_calculate` de-duplicates concurrent misses: callers racing on the same
//! missing key queue on a per-key lock, the first one computes and stores, the
//! rest read the stored value. A background task purges expired entries on a
//! fixed interval.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::measurement::cache::{CacheSnapshot, CacheStats, MeasurementCache, WarmupEntry};

pub struct SharedMeasurementCache<V> {
    inner: Arc<Mutex<MeasurementCache<V>>>,
    in_flight: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
    cleanup_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl<V> Clone for SharedMeasurementCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            in_flight: Arc::clone(&self.in_flight),
            cleanup_task: Arc::clone(&self.cleanup_task),
        }
    }
}

impl<V> SharedMeasurementCache<V>
where
    V: Clone + Send + 'static,
{
    pub fn new(cache: MeasurementCache<V>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(cache)),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            cleanup_task: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        self.inner.lock().await.get(key)
    }

    pub async fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        self.inner.lock().await.set(key, value, ttl);
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.inner.lock().await.delete(key)
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Returns the cached value or computes, stores and returns it.
    ///
    /// Exactly one counted lookup happens per call. A failed computation stores
    /// nothing and the error is returned to this caller only; queued callers
    /// then retry the computation themselves.
    pub async fn get_or_calculate<F, Fut, E>(&self, key: &str, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let started = Instant::now();
        let key_lock = {
            let mut in_flight = self.in_flight.lock().await;
            Arc::clone(in_flight.entry(key.to_string()).or_default())
        };

        let result = {
            let _guard = key_lock.lock().await;
            let cached = {
                let mut cache = self.inner.lock().await;
                let cached = cache.get(key);
                if cached.is_some() {
                    cache.record_saved(started.elapsed());
                }
                cached
            };

            match cached {
                Some(value) => {
                    debug!(key, "cache hit");
                    Ok(value)
                }
                None => {
                    debug!(key, "cache miss; calculating");
                    match compute().await {
                        Ok(value) => {
                            self.inner.lock().await.set(key, value.clone(), None);
                            debug!(
                                key,
                                elapsed_ms = started.elapsed().as_millis() as u64,
                                "calculated and cached"
                            );
                            Ok(value)
                        }
                        Err(e) => Err(e),
                    }
                }
            }
        };

        // The map and this call hold the only references when nobody is queued.
        let mut in_flight = self.in_flight.lock().await;
        if in_flight
            .get(key)
            .is_some_and(|lock| Arc::strong_count(lock) == 2)
        {
            in_flight.remove(key);
        }
        drop(in_flight);

        result
    }

    pub async fn stats(&self) -> CacheStats {
        self.inner.lock().await.stats()
    }

    pub async fn cleanup(&self) -> usize {
        self.inner.lock().await.cleanup()
    }

    pub async fn evict_lru(&self, count: usize) -> Vec<String> {
        self.inner.lock().await.evict_lru(count)
    }

    pub async fn clear(&self) {
        self.inner.lock().await.clear();
    }

    pub async fn warmup(&self, entries: Vec<WarmupEntry<V>>) -> usize {
        self.inner.lock().await.warmup(entries)
    }

    /// Spawns the periodic purge task on the configured `cleanup_interval`.
    /// No-op when already running.
    pub async fn start_auto_cleanup(&self) {
        let mut slot = self.cleanup_task.lock().await;
        if slot.is_some() {
            return;
        }
        let interval = self.inner.lock().await.config().cleanup_interval;
        let inner = Arc::clone(&self.inner);
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = inner.lock().await.cleanup();
                if purged > 0 {
                    debug!(purged, "scheduled cache cleanup");
                }
            }
        }));
    }

    pub async fn stop_auto_cleanup(&self) {
        if let Some(handle) = self.cleanup_task.lock().await.take() {
            handle.abort();
        }
    }
}

impl<V> SharedMeasurementCache<V>
where
    V: Clone + Send + Serialize + 'static,
{
    pub async fn export(&self) -> CacheSnapshot {
        self.inner.lock().await.export()
    }
}

impl<V> SharedMeasurementCache<V>
where
    V: Clone + Send + DeserializeOwned + 'static,
{
    pub async fn import(&self, snapshot: CacheSnapshot) -> usize {
        self.inner.lock().await.import(snapshot)
    }
}
