//! Multi-layer cache orchestrator.
//!
//! Composes the in-process L1 tier and the distributed L2 tier behind one
//! read-through/write-through surface. L2 trouble degrades the cache to
//! L1-only operation; callers never see an infrastructure error, only a
//! lower hit rate.

#[cfg(feature = "redis")]
use crate::codec::Codec;
use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::keys::KeyPattern;
use crate::memory::MemoryCache;
#[cfg(feature = "redis")]
use crate::redis_cache::{ConnectionState, RedisCache};
use crate::stats::{CacheStats, StatsSnapshot};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A load in progress, awaited by every concurrent caller of the same key.
type InflightLoad = Shared<BoxFuture<'static, Result<String, Arc<CacheError>>>>;

struct Warmer {
    key: String,
    ttl: Duration,
    loader: Box<
        dyn Fn() -> BoxFuture<'static, CacheResult<serde_json::Value>> + Send + Sync,
    >,
}

struct CacheInner {
    config: CacheConfig,
    l1: MemoryCache,
    #[cfg(feature = "redis")]
    l2: Option<RedisCache>,
    #[cfg(feature = "redis")]
    codec: Codec,
    stats: CacheStats,
    in_flight: Mutex<HashMap<String, InflightLoad>>,
    warmers: Mutex<Vec<Arc<Warmer>>>,
}

/// Two-tier read-through/write-through cache.
///
/// Cheap to clone; clones share the same tiers and statistics.
///
/// # Examples
///
/// ```no_run
/// use harvest_cache::{ttl, CacheConfig, MultiLayerCache};
///
/// # async fn example() -> harvest_cache::CacheResult<()> {
/// let cache = MultiLayerCache::new(CacheConfig::from_env());
///
/// let featured: Vec<String> = cache
///     .get_or_load("homepage:featured", ttl::MEDIUM, || async {
///         Ok(vec!["tomatoes".to_string(), "honey".to_string()])
///     })
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct MultiLayerCache {
    inner: Arc<CacheInner>,
}

impl Clone for MultiLayerCache {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl MultiLayerCache {
    /// Build the cache from configuration. Without a Redis URL (or with the
    /// `redis` feature disabled) the cache runs in L1-only mode.
    pub fn new(config: CacheConfig) -> Self {
        let l1 = MemoryCache::new(config.l1_max_entries, config.l1_max_bytes);

        #[cfg(feature = "redis")]
        let l2 = match &config.redis_url {
            Some(_) => Some(RedisCache::new(config.clone())),
            None => {
                info!("no Redis configured, cache running in L1-only mode");
                None
            }
        };
        #[cfg(not(feature = "redis"))]
        info!("redis feature disabled, cache running in L1-only mode");
        #[cfg(feature = "redis")]
        let codec = Codec::new(config.compression_threshold);

        Self {
            inner: Arc::new(CacheInner {
                config,
                l1,
                #[cfg(feature = "redis")]
                l2,
                #[cfg(feature = "redis")]
                codec,
                stats: CacheStats::default(),
                in_flight: Mutex::new(HashMap::new()),
                warmers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Get a value. Checks L1, then L2 (back-filling L1 with the remaining
    /// TTL on an L2 hit). Never fails: corruption and backend trouble are
    /// handled internally and reported as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if let Some(json) = self.inner.l1.get(key) {
            match serde_json::from_str(&json) {
                Ok(value) => {
                    self.inner.stats.record_l1_hit();
                    return Some(value);
                }
                Err(e) => {
                    debug!(key, error = %e, "L1 entry does not decode, dropping");
                    self.invalidate_silently(key).await;
                }
            }
        }

        #[cfg(feature = "redis")]
        if let Some(l2) = &self.inner.l2 {
            if let Some(bytes) = l2.get(key).await {
                match self.inner.codec.decode_json(&bytes) {
                    Ok(json) => match serde_json::from_str(&json) {
                        Ok(value) => {
                            let remaining = l2
                                .ttl(key)
                                .await
                                .unwrap_or(self.inner.config.default_ttl);
                            self.inner.l1.set(key, json, remaining);
                            self.inner.stats.record_l2_hit();
                            return Some(value);
                        }
                        Err(e) => {
                            warn!(key, error = %e, "corrupted L2 entry, dropping");
                            self.invalidate_silently(key).await;
                        }
                    },
                    Err(e) => {
                        warn!(key, error = %e, "corrupted L2 entry, dropping");
                        self.invalidate_silently(key).await;
                    }
                }
            }
        }

        self.inner.stats.record_miss();
        None
    }

    /// Write a value to both tiers. The L2 write is fail-soft: this method
    /// only errors if the caller's own value does not serialize.
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> CacheResult<()> {
        let json = serde_json::to_string(value)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.store_json(key, json, ttl).await;
        Ok(())
    }

    /// Read-through load with process-local de-duplication.
    ///
    /// On a miss, the caller-supplied loader runs at most once per key per
    /// process at a time; concurrent callers for the same key await the
    /// in-flight load and all observe its outcome. A loader failure is
    /// surfaced as [`CacheError::Loader`] to every waiter and never cached.
    pub async fn get_or_load<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        loader: F,
    ) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<T>> + Send + 'static,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }

        let load = {
            let mut in_flight = self.inner.in_flight.lock().expect("in-flight lock poisoned");
            match in_flight.entry(key.to_string()) {
                Entry::Occupied(pending) => pending.get().clone(),
                Entry::Vacant(slot) => {
                    let cache = self.clone();
                    let owned_key = key.to_string();
                    let loader_timeout = self.inner.config.loader_timeout;
                    let fut = loader();

                    // Spawned rather than driven by the waiters: the load
                    // settles and clears its map entry even if every caller
                    // is dropped mid-flight.
                    let task = tokio::spawn(async move {
                        let outcome = match tokio::time::timeout(loader_timeout, fut).await {
                            Ok(Ok(value)) => serde_json::to_string(&value)
                                .map_err(|e| CacheError::Serialization(e.to_string())),
                            Ok(Err(e)) => Err(e),
                            Err(_) => Err(CacheError::Timeout),
                        };

                        let settled = match outcome {
                            Ok(json) => {
                                cache.store_json(&owned_key, json.clone(), ttl).await;
                                Ok(json)
                            }
                            Err(e) => {
                                // Loader business errors are the caller's to
                                // report; the cache only flags its own
                                // infrastructure trouble.
                                if e.is_infrastructure() {
                                    warn!(key = %owned_key, error = %e, "read-through load failed");
                                }
                                Err(Arc::new(e))
                            }
                        };

                        cache
                            .inner
                            .in_flight
                            .lock()
                            .expect("in-flight lock poisoned")
                            .remove(&owned_key);
                        settled
                    });

                    let load = async move {
                        match task.await {
                            Ok(settled) => settled,
                            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                            Err(_) => Err(Arc::new(CacheError::Timeout)),
                        }
                    }
                    .boxed()
                    .shared();

                    slot.insert(load.clone());
                    load
                }
            }
        };

        match load.await {
            Ok(json) => serde_json::from_str(&json)
                .map_err(|e| CacheError::Deserialization(e.to_string())),
            Err(shared) => Err(CacheError::Loader(shared)),
        }
    }

    /// Delete a key from both tiers. Idempotent; never fails.
    pub async fn invalidate(&self, key: &str) {
        let l1_removed = self.inner.l1.delete(key);
        #[cfg(feature = "redis")]
        let l2_removed = match &self.inner.l2 {
            Some(l2) => l2.delete(key).await,
            None => false,
        };
        #[cfg(not(feature = "redis"))]
        let l2_removed = false;

        if l1_removed || l2_removed {
            self.inner.stats.record_invalidations(1);
        }
    }

    /// Delete every key matching a glob pattern from both tiers.
    ///
    /// Returns the number of entries removed across both layers (a key
    /// resident in both counts twice).
    pub async fn invalidate_pattern(&self, pattern: &str) -> u64 {
        let key_pattern = KeyPattern::new(pattern);
        let mut removed = self.inner.l1.delete_where(|key| key_pattern.matches(key)) as u64;

        #[cfg(feature = "redis")]
        if let Some(l2) = &self.inner.l2 {
            removed += l2.delete_by_pattern(&key_pattern.as_redis_match()).await;
        }

        self.inner.stats.record_invalidations(removed);
        removed
    }

    /// Point-in-time statistics for the metrics endpoint.
    pub async fn stats(&self) -> StatsSnapshot {
        #[cfg(feature = "redis")]
        let l2_connected = match &self.inner.l2 {
            Some(l2) => l2.state().await == ConnectionState::Connected,
            None => false,
        };
        #[cfg(not(feature = "redis"))]
        let l2_connected = false;

        self.inner.stats.snapshot(self.inner.l1.len(), l2_connected)
    }

    /// Zero the statistics counters. Administrative use only.
    pub fn reset_stats(&self) {
        self.inner.stats.reset();
    }

    /// Register a loader for deploy-time pre-population via [`warm`].
    ///
    /// [`warm`]: MultiLayerCache::warm
    pub fn register_warmup<F, Fut>(&self, key: impl Into<String>, ttl: Duration, loader: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CacheResult<serde_json::Value>> + Send + 'static,
    {
        let warmer = Warmer {
            key: key.into(),
            ttl,
            loader: Box::new(move || loader().boxed()),
        };
        self.inner
            .warmers
            .lock()
            .expect("warmers lock poisoned")
            .push(Arc::new(warmer));
    }

    /// Run every registered warmer, skipping keys already resident.
    /// Individual failures are logged and skipped. Returns the number of
    /// keys populated.
    pub async fn warm(&self) -> usize {
        let warmers: Vec<Arc<Warmer>> = self
            .inner
            .warmers
            .lock()
            .expect("warmers lock poisoned")
            .clone();

        let mut warmed = 0;
        for warmer in warmers {
            if self.resident(&warmer.key).await {
                continue;
            }
            match (warmer.loader)().await {
                Ok(value) => {
                    self.store_json(&warmer.key, value.to_string(), warmer.ttl).await;
                    warmed += 1;
                }
                Err(e) => {
                    warn!(key = %warmer.key, error = %e, "cache warmup loader failed");
                }
            }
        }

        if warmed > 0 {
            info!(warmed, "cache warmup complete");
        }
        warmed
    }

    /// Write pre-serialized JSON through both tiers.
    async fn store_json(&self, key: &str, json: String, ttl: Duration) {
        #[cfg(feature = "redis")]
        if let Some(l2) = &self.inner.l2 {
            match self.inner.codec.encode_json(&json) {
                Ok(bytes) => l2.set(key, bytes, ttl).await,
                Err(e) => warn!(key, error = %e, "skipping L2 write"),
            }
        }
        self.inner.l1.set(key, json, ttl);
        self.inner.stats.record_set();
    }

    /// Whether either tier currently holds the key. Does not touch stats.
    async fn resident(&self, key: &str) -> bool {
        if self.inner.l1.get(key).is_some() {
            return true;
        }
        #[cfg(feature = "redis")]
        if let Some(l2) = &self.inner.l2 {
            return l2.get(key).await.is_some();
        }
        false
    }

    /// Drop a bad entry from both tiers without counting an invalidation.
    async fn invalidate_silently(&self, key: &str) {
        self.inner.l1.delete(key);
        #[cfg(feature = "redis")]
        if let Some(l2) = &self.inner.l2 {
            l2.delete(key).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct FarmProfile {
        name: String,
        rating: f64,
    }

    fn l1_only() -> MultiLayerCache {
        MultiLayerCache::new(CacheConfig::new())
    }

    #[tokio::test]
    async fn test_set_then_get_typed() {
        let cache = l1_only();
        let profile = FarmProfile {
            name: "Green Acres".to_string(),
            rating: 4.8,
        };

        cache
            .set("farm:1:details", &profile, Duration::from_secs(60))
            .await
            .unwrap();

        let cached: Option<FarmProfile> = cache.get("farm:1:details").await;
        assert_eq!(cached, Some(profile));
    }

    #[tokio::test]
    async fn test_get_or_load_populates_and_reuses() {
        let cache = l1_only();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let value: u64 = cache
                .get_or_load("orders:recent:limit:10", Duration::from_secs(60), move || {
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(42u64)
                    }
                })
                .await
                .unwrap();
            assert_eq!(value, 42);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_get_or_load_runs_loader_once() {
        let cache = l1_only();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_load("farm:1:stats", Duration::from_secs(60), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        // Hold the load open long enough for every task to pile up
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok("stats".to_string())
                    })
                    .await
                    .unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), "stats");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_loader_error_propagates_and_is_not_cached() {
        let cache = l1_only();

        let result: CacheResult<String> = cache
            .get_or_load("user:1:profile", Duration::from_secs(60), || async {
                Err(CacheError::Config("db offline".to_string()))
            })
            .await;
        assert!(matches!(result, Err(CacheError::Loader(_))));

        // Nothing cached; the next call loads again and may succeed
        let value: String = cache
            .get_or_load("user:1:profile", Duration::from_secs(60), || async {
                Ok("loaded".to_string())
            })
            .await
            .unwrap();
        assert_eq!(value, "loaded");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_reloads() {
        let cache = l1_only();
        let calls = Arc::new(AtomicUsize::new(0));

        let load = |calls: Arc<AtomicUsize>| {
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("featured".to_string())
            }
        };

        let _: String = cache
            .get_or_load("homepage:featured", Duration::from_secs(300), load(calls.clone()))
            .await
            .unwrap();
        let _: String = cache
            .get_or_load("homepage:featured", Duration::from_secs(300), load(calls.clone()))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(301)).await;

        let _: String = cache
            .get_or_load("homepage:featured", Duration::from_secs(300), load(calls.clone()))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_undecodable_entry_reads_as_miss_and_is_dropped() {
        let cache = l1_only();
        cache
            .set("product:p1:inventory", &"unexpected", Duration::from_secs(60))
            .await
            .unwrap();

        // Stored JSON does not decode as the requested type: a miss, never
        // an error
        assert_eq!(cache.get::<u32>("product:p1:inventory").await, None);

        // The bad entry was proactively dropped
        let stats = cache.stats().await;
        assert_eq!(stats.l1_entries, 0);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.l1_hits, 0);
        assert_eq!(cache.get::<String>("product:p1:inventory").await, None);
    }

    #[tokio::test]
    async fn test_load_settles_after_every_waiter_is_dropped() {
        let cache = l1_only();
        let calls = Arc::new(AtomicUsize::new(0));

        let waiter = {
            let cache = cache.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                let _: String = cache
                    .get_or_load("farm:9:details", Duration::from_secs(60), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok("slow".to_string())
                    })
                    .await
                    .unwrap();
            })
        };

        // Drop the only caller while the load is still in flight
        tokio::time::sleep(Duration::from_millis(10)).await;
        waiter.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;

        // The detached load ran to completion and wrote through
        assert_eq!(cache.get::<String>("farm:9:details").await.as_deref(), Some("slow"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // The in-flight slot was cleared: a fresh call hits the cache
        let value: String = cache
            .get_or_load("farm:9:details", Duration::from_secs(60), || async {
                panic!("value is cached, loader must not run")
            })
            .await
            .unwrap();
        assert_eq!(value, "slow");
    }

    #[tokio::test]
    async fn test_invalidate_is_idempotent() {
        let cache = l1_only();
        cache.set("k", &1u32, Duration::from_secs(60)).await.unwrap();

        cache.invalidate("k").await;
        cache.invalidate("k").await;
        assert_eq!(cache.get::<u32>("k").await, None);
        assert_eq!(cache.stats().await.invalidations, 1);
    }

    #[tokio::test]
    async fn test_invalidate_pattern_scope() {
        let cache = l1_only();
        let ttl = Duration::from_secs(60);
        cache.set("farm:1:profile", &"a", ttl).await.unwrap();
        cache.set("farm:1:products", &"b", ttl).await.unwrap();
        cache.set("farm:2:profile", &"c", ttl).await.unwrap();

        let removed = cache.invalidate_pattern("farm:1:*").await;
        assert_eq!(removed, 2);
        assert_eq!(cache.get::<String>("farm:1:profile").await, None);
        assert_eq!(cache.get::<String>("farm:1:products").await, None);
        assert_eq!(cache.get::<String>("farm:2:profile").await.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn test_stats_track_layers() {
        let cache = l1_only();
        cache.set("k", &"v", Duration::from_secs(60)).await.unwrap();

        let _: Option<String> = cache.get("k").await;
        let _: Option<String> = cache.get("missing").await;

        let stats = cache.stats().await;
        assert_eq!(stats.l1_hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.l1_entries, 1);
        assert!(!stats.l2_connected);
    }

    #[tokio::test]
    async fn test_warm_populates_registered_keys() {
        let cache = l1_only();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        cache.register_warmup("homepage:featured", Duration::from_secs(300), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(serde_json::json!(["tomatoes", "honey"]))
            }
        });
        cache.register_warmup("farms:list:page:1:limit:20", Duration::from_secs(60), || async {
            Err(CacheError::Config("upstream down".to_string()))
        });

        assert_eq!(cache.warm().await, 1);
        let featured: Option<Vec<String>> = cache.get("homepage:featured").await;
        assert_eq!(featured, Some(vec!["tomatoes".to_string(), "honey".to_string()]));

        // Already resident: warm is a no-op and the loader is not re-run
        assert_eq!(cache.warm().await, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[cfg(feature = "redis")]
    #[tokio::test]
    async fn test_degraded_mode_with_unreachable_backend() {
        let config = CacheConfig::redis("redis://127.0.0.1:1")
            .with_connection_timeout(Duration::from_millis(100))
            .with_operation_timeout(Duration::from_millis(100));
        let cache = MultiLayerCache::new(config);

        cache.set("k", &"v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get::<String>("k").await.as_deref(), Some("v"));

        let loaded: String = cache
            .get_or_load("other", Duration::from_secs(60), || async {
                Ok("loaded".to_string())
            })
            .await
            .unwrap();
        assert_eq!(loaded, "loaded");

        cache.invalidate("k").await;
        assert_eq!(cache.get::<String>("k").await, None);
        assert!(!cache.stats().await.l2_connected);
    }
}
