/// Stale-while-revalidate cache in front of the upstream fetch path
///
/// Freshness tiers: a fresh entry is served directly, a stale-but-usable
/// entry is served immediately while at most one background refresh runs,
/// and a miss goes through a per-key double-checked lock so concurrent
/// cold callers produce a single fetch. On fetch failure any last-known
/// value (even expired) is served as a degraded response.
///
/// Thread-safe and cheaply cloneable; clones share all state.
use crate::config::CacheConfig;
use crate::errors::{GatewayError, GatewayResult};
use crate::logger::{self, LogTag};
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

pub mod entry;
pub mod types;

pub use entry::{CacheEntry, Freshness};
pub use types::CacheType;

/// Fetcher callback handed to `get`. Shared so the background refresh path
/// can re-invoke the same fetch later.
pub type CacheFetcher = Arc<dyn Fn() -> BoxFuture<'static, GatewayResult<Value>> + Send + Sync>;

/// Cache counters for monitoring.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stale_hits: u64,
    pub expirations: u64,
    pub evictions: u64,
    pub inserts: u64,
    pub degraded_returns: u64,
    pub refreshes: u64,
    pub refreshes_skipped: u64,
    pub entries: usize,
    /// Fraction of reads served from the cache (fresh or stale).
    pub hit_rate: f64,
}

#[derive(Clone)]
pub struct ApiCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    /// Per-key advisory locks: miss-path serialization and refresh dedup.
    /// Entries are pruned once no holder remains.
    key_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
    stats: Arc<StdRwLock<CacheStats>>,
    refresh_tasks: Arc<StdMutex<Vec<JoinHandle<()>>>>,
    config: CacheConfig,
}

impl ApiCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            key_locks: Arc::new(Mutex::new(HashMap::new())),
            stats: Arc::new(StdRwLock::new(CacheStats::default())),
            refresh_tasks: Arc::new(StdMutex::new(Vec::new())),
            config,
        }
    }

    /// Cache-aside read with stale-while-revalidate semantics.
    ///
    /// `fetcher` may be `None` for read-only callers; a miss then returns
    /// `NoFetcherAndCacheMiss` instead of going upstream.
    pub async fn get(
        &self,
        key: &str,
        cache_type: CacheType,
        fetcher: Option<CacheFetcher>,
    ) -> GatewayResult<Value> {
        // Fast path: classify under one write lock (hit_count mutates).
        let staleness_hit = {
            let mut entries = self.entries.write().await;
            if let Some(entry) = entries.get_mut(key) {
                match entry.freshness() {
                    Freshness::Fresh => {
                        entry.hit_count += 1;
                        self.stats.write().unwrap().hits += 1;
                        return Ok(entry.value.clone());
                    }
                    Freshness::StaleUsable => {
                        entry.hit_count += 1;
                        self.stats.write().unwrap().stale_hits += 1;
                        Some(entry.value.clone())
                    }
                    Freshness::Expired => None,
                }
            } else {
                None
            }
        };

        if let Some(value) = staleness_hit {
            if let Some(fetcher) = fetcher {
                self.spawn_refresh(key.to_string(), cache_type, fetcher).await;
            }
            return Ok(value);
        }

        // Miss or expired: fetch under the per-key lock.
        let fetcher = match fetcher {
            Some(f) => f,
            None => {
                return Err(GatewayError::NoFetcherAndCacheMiss {
                    key: key.to_string(),
                })
            }
        };

        let key_lock = self.key_lock(key).await;
        let guard = key_lock.lock().await;

        // Double-check: a concurrent caller may have just populated the key.
        {
            let mut entries = self.entries.write().await;
            if let Some(entry) = entries.get_mut(key) {
                if entry.freshness() == Freshness::Fresh {
                    entry.hit_count += 1;
                    self.stats.write().unwrap().hits += 1;
                    let value = entry.value.clone();
                    drop(entries);
                    drop(guard);
                    drop(key_lock);
                    self.release_key_lock(key).await;
                    return Ok(value);
                }
            }
        }

        self.stats.write().unwrap().misses += 1;

        let result = fetcher().await;
        let outcome = match result {
            Ok(value) => {
                let (ttl, stale_ttl) = cache_type.ttls(&self.config);
                self.store(key, value.clone(), ttl, stale_ttl).await;
                Ok(value)
            }
            Err(e) => self.fail_open(key, e).await,
        };

        drop(guard);
        drop(key_lock);
        self.release_key_lock(key).await;
        outcome
    }

    /// On upstream failure, serve any last-known value rather than the error.
    async fn fail_open(&self, key: &str, error: GatewayError) -> GatewayResult<Value> {
        let entries = self.entries.read().await;
        if let Some(entry) = entries.get(key) {
            logger::warning(
                LogTag::Cache,
                &format!("Fetch failed for {} - serving last-known value: {}", key, error),
            );
            self.stats.write().unwrap().degraded_returns += 1;
            Ok(entry.value.clone())
        } else {
            Err(error)
        }
    }

    /// Store with explicit TTLs, overriding the category defaults.
    pub async fn set(&self, key: &str, value: Value, ttl: Duration, stale_ttl: Duration) {
        self.store(key, value, ttl, stale_ttl).await;
    }

    async fn store(&self, key: &str, value: Value, ttl: Duration, stale_ttl: Duration) {
        let mut entries = self.entries.write().await;

        if !entries.contains_key(key) && entries.len() >= self.config.max_entries {
            self.evict_locked(&mut entries);
        }

        match entries.get_mut(key) {
            Some(entry) => entry.replace(value),
            None => {
                entries.insert(key.to_string(), CacheEntry::new(value, ttl, stale_ttl));
            }
        }
        self.stats.write().unwrap().inserts += 1;
    }

    /// Evict lowest (hit_count, created_at) entries until below 90% capacity.
    /// Called before inserting, so the incoming key is never a candidate.
    fn evict_locked(&self, entries: &mut HashMap<String, CacheEntry>) {
        let target = (self.config.max_entries * 9) / 10;
        let mut candidates: Vec<(String, u64, std::time::Instant)> = entries
            .iter()
            .map(|(k, e)| (k.clone(), e.hit_count, e.created_at))
            .collect();
        candidates.sort_by(|a, b| (a.1, a.2).cmp(&(b.1, b.2)));

        let mut evicted = 0u64;
        for (key, _, _) in candidates {
            if entries.len() < target {
                break;
            }
            entries.remove(&key);
            evicted += 1;
        }

        if evicted > 0 {
            self.stats.write().unwrap().evictions += evicted;
            logger::debug(
                LogTag::Cache,
                &format!("Evicted {} entries (capacity {})", evicted, self.config.max_entries),
            );
        }
    }

    /// Launch at most one background refresh for a stale key. If the key's
    /// advisory lock is already held (a refresh or miss-path fetch is in
    /// progress) the refresh is skipped.
    async fn spawn_refresh(&self, key: String, cache_type: CacheType, fetcher: CacheFetcher) {
        let key_lock = self.key_lock(&key).await;
        let guard = match key_lock.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                // A refresh or miss-path fetch already holds the key: skip.
                self.stats.write().unwrap().refreshes_skipped += 1;
                drop(key_lock);
                self.release_key_lock(&key).await;
                return;
            }
        };
        drop(key_lock);

        self.stats.write().unwrap().refreshes += 1;

        let cache = self.clone();
        let handle = tokio::spawn(async move {
            match fetcher().await {
                Ok(value) => {
                    let (ttl, stale_ttl) = cache_type.ttls(&cache.config);
                    cache.store(&key, value, ttl, stale_ttl).await;
                    logger::debug(LogTag::Cache, &format!("Background refresh completed: {}", key));
                }
                Err(e) => {
                    logger::warning(
                        LogTag::Cache,
                        &format!("Background refresh failed for {}: {}", key, e),
                    );
                }
            }
            drop(guard);
            cache.release_key_lock(&key).await;
        });

        let mut tasks = self.refresh_tasks.lock().unwrap();
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    async fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().await;
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Prune the lock entry once the map itself is the only holder.
    async fn release_key_lock(&self, key: &str) {
        let mut locks = self.key_locks.lock().await;
        if let Some(lock) = locks.get(key) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(key);
            }
        }
    }

    /// Remove one key.
    pub async fn invalidate(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    /// Drop everything past its stale_ttl.
    pub async fn purge_expired(&self) {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.freshness() != Freshness::Expired);
        let removed = (before - entries.len()) as u64;
        if removed > 0 {
            self.stats.write().unwrap().expirations += removed;
        }
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn get_stats(&self) -> CacheStats {
        let mut stats = self.stats.read().unwrap().clone();
        stats.entries = self.entries.read().await.len();
        let reads = stats.hits + stats.stale_hits + stats.misses;
        stats.hit_rate = if reads == 0 {
            0.0
        } else {
            (stats.hits + stats.stale_hits) as f64 / reads as f64
        };
        stats
    }

    /// Abort outstanding background refreshes. Part of gateway teardown.
    pub fn shutdown(&self) {
        let mut tasks = self.refresh_tasks.lock().unwrap();
        for handle in tasks.drain(..) {
            handle.abort();
        }
    }
}
