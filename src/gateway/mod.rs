/// The API gateway: cache -> coalescer -> rate limiter -> retrying HTTP
///
/// One `fetch(endpoint, params, cache_type)` entry point for every
/// collaborator. A fresh cache hit never leaves the process; a miss is
/// deduplicated against identical concurrent misses, admitted through the
/// endpoint's token bucket, and fetched with retry/backoff. Results flow
/// back into the cache and out to every coalesced waiter.
///
/// Constructed explicitly at startup and closed explicitly at shutdown -
/// there are no global instances and no import-time side effects.
use crate::batcher::{BatchFetcher, ExtractResult, Params, RequestBatcher};
use crate::cache::{ApiCache, CacheFetcher, CacheType};
use crate::coalescer::RequestCoalescer;
use crate::config::GatewayConfig;
use crate::errors::{GatewayError, GatewayResult};
use crate::limiter::RateLimiter;
use crate::logger::{self, LogTag};
use crate::stats::{ApiStats, ApiStatsTracker};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub mod endpoints;
pub mod http;

pub use endpoints::{cache_key, EndpointRoute, EndpointTable};
pub use http::RetryingClient;

/// Combined statistics snapshot for the observability poller.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GatewayStatsSnapshot {
    pub upstream: ApiStats,
    pub cache: crate::cache::CacheStats,
    pub coalescer: crate::coalescer::CoalescerStats,
    pub limiter: crate::limiter::RateLimiterStats,
    pub batcher: crate::batcher::BatcherStats,
}

#[derive(Clone)]
pub struct ApiGateway {
    cache: ApiCache,
    coalescer: RequestCoalescer,
    limiter: RateLimiter,
    batcher: RequestBatcher,
    http: Arc<RetryingClient>,
    endpoints: EndpointTable,
    stats: Arc<ApiStatsTracker>,
}

impl ApiGateway {
    pub fn new(config: GatewayConfig) -> GatewayResult<Self> {
        config.validate()?;

        let stats = Arc::new(ApiStatsTracker::new());
        let http = Arc::new(RetryingClient::new(config.http.clone(), stats.clone())?);
        let endpoints = EndpointTable::new(&config.http.base_url, &config.endpoints);

        let coalescer = RequestCoalescer::new(
            Duration::from_secs(config.coalescer.timeout_secs),
            Duration::from_secs(config.coalescer.cleanup_interval_secs),
        );
        coalescer.start_cleanup_task();

        let gateway = Self {
            cache: ApiCache::new(config.cache.clone()),
            coalescer,
            limiter: RateLimiter::new(config.tiers.clone()),
            batcher: RequestBatcher::new(
                Duration::from_millis(config.batcher.window_ms),
                config.batcher.max_batch_size,
            ),
            http,
            endpoints,
            stats,
        };

        logger::info(LogTag::Gateway, "API gateway initialized");
        Ok(gateway)
    }

    /// Fetch `endpoint` with `params`, cached under `cache_type`'s freshness
    /// windows. This is the single entry point for all collaborators.
    pub async fn fetch(
        &self,
        endpoint: &str,
        params: &Params,
        cache_type: CacheType,
    ) -> GatewayResult<Value> {
        let route = self.endpoints.resolve(endpoint);
        let key = cache_key(endpoint, params);
        let url = format!("{}{}", route.base_url, endpoint);
        let tier = route.tier;

        let coalescer = self.coalescer.clone();
        let limiter = self.limiter.clone();
        let http = self.http.clone();
        let fetch_key = key.clone();
        let fetch_endpoint = endpoint.to_string();
        let fetch_params = params.clone();

        let fetcher: CacheFetcher = Arc::new(move || {
            let coalescer = coalescer.clone();
            let limiter = limiter.clone();
            let http = http.clone();
            let key = fetch_key.clone();
            let endpoint = fetch_endpoint.clone();
            let url = url.clone();
            let params = fetch_params.clone();

            Box::pin(async move {
                coalescer
                    .execute(&key, move || async move {
                        limiter
                            .execute(&endpoint, tier, || http.get_json(&url, &params))
                            .await
                    })
                    .await
            })
        });

        self.cache.get(&key, cache_type, Some(fetcher)).await
    }

    /// Look up the route (host, category, tier) the gateway would use.
    pub fn resolve(&self, endpoint: &str) -> &EndpointRoute {
        self.endpoints.resolve(endpoint)
    }

    /// Drop the cached value for one logical request.
    pub async fn invalidate(&self, endpoint: &str, params: &Params) {
        self.cache.invalidate(&cache_key(endpoint, params)).await;
    }

    // ------------------------------------------------------------------
    // Domain-shaped accessors: pure call-sites into fetch plus client-side
    // post-filtering. No additional concurrency contract.
    // ------------------------------------------------------------------

    /// Yield pools, optionally filtered by chain, project, and minimum TVL.
    pub async fn get_pools(
        &self,
        chain: Option<&str>,
        project: Option<&str>,
        min_tvl: Option<f64>,
    ) -> GatewayResult<Vec<Value>> {
        let value = self.fetch("/pools", &Params::new(), CacheType::Pools).await?;
        Ok(filter_pools(pool_list(value), chain, project, min_tvl))
    }

    /// Historical APY/TVL chart for one pool.
    pub async fn get_pool_chart(&self, pool_id: &str) -> GatewayResult<Value> {
        self.fetch(
            &format!("/chart/{}", pool_id),
            &Params::new(),
            CacheType::Pools,
        )
        .await
    }

    /// Protocol metadata listing.
    pub async fn get_protocols(&self) -> GatewayResult<Vec<Value>> {
        let value = self
            .fetch("/protocols", &Params::new(), CacheType::Protocols)
            .await?;
        Ok(value.as_array().cloned().unwrap_or_default())
    }

    /// Chain registry.
    pub async fn get_chains(&self) -> GatewayResult<Vec<Value>> {
        let value = self
            .fetch("/v2/chains", &Params::new(), CacheType::Chains)
            .await?;
        Ok(value.as_array().cloned().unwrap_or_default())
    }

    /// Current prices for a set of coin identifiers.
    ///
    /// Composes the batcher: distinct coins requested within the batch
    /// window merge into a single upstream call, which then flows through
    /// the normal fetch pipeline (cache, coalescer, rate limiter).
    pub async fn get_prices(&self, coins: &[String]) -> GatewayResult<HashMap<String, Value>> {
        if coins.is_empty() {
            return Ok(HashMap::new());
        }

        let batch_fetcher: BatchFetcher = {
            let gateway = self.clone();
            Arc::new(move |batch: Vec<Params>| {
                let gateway = gateway.clone();
                Box::pin(async move {
                    let mut ids: Vec<String> =
                        batch.iter().filter_map(|p| p.get("coin").cloned()).collect();
                    ids.sort();
                    ids.dedup();
                    let endpoint = format!("/prices/current/{}", ids.join(","));
                    gateway
                        .fetch(&endpoint, &Params::new(), CacheType::Prices)
                        .await
                })
            })
        };

        let extract: ExtractResult = Arc::new(|response: &Value, params: &Params| {
            let coin = params.get("coin").cloned().unwrap_or_default();
            response
                .get("coins")
                .and_then(|coins| coins.get(&coin))
                .cloned()
                .ok_or_else(|| {
                    GatewayError::Batch(format!("{} missing from batched price response", coin))
                })
        });

        let lookups = coins.iter().map(|coin| {
            let batcher = self.batcher.clone();
            let batch_fetcher = batch_fetcher.clone();
            let extract = extract.clone();
            let coin = coin.clone();
            async move {
                let mut params = Params::new();
                params.insert("coin".to_string(), coin.clone());
                let result = batcher
                    .add_to_batch("/prices/current", params, batch_fetcher, extract)
                    .await;
                (coin, result)
            }
        });

        let mut prices = HashMap::new();
        let mut first_error: Option<GatewayError> = None;
        for (coin, result) in futures::future::join_all(lookups).await {
            match result {
                Ok(value) => {
                    prices.insert(coin, value);
                }
                Err(GatewayError::Batch(msg)) => {
                    // Upstream simply had no data for this coin
                    logger::debug(LogTag::Gateway, &msg);
                }
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if prices.is_empty() {
            if let Some(e) = first_error {
                return Err(e);
            }
        }
        Ok(prices)
    }

    /// Combined snapshot across the gateway and its components.
    pub async fn get_stats(&self) -> GatewayStatsSnapshot {
        GatewayStatsSnapshot {
            upstream: self.stats.get_stats().await,
            cache: self.cache.get_stats().await,
            coalescer: self.coalescer.get_stats().await,
            limiter: self.limiter.get_stats(),
            batcher: self.batcher.get_stats(),
        }
    }

    /// Tear down background work: the coalescer sweep and any in-flight
    /// drivers and cache refreshes are aborted.
    pub async fn close(&self) {
        self.coalescer.shutdown().await;
        self.cache.shutdown();
        logger::info(LogTag::Gateway, "API gateway closed");
    }
}

/// Upstream wraps the pool listing as `{"status": ..., "data": [...]}`;
/// tolerate a bare array as well.
fn pool_list(value: Value) -> Vec<Value> {
    value
        .get("data")
        .and_then(|d| d.as_array())
        .cloned()
        .or_else(|| value.as_array().cloned())
        .unwrap_or_default()
}

fn filter_pools(
    pools: Vec<Value>,
    chain: Option<&str>,
    project: Option<&str>,
    min_tvl: Option<f64>,
) -> Vec<Value> {
    pools
        .into_iter()
        .filter(|pool| {
            if let Some(chain) = chain {
                let matches = pool
                    .get("chain")
                    .and_then(|c| c.as_str())
                    .map(|c| c.eq_ignore_ascii_case(chain))
                    .unwrap_or(false);
                if !matches {
                    return false;
                }
            }
            if let Some(project) = project {
                let matches = pool
                    .get("project")
                    .and_then(|p| p.as_str())
                    .map(|p| p.eq_ignore_ascii_case(project))
                    .unwrap_or(false);
                if !matches {
                    return false;
                }
            }
            if let Some(min_tvl) = min_tvl {
                let tvl = pool.get("tvlUsd").and_then(|t| t.as_f64()).unwrap_or(0.0);
                if tvl < min_tvl {
                    return false;
                }
            }
            true
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_pools() -> Vec<Value> {
        vec![
            json!({"pool": "a", "chain": "Base", "project": "aave-v3", "tvlUsd": 1_000_000.0}),
            json!({"pool": "b", "chain": "Ethereum", "project": "aave-v3", "tvlUsd": 50_000.0}),
            json!({"pool": "c", "chain": "base", "project": "compound", "tvlUsd": 10_000.0}),
        ]
    }

    #[test]
    fn test_filter_pools_by_chain_is_case_insensitive() {
        let filtered = filter_pools(sample_pools(), Some("base"), None, None);
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0]["pool"], "a");
        assert_eq!(filtered[1]["pool"], "c");
    }

    #[test]
    fn test_filter_pools_combined() {
        let filtered = filter_pools(sample_pools(), Some("Base"), Some("aave-v3"), None);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0]["pool"], "a");

        let filtered = filter_pools(sample_pools(), None, None, Some(40_000.0));
        assert_eq!(filtered.len(), 2);
    }

    #[test]
    fn test_pool_list_accepts_both_shapes() {
        let wrapped = json!({"status": "success", "data": [{"pool": "a"}]});
        assert_eq!(pool_list(wrapped).len(), 1);

        let bare = json!([{"pool": "a"}, {"pool": "b"}]);
        assert_eq!(pool_list(bare).len(), 2);

        assert!(pool_list(json!({"unexpected": true})).is_empty());
    }

    #[test]
    fn test_missing_fields_are_filtered_out_when_constrained() {
        let pools = vec![json!({"pool": "x"})];
        assert!(filter_pools(pools.clone(), Some("Base"), None, None).is_empty());
        // No constraint: a shapeless pool passes through untouched
        assert_eq!(filter_pools(pools, None, None, None).len(), 1);
    }
}
