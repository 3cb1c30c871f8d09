/// Endpoint categories and their freshness windows
///
/// TTLs are volatility-proportional: price feeds churn every block while the
/// chain registry changes a few times a year. The numbers live in
/// `CacheConfig` so deployments can tune them without code changes.
use crate::config::CacheConfig;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    /// Token price feeds (seconds of freshness)
    Prices,
    /// Yield pool listings
    Pools,
    /// Protocol metadata
    Protocols,
    /// Chain registry (near-static)
    Chains,
    /// Conservative fallback for uncategorized endpoints
    Default,
}

impl CacheType {
    /// Resolve this category's `(ttl, stale_ttl)` pair.
    pub fn ttls(&self, config: &CacheConfig) -> (Duration, Duration) {
        let (ttl, stale) = match self {
            CacheType::Prices => (config.prices_ttl_secs, config.prices_stale_ttl_secs),
            CacheType::Pools => (config.pools_ttl_secs, config.pools_stale_ttl_secs),
            CacheType::Protocols => (config.protocols_ttl_secs, config.protocols_stale_ttl_secs),
            CacheType::Chains => (config.chains_ttl_secs, config.chains_stale_ttl_secs),
            CacheType::Default => (config.default_ttl_secs, config.default_stale_ttl_secs),
        };
        (Duration::from_secs(ttl), Duration::from_secs(stale))
    }
}

impl std::fmt::Display for CacheType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CacheType::Prices => "prices",
            CacheType::Pools => "pools",
            CacheType::Protocols => "protocols",
            CacheType::Chains => "chains",
            CacheType::Default => "default",
        };
        write!(f, "{}", name)
    }
}
