/// Endpoint routing and deterministic request keys
///
/// The routing table maps an endpoint prefix to its upstream host, cache
/// category, and rate tier. Unknown endpoints get a conservative default
/// (short TTL category, low tier). Cache and coalescing keys are the same
/// SHA-256 of `(endpoint, sorted params)` so both layers always agree on
/// what "the same logical request" means.
use crate::batcher::Params;
use crate::cache::CacheType;
use crate::config::EndpointOverride;
use crate::limiter::RateTier;
use sha2::{Digest, Sha256};

/// Upstream hosts for the yield-data provider's API families.
const YIELDS_BASE_URL: &str = "https://yields.llama.fi";
const COINS_BASE_URL: &str = "https://coins.llama.fi";
const META_BASE_URL: &str = "https://api.llama.fi";

#[derive(Debug, Clone)]
pub struct EndpointRoute {
    pub base_url: String,
    pub cache_type: CacheType,
    pub tier: RateTier,
}

#[derive(Debug, Clone)]
pub struct EndpointTable {
    /// `(prefix, route)`, longest prefix wins.
    routes: Vec<(String, EndpointRoute)>,
    default_route: EndpointRoute,
}

impl EndpointTable {
    /// Built-in routes for the provider's endpoint families, with optional
    /// per-prefix overrides from configuration (used by deployments to
    /// reroute a category, and by tests to point at a local fixture).
    pub fn new(default_base_url: &str, overrides: &[EndpointOverride]) -> Self {
        let mut routes = vec![
            (
                "/pools".to_string(),
                EndpointRoute {
                    base_url: YIELDS_BASE_URL.to_string(),
                    cache_type: CacheType::Pools,
                    tier: RateTier::Medium,
                },
            ),
            (
                "/chart".to_string(),
                EndpointRoute {
                    base_url: YIELDS_BASE_URL.to_string(),
                    cache_type: CacheType::Pools,
                    tier: RateTier::Medium,
                },
            ),
            (
                "/prices".to_string(),
                EndpointRoute {
                    base_url: COINS_BASE_URL.to_string(),
                    cache_type: CacheType::Prices,
                    tier: RateTier::High,
                },
            ),
            (
                "/protocols".to_string(),
                EndpointRoute {
                    base_url: META_BASE_URL.to_string(),
                    cache_type: CacheType::Protocols,
                    tier: RateTier::Low,
                },
            ),
            (
                "/v2/chains".to_string(),
                EndpointRoute {
                    base_url: META_BASE_URL.to_string(),
                    cache_type: CacheType::Chains,
                    tier: RateTier::Low,
                },
            ),
        ];

        for over in overrides {
            let tier = over.tier.as_deref().and_then(RateTier::parse);
            if let Some(existing) = routes.iter_mut().find(|(p, _)| *p == over.prefix) {
                if let Some(base) = &over.base_url {
                    existing.1.base_url = base.clone();
                }
                if let Some(tier) = tier {
                    existing.1.tier = tier;
                }
            } else {
                routes.push((
                    over.prefix.clone(),
                    EndpointRoute {
                        base_url: over
                            .base_url
                            .clone()
                            .unwrap_or_else(|| default_base_url.to_string()),
                        cache_type: CacheType::Default,
                        tier: tier.unwrap_or(RateTier::Low),
                    },
                ));
            }
        }

        // Longest prefix first so "/prices/current" can outrank "/prices"
        routes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        Self {
            routes,
            default_route: EndpointRoute {
                base_url: default_base_url.to_string(),
                cache_type: CacheType::Default,
                tier: RateTier::Low,
            },
        }
    }

    pub fn resolve(&self, endpoint: &str) -> &EndpointRoute {
        self.routes
            .iter()
            .find(|(prefix, _)| endpoint.starts_with(prefix.as_str()))
            .map(|(_, route)| route)
            .unwrap_or(&self.default_route)
    }
}

/// Deterministic key shared by the cache and the coalescer.
///
/// Params are sorted before hashing so `{a,b}` and `{b,a}` collapse to one
/// key. The endpoint is kept as a readable prefix for log lines.
pub fn cache_key(endpoint: &str, params: &Params) -> String {
    let mut sorted: Vec<(&String, &String)> = params.iter().collect();
    sorted.sort();

    let mut canonical = endpoint.to_string();
    for (i, (k, v)) in sorted.iter().enumerate() {
        canonical.push(if i == 0 { '?' } else { '&' });
        canonical.push_str(k);
        canonical.push('=');
        canonical.push_str(v);
    }

    let digest = Sha256::digest(canonical.as_bytes());
    let hash: String = digest[..12].iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}#{}", endpoint.trim_start_matches('/'), hash)
}
