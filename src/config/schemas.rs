/// Configuration schemas - all config structures defined once with defaults
///
/// Each section is declared through the config_struct! macro so the field,
/// its type, and its default live in a single place. Durations are plain
/// integer fields (seconds / milliseconds) so the TOML stays readable.
use crate::config_struct;

// ============================================================================
// CACHE CONFIGURATION
// ============================================================================

config_struct! {
    /// Cache capacity and per-category freshness windows.
    ///
    /// TTLs are volatility-proportional: prices move every block, the chain
    /// registry changes a few times a year.
    pub struct CacheConfig {
        /// Entry ceiling; eviction trims back to 90% of this
        max_entries: usize = 1000,

        // Price feeds
        prices_ttl_secs: u64 = 30,
        prices_stale_ttl_secs: u64 = 120,

        // Pool listings
        pools_ttl_secs: u64 = 120,
        pools_stale_ttl_secs: u64 = 300,

        // Protocol metadata
        protocols_ttl_secs: u64 = 3600,
        protocols_stale_ttl_secs: u64 = 7200,

        // Chain registry
        chains_ttl_secs: u64 = 86400,
        chains_stale_ttl_secs: u64 = 172800,

        // Fallback for uncategorized endpoints
        default_ttl_secs: u64 = 60,
        default_stale_ttl_secs: u64 = 300,
    }
}

// ============================================================================
// RATE LIMITER CONFIGURATION
// ============================================================================

config_struct! {
    /// Token-bucket budgets per rate tier.
    ///
    /// max_tokens is the burst size, refill_per_sec the steady rate.
    pub struct RateTierConfig {
        high_max_tokens: f64 = 10.0,
        high_refill_per_sec: f64 = 2.0,

        medium_max_tokens: f64 = 5.0,
        medium_refill_per_sec: f64 = 1.0,

        low_max_tokens: f64 = 3.0,
        low_refill_per_sec: f64 = 0.2,
    }
}

// ============================================================================
// HTTP CLIENT CONFIGURATION
// ============================================================================

config_struct! {
    /// Upstream HTTP client settings.
    pub struct HttpConfig {
        /// Default upstream base URL (per-endpoint overrides take precedence)
        base_url: String = "https://yields.llama.fi".to_string(),

        /// Per-request timeout
        timeout_secs: u64 = 10,

        /// Attempt budget for retryable failures
        max_retries: u32 = 3,

        /// First backoff delay; attempt n sleeps base * factor^n
        backoff_base_ms: u64 = 500,
        backoff_factor: f64 = 2.0,

        /// Connection pool sizing
        max_connections: usize = 10,
        keep_alive_secs: u64 = 90,
    }
}

// ============================================================================
// COALESCER CONFIGURATION
// ============================================================================

config_struct! {
    /// In-flight request coalescing.
    pub struct CoalescerConfig {
        /// How long a single waiter is willing to wait
        timeout_secs: u64 = 30,

        /// Sweep interval for force-failing hung fetches (2x timeout)
        cleanup_interval_secs: u64 = 30,
    }
}

// ============================================================================
// BATCHER CONFIGURATION
// ============================================================================

config_struct! {
    /// Request batching window.
    pub struct BatcherConfig {
        /// Batch window; the first addition arms the timer
        window_ms: u64 = 100,

        /// Draining early when a batch reaches this size
        max_batch_size: usize = 25,
    }
}

// ============================================================================
// ENDPOINT ROUTING OVERRIDES
// ============================================================================

/// Optional per-prefix routing override, e.g. to point a category at a
/// different host or tier than the built-in table.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EndpointOverride {
    pub prefix: String,
    #[serde(default)]
    pub base_url: Option<String>,
    /// "high" | "medium" | "low"
    #[serde(default)]
    pub tier: Option<String>,
}

// ============================================================================
// TOP-LEVEL CONFIGURATION
// ============================================================================

config_struct! {
    /// Full gateway configuration, read once at startup.
    pub struct GatewayConfig {
        cache: CacheConfig = CacheConfig::default(),
        tiers: RateTierConfig = RateTierConfig::default(),
        http: HttpConfig = HttpConfig::default(),
        coalescer: CoalescerConfig = CoalescerConfig::default(),
        batcher: BatcherConfig = BatcherConfig::default(),
        endpoints: Vec<EndpointOverride> = Vec::new(),
    }
}
