/// Per-endpoint rate limiting with queue-by-delay semantics
///
/// One token bucket per `(endpoint, tier)`, created lazily from the tier's
/// configured budget. A caller that finds the bucket empty sleeps for the
/// exact token deficit and then proceeds - requests are delayed, never
/// rejected, which trades latency for upstream-friendliness and avoids
/// client-side retry storms.
///
/// The bucket map lock is only held for the consume attempt itself; all
/// sleeping and all fetching happen outside it so one saturated endpoint
/// never blocks another.
use crate::config::RateTierConfig;
use crate::logger::{self, LogTag};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub mod bucket;

pub use bucket::TokenBucket;

/// Request budget tier for an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateTier {
    High,
    Medium,
    Low,
}

impl RateTier {
    /// `(max_tokens, refill_per_sec)` for this tier.
    pub fn limits(&self, config: &RateTierConfig) -> (f64, f64) {
        match self {
            RateTier::High => (config.high_max_tokens, config.high_refill_per_sec),
            RateTier::Medium => (config.medium_max_tokens, config.medium_refill_per_sec),
            RateTier::Low => (config.low_max_tokens, config.low_refill_per_sec),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Some(RateTier::High),
            "medium" => Some(RateTier::Medium),
            "low" => Some(RateTier::Low),
            _ => None,
        }
    }
}

impl std::fmt::Display for RateTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RateTier::High => "high",
            RateTier::Medium => "medium",
            RateTier::Low => "low",
        };
        write!(f, "{}", name)
    }
}

/// Rate limiter counters for monitoring.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RateLimiterStats {
    pub immediate: u64,
    pub queued: u64,
    pub total_wait_ms: u64,
    pub avg_wait_ms: f64,
}

#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<String, TokenBucket>>>,
    config: RateTierConfig,
    immediate: Arc<AtomicU64>,
    queued: Arc<AtomicU64>,
    total_wait_ms: Arc<AtomicU64>,
}

impl RateLimiter {
    pub fn new(config: RateTierConfig) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            config,
            immediate: Arc::new(AtomicU64::new(0)),
            queued: Arc::new(AtomicU64::new(0)),
            total_wait_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Wait for a token on `(endpoint, tier)`, then run the fetcher.
    pub async fn execute<F, Fut, T>(&self, endpoint: &str, tier: RateTier, fetcher: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let key = format!("{}:{}", endpoint, tier);
        let mut waited = Duration::ZERO;

        loop {
            let deficit = {
                let mut buckets = self.buckets.lock().await;
                let bucket = buckets.entry(key.clone()).or_insert_with(|| {
                    let (max_tokens, refill) = tier.limits(&self.config);
                    TokenBucket::new(max_tokens, refill)
                });
                match bucket.try_consume_at(Instant::now()) {
                    Ok(()) => None,
                    Err(wait) => Some(wait),
                }
            };

            match deficit {
                None => break,
                Some(wait) => {
                    if waited.is_zero() {
                        self.queued.fetch_add(1, Ordering::Relaxed);
                        logger::debug(
                            LogTag::RateLimit,
                            &format!("{} exhausted, queuing for {:?}", key, wait),
                        );
                    }
                    waited += wait;
                    tokio::time::sleep(wait).await;
                }
            }
        }

        if waited.is_zero() {
            self.immediate.fetch_add(1, Ordering::Relaxed);
        } else {
            self.total_wait_ms
                .fetch_add(waited.as_millis() as u64, Ordering::Relaxed);
        }

        fetcher().await
    }

    pub fn get_stats(&self) -> RateLimiterStats {
        let immediate = self.immediate.load(Ordering::Relaxed);
        let queued = self.queued.load(Ordering::Relaxed);
        let total_wait_ms = self.total_wait_ms.load(Ordering::Relaxed);
        RateLimiterStats {
            immediate,
            queued,
            total_wait_ms,
            avg_wait_ms: if queued == 0 {
                0.0
            } else {
                total_wait_ms as f64 / queued as f64
            },
        }
    }
}
