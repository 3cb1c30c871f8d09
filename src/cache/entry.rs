/// Cache entry with a tri-state freshness lifecycle
///
/// An entry moves through Fresh -> StaleUsable -> Expired as wall-clock time
/// passes; the classification is computed, never stored, so there is no
/// state to keep in sync.
use serde_json::Value;
use std::time::{Duration, Instant};

/// Freshness classification of an entry at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Within ttl: serve directly, no upstream involvement.
    Fresh,
    /// Past ttl but within stale_ttl: serve immediately, refresh behind.
    StaleUsable,
    /// Past stale_ttl: only usable as a degraded fallback.
    Expired,
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Value,
    pub created_at: Instant,
    pub ttl: Duration,
    pub stale_ttl: Duration,
    pub hit_count: u64,
}

impl CacheEntry {
    /// Invariant: stale_ttl >= ttl; both measured from created_at.
    pub fn new(value: Value, ttl: Duration, stale_ttl: Duration) -> Self {
        Self {
            value,
            created_at: Instant::now(),
            ttl,
            stale_ttl: stale_ttl.max(ttl),
            hit_count: 0,
        }
    }

    pub fn freshness_at(&self, now: Instant) -> Freshness {
        let age = now.saturating_duration_since(self.created_at);
        if age < self.ttl {
            Freshness::Fresh
        } else if age < self.stale_ttl {
            Freshness::StaleUsable
        } else {
            Freshness::Expired
        }
    }

    pub fn freshness(&self) -> Freshness {
        self.freshness_at(Instant::now())
    }

    /// Replace the value after a refresh; hit_count survives so eviction
    /// still sees the key's popularity.
    pub fn replace(&mut self, value: Value) {
        self.value = value;
        self.created_at = Instant::now();
    }
}
