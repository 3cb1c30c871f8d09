/// Token bucket - pure time arithmetic, no concurrency
///
/// Tokens accumulate continuously at `refill_rate` up to `max_tokens`; each
/// request consumes one. Invariant: `0 <= tokens <= max_tokens` after every
/// operation. Refill and consume are the only mutators and both are
/// monotonic in the `now` they are given.
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    max_tokens: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Starts full so a quiet endpoint gets its burst budget immediately.
    pub fn new(max_tokens: f64, refill_rate: f64) -> Self {
        Self {
            tokens: max_tokens,
            max_tokens,
            refill_rate,
            last_refill: Instant::now(),
        }
    }

    /// Credit elapsed time since the last refill, clamped at capacity.
    pub fn refill_at(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
            self.last_refill = now;
        }
    }

    /// Refill, then consume one token if available. On shortfall returns the
    /// exact wait until the next token accrues.
    pub fn try_consume_at(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill_at(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(deficit / self.refill_rate))
        }
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn max_tokens(&self) -> f64 {
        self.max_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_exact_wait() {
        let mut bucket = TokenBucket::new(3.0, 0.2);
        let now = Instant::now();

        // Full burst passes immediately
        assert!(bucket.try_consume_at(now).is_ok());
        assert!(bucket.try_consume_at(now).is_ok());
        assert!(bucket.try_consume_at(now).is_ok());

        // Fourth must wait one full token: 1 / 0.2 = 5s
        let wait = bucket.try_consume_at(now).unwrap_err();
        assert!((wait.as_secs_f64() - 5.0).abs() < 0.01, "wait was {:?}", wait);
    }

    #[test]
    fn test_refill_clamps_at_capacity() {
        let mut bucket = TokenBucket::new(5.0, 10.0);
        let now = Instant::now();
        bucket.try_consume_at(now).unwrap();

        // A long idle period must not overfill
        bucket.refill_at(now + Duration::from_secs(3600));
        assert!((bucket.tokens() - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_tokens_never_negative() {
        let mut bucket = TokenBucket::new(1.0, 1.0);
        let now = Instant::now();

        assert!(bucket.try_consume_at(now).is_ok());
        // Repeated failed consumes must not drive tokens below zero
        for _ in 0..5 {
            let _ = bucket.try_consume_at(now);
            assert!(bucket.tokens() >= 0.0);
            assert!(bucket.tokens() <= bucket.max_tokens());
        }
    }

    #[test]
    fn test_partial_refill_accrues() {
        let mut bucket = TokenBucket::new(2.0, 2.0);
        let now = Instant::now();
        bucket.try_consume_at(now).unwrap();
        bucket.try_consume_at(now).unwrap();

        // 250ms at 2 tokens/sec accrues half a token: still short
        let wait = bucket
            .try_consume_at(now + Duration::from_millis(250))
            .unwrap_err();
        assert!((wait.as_secs_f64() - 0.25).abs() < 0.01);

        // After a full 500ms a token is available
        assert!(bucket
            .try_consume_at(now + Duration::from_millis(500))
            .is_ok());
    }

    #[test]
    fn test_stale_now_is_harmless() {
        // A now earlier than last_refill (clock skew between callers) must
        // not panic or credit tokens.
        let mut bucket = TokenBucket::new(2.0, 1.0);
        let now = Instant::now();
        bucket.try_consume_at(now).unwrap();
        let before = bucket.tokens();
        bucket.refill_at(now - Duration::from_secs(1));
        assert!((bucket.tokens() - before).abs() < f64::EPSILON);
    }
}
