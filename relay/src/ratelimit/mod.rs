use dashmap::DashMap;
use std::time::Instant;

/// Per-peer token bucket (spec.md §3 `TokenBucket`). `capacity` is derived
/// from the peer's payment rate; `refill_rate` is always `capacity / 60`.
struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            capacity,
            refill_rate: capacity / 60.0,
            tokens: capacity,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    fn try_consume(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn set_capacity(&mut self, capacity: f64) {
        self.capacity = capacity;
        self.refill_rate = capacity / 60.0;
        self.tokens = self.tokens.min(self.capacity);
    }
}

/// Per-peer rate limiter (spec.md §4.5). Buckets are created lazily on
/// first use, default capacity 100 requests/minute, and are never shared
/// across peers.
pub struct RateLimiter {
    buckets: DashMap<String, TokenBucket>,
    default_capacity: f64,
    base_rate: f64,
}

impl RateLimiter {
    pub fn new(default_capacity: f64, base_rate: f64) -> Self {
        Self {
            buckets: DashMap::new(),
            default_capacity,
            base_rate,
        }
    }

    pub fn try_consume(&self, peer: &str) -> bool {
        let now = Instant::now();
        let mut bucket = self
            .buckets
            .entry(peer.to_string())
            .or_insert_with(|| TokenBucket::new(self.default_capacity, now));
        bucket.try_consume(now)
    }

    /// `capacity := (payment_amount / base_rate) * 100` (spec.md §4.5).
    pub fn set_capacity(&self, peer: &str, payment_amount: f64) {
        let now = Instant::now();
        let capacity = (payment_amount / self.base_rate) * 100.0;
        let mut bucket = self
            .buckets
            .entry(peer.to_string())
            .or_insert_with(|| TokenBucket::new(self.default_capacity, now));
        bucket.set_capacity(capacity);
    }

    /// Drops a peer's bucket; a future call starts over at default capacity.
    pub fn remove(&self, peer: &str) {
        self.buckets.remove(peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn default_capacity_bounds_consecutive_consumes() {
        let limiter = RateLimiter::new(5.0, 100.0);
        for _ in 0..5 {
            assert!(limiter.try_consume("peer"));
        }
        assert!(!limiter.try_consume("peer"));
    }

    #[test]
    fn buckets_are_independent_per_peer() {
        let limiter = RateLimiter::new(1.0, 100.0);
        assert!(limiter.try_consume("alice"));
        assert!(!limiter.try_consume("alice"));
        assert!(limiter.try_consume("bob"));
    }

    #[test]
    fn refill_grants_tokens_back_over_time() {
        let limiter = RateLimiter::new(60.0, 100.0);
        for _ in 0..60 {
            assert!(limiter.try_consume("peer"));
        }
        assert!(!limiter.try_consume("peer"));
        sleep(Duration::from_millis(1100));
        assert!(limiter.try_consume("peer"));
    }

    #[test]
    fn set_capacity_clamps_existing_tokens() {
        let limiter = RateLimiter::new(100.0, 100.0);
        limiter.try_consume("peer");
        limiter.set_capacity("peer", 1.0);
        // capacity is now (1/100)*100 = 1, well below the 99 tokens left
        // before the clamp; only one more consume should succeed.
        assert!(limiter.try_consume("peer"));
        assert!(!limiter.try_consume("peer"));
    }

    #[test]
    fn remove_resets_state_to_default_capacity() {
        let limiter = RateLimiter::new(1.0, 100.0);
        limiter.try_consume("peer");
        assert!(!limiter.try_consume("peer"));
        limiter.remove("peer");
        assert!(limiter.try_consume("peer"));
    }
}
