//! Token-bucket rate limiting keyed by client.
//!
//! A bucket that has refilled to its burst size behaves exactly like a
//! missing one, so idle buckets are swept out periodically.

use offsync_protocol::Timestamp;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    refilled_at: Timestamp,
}

/// Minimum time between sweeps of idle buckets.
const SWEEP_INTERVAL_MS: u64 = 60_000;

#[derive(Debug, Default)]
struct Buckets {
    by_key: HashMap<String, Bucket>,
    swept_at: Timestamp,
}

/// Per-key token buckets.
#[derive(Debug)]
pub struct RateLimiter {
    rate_per_sec: f64,
    burst: f64,
    buckets: Mutex<Buckets>,
}

impl RateLimiter {
    /// Creates a limiter refilling `rate_per_sec` tokens up to `burst`.
    pub fn new(rate_per_sec: u32, burst: u32) -> Self {
        Self {
            rate_per_sec: f64::from(rate_per_sec),
            burst: f64::from(burst.max(1)),
            buckets: Mutex::new(Buckets::default()),
        }
    }

    /// Takes one token for `key`.
    ///
    /// Returns `Err(seconds)` with the wait until the next token when the
    /// bucket is empty.
    pub fn check(&self, key: &str, now: Timestamp) -> Result<(), u64> {
        let mut buckets = self.buckets.lock();
        if now.saturating_sub(buckets.swept_at) >= SWEEP_INTERVAL_MS {
            self.sweep(&mut buckets, now);
        }
        let bucket = buckets.by_key.entry(key.to_string()).or_insert(Bucket {
            tokens: self.burst,
            refilled_at: now,
        });

        let elapsed_secs = now.saturating_sub(bucket.refilled_at) as f64 / 1000.0;
        bucket.tokens = (bucket.tokens + elapsed_secs * self.rate_per_sec).min(self.burst);
        bucket.refilled_at = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(());
        }
        if self.rate_per_sec <= 0.0 {
            return Err(60);
        }
        let wait = ((1.0 - bucket.tokens) / self.rate_per_sec).ceil();
        Err(if wait < 1.0 { 1 } else { wait as u64 })
    }

    /// Number of tracked buckets.
    pub fn len(&self) -> usize {
        self.buckets.lock().by_key.len()
    }

    /// Whether no bucket is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets every bucket.
    pub fn reset(&self) {
        self.buckets.lock().by_key.clear();
    }

    fn sweep(&self, buckets: &mut Buckets, now: Timestamp) {
        let (rate, burst) = (self.rate_per_sec, self.burst);
        buckets.by_key.retain(|_, bucket| {
            let elapsed_secs = now.saturating_sub(bucket.refilled_at) as f64 / 1000.0;
            bucket.tokens + elapsed_secs * rate < burst
        });
        buckets.swept_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_then_throttle() {
        let limiter = RateLimiter::new(1, 3);
        for _ in 0..3 {
            assert!(limiter.check("a", 0).is_ok());
        }
        assert_eq!(limiter.check("a", 0), Err(1));
        assert!(limiter.check("b", 0).is_ok());
    }

    #[test]
    fn idle_buckets_are_swept() {
        let limiter = RateLimiter::new(1, 2);
        for i in 0..100 {
            assert!(limiter.check(&format!("client-{i}"), 1_000).is_ok());
        }
        assert_eq!(limiter.len(), 100);

        // Every bucket has refilled by the next sweep; only the caller's stays.
        assert!(limiter.check("client-0", 61_000).is_ok());
        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn tokens_refill_over_time() {
        let limiter = RateLimiter::new(2, 2);
        assert!(limiter.check("a", 0).is_ok());
        assert!(limiter.check("a", 0).is_ok());
        assert!(limiter.check("a", 100).is_err());
        assert!(limiter.check("a", 600).is_ok());
    }
}
