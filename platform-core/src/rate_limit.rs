//! Rate Limiter (§4.2): classical floating-point token bucket per caller key,
//! with idle-bucket cleanup.
//!
//! Grounded on `auth.rs`'s `RateLimitState`/`SlidingWindow` in-memory path:
//! a `DashMap` of per-key state, refilled lazily at call time rather than on
//! a ticking background clock, plus a periodic sweep for idle entries.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::PlatformError;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    pub rate_per_second: f64,
    pub burst: f64,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// One token bucket per caller key (`runtime_id`, or source IP for anonymous
/// endpoints like `Handshake`).
pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
    idle_threshold: Duration,
}

impl RateLimiter {
    pub fn new(idle_threshold: Duration) -> Arc<Self> {
        Arc::new(Self {
            buckets: DashMap::new(),
            idle_threshold,
        })
    }

    /// Admit-or-deny one request for `key` under `policy`. Refills by
    /// `min(burst, tokens + rate * elapsed)` before deducting one token;
    /// the monotonic `Instant` clock never runs backwards so refill amounts
    /// are never negative.
    pub fn allow(&self, key: &str, policy: RateLimitPolicy) -> Result<(), PlatformError> {
        let now = Instant::now();
        let mut entry = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket {
                tokens: policy.burst,
                last_refill: now,
            });

        let elapsed = now.saturating_duration_since(entry.last_refill).as_secs_f64();
        entry.tokens = (entry.tokens + policy.rate_per_second * elapsed).min(policy.burst);
        entry.last_refill = now;

        if entry.tokens >= 1.0 {
            entry.tokens -= 1.0;
            Ok(())
        } else {
            Err(PlatformError::ResourceExhausted {
                message: format!("rate limit exceeded for '{key}'"),
            })
        }
    }

    /// Remove buckets that haven't been touched in `idle_threshold`; bounds
    /// memory for callers that stop sending traffic entirely.
    pub fn sweep_idle(&self) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_refill) <= self.idle_threshold);
        before - self.buckets.len()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Spawn the idle-bucket sweep task.
pub fn spawn_sweeper(limiter: Arc<RateLimiter>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = limiter.sweep_idle();
            if removed > 0 {
                tracing::debug!(removed, "rate limiter swept idle buckets");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(rate: f64, burst: f64) -> RateLimitPolicy {
        RateLimitPolicy {
            rate_per_second: rate,
            burst,
        }
    }

    #[test]
    fn burst_allows_up_to_capacity() {
        let limiter = RateLimiter::new(Duration::from_secs(300));
        let p = policy(1.0, 5.0);
        for _ in 0..5 {
            assert!(limiter.allow("caller", p).is_ok());
        }
        assert!(limiter.allow("caller", p).is_err());
    }

    #[test]
    fn distinct_keys_have_independent_buckets() {
        let limiter = RateLimiter::new(Duration::from_secs(300));
        let p = policy(1.0, 1.0);
        assert!(limiter.allow("a", p).is_ok());
        assert!(limiter.allow("b", p).is_ok());
        assert!(limiter.allow("a", p).is_err());
    }

    #[test]
    fn sweep_removes_only_idle_buckets() {
        let limiter = RateLimiter::new(Duration::from_millis(0));
        let p = policy(1.0, 1.0);
        limiter.allow("stale", p).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let removed = limiter.sweep_idle();
        assert_eq!(removed, 1);
        assert!(limiter.is_empty());
    }
}
