// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use tracing::debug;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Per-user token bucket.  Exceeding the budget rejects the request
/// without consuming anything; tokens refill continuously.
#[derive(Default)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<i64, Bucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take one token from the user's bucket.
    pub fn try_acquire(&self, user_id: i64, capacity: u32, refill_per_minute: f64) -> bool {
        let mut buckets = self.buckets.lock().unwrap();
        let now = Instant::now();
        let bucket = buckets.entry(user_id).or_insert(Bucket {
            tokens: capacity as f64,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens =
            (bucket.tokens + elapsed * refill_per_minute / 60.0).min(capacity as f64);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            debug!(user_id, tokens = bucket.tokens, "rate limited");
            false
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_bucket_allows_up_to_capacity() {
        let rl = RateLimiter::new();
        for _ in 0..5 {
            assert!(rl.try_acquire(1, 5, 1.0));
        }
        assert!(!rl.try_acquire(1, 5, 1.0));
    }

    #[test]
    fn users_have_independent_buckets() {
        let rl = RateLimiter::new();
        for _ in 0..3 {
            assert!(rl.try_acquire(1, 3, 1.0));
        }
        assert!(!rl.try_acquire(1, 3, 1.0));
        assert!(rl.try_acquire(2, 3, 1.0));
    }

    #[test]
    fn exceeding_does_not_consume() {
        let rl = RateLimiter::new();
        assert!(rl.try_acquire(1, 1, 60.0));
        // Bucket is empty now; repeated denials must not push it negative,
        // otherwise the refill would be delayed beyond the configured rate.
        for _ in 0..10 {
            assert!(!rl.try_acquire(1, 1, 0.0001));
        }
        let buckets = rl.buckets.lock().unwrap();
        assert!(buckets.get(&1).unwrap().tokens >= 0.0);
    }

    #[test]
    fn tokens_refill_over_time() {
        let rl = RateLimiter::new();
        assert!(rl.try_acquire(1, 1, 60.0));
        assert!(!rl.try_acquire(1, 1, 60.0));
        // Backdate the refill timestamp instead of sleeping.
        {
            let mut buckets = rl.buckets.lock().unwrap();
            buckets.get_mut(&1).unwrap().last_refill =
                Instant::now() - std::time::Duration::from_secs(2);
        }
        assert!(rl.try_acquire(1, 1, 60.0));
    }

    #[test]
    fn refill_is_capped_at_capacity() {
        let rl = RateLimiter::new();
        assert!(rl.try_acquire(1, 2, 60.0));
        {
            let mut buckets = rl.buckets.lock().unwrap();
            buckets.get_mut(&1).unwrap().last_refill =
                Instant::now() - std::time::Duration::from_secs(3600);
        }
        // One hour of refill cannot exceed the capacity of 2.
        assert!(rl.try_acquire(1, 2, 60.0));
        assert!(rl.try_acquire(1, 2, 60.0));
        assert!(!rl.try_acquire(1, 2, 60.0));
    }
}
