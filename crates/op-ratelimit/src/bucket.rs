// SPDX-License-Identifier: MIT OR Apache-2.0
//! The token bucket itself (spec §5's explicit departure from a sliding
//! window): each key accrues tokens continuously at `refill_per_sec` up to
//! `capacity`, and a request is allowed only while at least one token is
//! available.

use std::time::{Duration, Instant};

/// Bucket shape for one rate-limited route. `per_minute` is converted to a
/// continuous refill rate rather than reset once a minute, so a caller that
/// spends its whole budget at the start of a window recovers gradually
/// instead of bursting again at the next minute boundary.
#[derive(Debug, Clone, Copy)]
pub struct BucketConfig {
    /// Maximum tokens a bucket can hold (also the burst size).
    pub capacity: u32,
    /// Tokens granted per minute.
    pub per_minute: u32,
}

impl BucketConfig {
    /// Builds a config from a `per_minute` rate, using the rate itself as
    /// the burst capacity (matches the "N/min" presets spec §5 names).
    pub const fn per_minute(per_minute: u32) -> Self {
        Self { capacity: per_minute, per_minute }
    }

    fn refill_per_sec(&self) -> f64 {
        self.per_minute as f64 / 60.0
    }
}

/// One bucket's mutable state.
#[derive(Debug)]
pub struct TokenBucket {
    config: BucketConfig,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A freshly created bucket starts full, so the first burst up to
    /// `capacity` is never penalized.
    pub fn new(config: BucketConfig, now: Instant) -> Self {
        Self { config, tokens: config.capacity as f64, last_refill: now }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.config.refill_per_sec()).min(self.config.capacity as f64);
        self.last_refill = now;
    }

    /// Attempts to spend one token. `Ok(())` on success; `Err(retry_after)`
    /// with the wait until a token becomes available otherwise.
    pub fn try_acquire(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(());
        }
        let deficit = 1.0 - self.tokens;
        let wait_secs = deficit / self.config.refill_per_sec();
        Err(Duration::from_secs_f64(wait_secs.max(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_bucket_allows_a_burst_up_to_capacity() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(BucketConfig::per_minute(5), now);
        for _ in 0..5 {
            assert!(bucket.try_acquire(now).is_ok());
        }
        assert!(bucket.try_acquire(now).is_err());
    }

    #[test]
    fn exhausted_bucket_reports_a_retry_after_that_refills_one_token() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(BucketConfig::per_minute(60), now);
        for _ in 0..60 {
            bucket.try_acquire(now).unwrap();
        }
        let retry_after = bucket.try_acquire(now).unwrap_err();
        assert!((retry_after.as_secs_f64() - 1.0).abs() < 0.01);
    }

    #[test]
    fn tokens_refill_gradually_over_time() {
        let t0 = Instant::now();
        let mut bucket = TokenBucket::new(BucketConfig::per_minute(60), t0);
        for _ in 0..60 {
            bucket.try_acquire(t0).unwrap();
        }
        let t1 = t0 + Duration::from_secs(1);
        assert!(bucket.try_acquire(t1).is_ok());
        assert!(bucket.try_acquire(t1).is_err());
    }
}
