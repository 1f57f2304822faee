//! Token bucket limiting how fast compaction copies bytes.

use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct Bucket {
    /// May go negative: a large request is granted immediately and the
    /// debt is paid off by the caller sleeping.
    tokens: f64,
    last_refill: Instant,
}

/// Bytes-per-second token bucket with a one-second burst
pub struct RateLimiter {
    rate: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(bytes_per_sec: u64) -> Self {
        let rate = bytes_per_sec.max(1) as f64;
        Self {
            rate,
            bucket: Mutex::new(Bucket {
                tokens: rate,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take `bytes` tokens, blocking until the bucket is out of debt
    pub fn acquire(&self, bytes: u64) {
        let wait = self.reserve(bytes, Instant::now());
        if !wait.is_zero() {
            thread::sleep(wait);
        }
    }

    /// Take `bytes` tokens as of `now`; returns how long the caller must wait
    fn reserve(&self, bytes: u64, now: Instant) -> Duration {
        let mut bucket = self.bucket.lock();

        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * self.rate).min(self.rate);
        bucket.last_refill = now;

        bucket.tokens -= bytes as f64;
        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-bucket.tokens / self.rate)
        }
    }

    pub fn bytes_per_sec(&self) -> u64 {
        self.rate as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_within_rate_does_not_wait() {
        let limiter = RateLimiter::new(1000);
        let now = Instant::now();
        assert_eq!(limiter.reserve(400, now), Duration::ZERO);
        assert_eq!(limiter.reserve(600, now), Duration::ZERO);
    }

    #[test]
    fn test_debt_turns_into_wait() {
        let limiter = RateLimiter::new(1000);
        let now = Instant::now();
        limiter.reserve(1000, now);
        let wait = limiter.reserve(500, now);
        assert!((wait.as_secs_f64() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_refill_over_time() {
        let limiter = RateLimiter::new(1000);
        let start = Instant::now();
        limiter.reserve(1000, start);
        let later = start + Duration::from_millis(500);
        assert_eq!(limiter.reserve(500, later), Duration::ZERO);
    }
}
