//! Token-bucket rate limiter for outbound vendor calls.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Deserialize;

/// Rate limiter tunables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Steady refill rate.
    pub requests_per_second: f64,
    /// Bucket capacity; bursts up to this many calls pass without waiting.
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 5.0,
            burst: 10,
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket shared by every call through one client instance.
///
/// `wait` blocks until a token is available; dropping the future (caller
/// cancellation) abandons the wait without consuming a token.
pub struct RateLimiter {
    rate: f64,
    capacity: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let capacity = f64::from(config.burst.max(1));
        Self {
            rate: config.requests_per_second.max(f64::MIN_POSITIVE),
            capacity,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take a token now, or report how long until one is available.
    fn try_acquire(&self) -> std::result::Result<(), Duration> {
        let mut bucket = self.bucket.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - bucket.tokens;
            Err(Duration::from_secs_f64(deficit / self.rate))
        }
    }

    /// Block until a token is available.
    pub async fn wait(&self) {
        loop {
            match self.try_acquire() {
                Ok(()) => return,
                Err(delay) => tokio::time::sleep(delay).await,
            }
        }
    }
}
