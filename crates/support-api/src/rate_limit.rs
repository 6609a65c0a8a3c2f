use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("rate limit exceeded ({rps} chat requests/s): try again in ~{}ms", .retry_after.as_millis())]
pub struct RateLimitExceeded {
    pub rps: u32,
    pub retry_after: Duration,
}

/// Token bucket shared by every chat request. Each chat turn can cost several
/// upstream model calls, so it is the only route that is limited.
#[derive(Clone)]
pub struct RateLimiter {
    rps: u32,
    bucket: Arc<Mutex<Bucket>>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

impl Bucket {
    fn refill(&mut self, rate: f64, now: Instant) {
        let earned = now.duration_since(self.refilled_at).as_secs_f64() * rate;
        self.tokens = (self.tokens + earned).min(rate);
        self.refilled_at = now;
    }
}

impl RateLimiter {
    pub fn new(rps: u32) -> Self {
        let rps = rps.max(1);
        Self {
            rps,
            bucket: Arc::new(Mutex::new(Bucket {
                tokens: f64::from(rps),
                refilled_at: Instant::now(),
            })),
        }
    }

    /// Take one token, or report how long until the next one is available.
    pub async fn check(&self) -> Result<(), RateLimitExceeded> {
        let rate = f64::from(self.rps);
        let mut bucket = self.bucket.lock().await;
        bucket.refill(rate, Instant::now());

        if bucket.tokens < 1.0 {
            return Err(RateLimitExceeded {
                rps: self.rps,
                retry_after: Duration::from_secs_f64((1.0 - bucket.tokens) / rate),
            });
        }
        bucket.tokens -= 1.0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_is_capped_at_rps() {
        let limiter = RateLimiter::new(2);
        assert!(limiter.check().await.is_ok());
        assert!(limiter.check().await.is_ok());
        let err = limiter.check().await.unwrap_err();
        assert_eq!(err.rps, 2);
        assert!(err.retry_after <= Duration::from_millis(500));
        assert!(err.to_string().starts_with("rate limit exceeded"));
    }

    #[tokio::test]
    async fn tokens_refill_over_time() {
        let limiter = RateLimiter::new(20);
        for _ in 0..20 {
            limiter.check().await.unwrap();
        }
        assert!(limiter.check().await.is_err());
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(limiter.check().await.is_ok());
    }
}
