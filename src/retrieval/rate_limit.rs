//! Token-bucket rate limiting for outbound requests

use governor::{
    clock::DefaultClock,
    state::{direct::NotKeyed, InMemoryState},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Direct (unkeyed) token bucket shared by all calls to one upstream
pub struct RequestLimiter {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl RequestLimiter {
    /// Create a limiter refilling `per_second` tokens with a bucket of `burst`
    pub fn new(per_second: u32, burst: u32) -> Self {
        let rate = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst).unwrap_or(rate);
        let quota = Quota::per_second(rate).allow_burst(burst);

        Self {
            limiter: RateLimiter::direct(quota),
        }
    }

    /// Wait for a token, or bail out on cancellation
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            _ = self.limiter.until_ready() => Ok(()),
        }
    }

    /// Take a token if one is available right now
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[test]
    fn test_burst_then_blocked() {
        let limiter = RequestLimiter::new(1, 3);

        for _ in 0..3 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn test_zero_rate_falls_back_to_one() {
        let limiter = RequestLimiter::new(0, 0);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_acquire_respects_cancellation() {
        let limiter = RequestLimiter::new(1, 1);
        let cancel = CancellationToken::new();

        assert_ok!(limiter.acquire(&cancel).await);

        cancel.cancel();
        let result = limiter.acquire(&cancel).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
