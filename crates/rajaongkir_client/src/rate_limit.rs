//! Rate limiter for the RajaOngkir API.
//!
//! One shared bucket: every outbound request, whichever endpoint, draws from it.

use governor::{Quota, RateLimiter as GovLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

#[derive(Clone)]
pub struct RateLimiter {
    limiter: Arc<GovLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>>,
}

impl RateLimiter {
    /// Create with a per-second request budget. Zero is treated as one.
    pub fn per_second(requests_per_sec: u32) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(requests_per_sec).unwrap_or(NonZeroU32::MIN));

        Self {
            limiter: Arc::new(GovLimiter::direct(quota)),
        }
    }

    /// Wait until a request slot is available.
    pub async fn wait(&self) {
        self.limiter.until_ready().await;
    }

    /// Try to acquire a slot without waiting. Returns true if acquired.
    #[cfg(test)]
    fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").finish_non_exhaustive()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::per_second(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_is_bounded_by_quota() {
        let limiter = RateLimiter::per_second(3);
        let granted = (0..10).filter(|_| limiter.try_acquire()).count();
        assert_eq!(granted, 3);
    }

    #[test]
    fn test_zero_quota_still_allows_one() {
        let limiter = RateLimiter::per_second(0);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }
}
