//! Per-provider request rate limiting.

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{Quota, RateLimiter};
use serde::{Deserialize, Serialize};

type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    /// Sustained requests per second.
    pub per_second: u32,
    /// Requests allowed in a burst before throttling kicks in.
    pub burst: u32,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            per_second: 10,
            burst: 10,
        }
    }
}

impl RateLimit {
    pub fn per_second(per_second: u32) -> Self {
        Self {
            per_second,
            burst: per_second,
        }
    }
}

/// Token bucket shared by every caller of one provider.
#[derive(Clone)]
pub struct TokenBucket {
    limit: RateLimit,
    limiter: Arc<DirectRateLimiter>,
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket").field("limit", &self.limit).finish()
    }
}

impl TokenBucket {
    pub fn new(limit: RateLimit) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(limit.per_second).unwrap_or(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::new(limit.burst).unwrap_or(NonZeroU32::MIN));
        Self {
            limit,
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Wait until a request may be sent.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }

    /// Take a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }
}
