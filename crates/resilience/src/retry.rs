//! Retry policy with backoff and jitter.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^(retry-1)
    #[default]
    Exponential,
    /// Linear backoff: base * retry
    Linear,
}

/// Retry policy for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first (minimum 1)
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Backoff strategy
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0): each delay moves by up to ±factor of itself
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, never retried.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.2,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Deterministic delay before retry number `retry` (1-indexed), without jitter.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => {
                let exp = 2_f64.powi(retry.saturating_sub(1).min(30) as i32);
                base_ms * exp
            }
            BackoffStrategy::Linear => base_ms * f64::from(retry),
        };

        Duration::from_millis(delay_ms.min(max_ms) as u64)
    }

    /// Delay to wait before retry number `retry` after `error`.
    ///
    /// A provider's `retry_after` hint is a floor that jitter never undercuts,
    /// but the delay still never passes `max_delay`.
    pub fn delay_for(&self, retry: u32, error: &ProviderError) -> Duration {
        let delay = self.apply_jitter(self.backoff_for(retry));
        match error {
            ProviderError::RateLimited {
                retry_after: Some(hint),
            } => delay.max(*hint).min(self.max_delay),
            _ => delay,
        }
    }

    /// Whether another attempt is allowed after `attempts_made` attempts.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts.max(1)
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let secs = delay.as_secs_f64();
        let offset = (fastrand::f64() * 2.0 - 1.0) * secs * self.jitter;
        Duration::from_secs_f64((secs + offset).max(0.0)).min(self.max_delay)
    }
}
