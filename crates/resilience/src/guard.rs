//! Circuit breaker, rate limiter, timeout and retry around one provider.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot};
use crate::error::{CallError, ProviderError};
use crate::limiter::{RateLimit, TokenBucket};
use crate::retry::RetryPolicy;

/// Resilience settings for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub breaker: CircuitBreakerConfig,
    pub retry: RetryPolicy,
    pub rate_limit: RateLimit,
    /// Upper bound on a single attempt.
    pub call_timeout: Duration,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            breaker: CircuitBreakerConfig::default(),
            retry: RetryPolicy::default(),
            rate_limit: RateLimit::default(),
            call_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
pub struct ProviderGuard {
    name: String,
    breaker: CircuitBreaker,
    limiter: TokenBucket,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl ProviderGuard {
    pub fn new(name: impl Into<String>, settings: ProviderSettings) -> Self {
        let name = name.into();
        Self {
            breaker: CircuitBreaker::new(name.clone(), settings.breaker),
            limiter: TokenBucket::new(settings.rate_limit),
            retry: settings.retry,
            call_timeout: settings.call_timeout,
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn circuit(&self) -> CircuitSnapshot {
        self.breaker.snapshot()
    }

    /// Run `op` under this provider's protections.
    ///
    /// One logical call counts once against the breaker, however many attempts
    /// it takes. A permanent error is returned without retrying and leaves the
    /// failure streak as it was.
    pub async fn call<T, F, Fut>(&self, mut op: F) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let permit = self
            .breaker
            .try_acquire()
            .map_err(|e| CallError::CircuitOpen {
                provider: e.provider,
            })?;

        let mut attempts = 0u32;
        loop {
            self.limiter.acquire().await;
            attempts += 1;

            let outcome = match tokio::time::timeout(self.call_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::transient(format!(
                    "timed out after {}ms",
                    self.call_timeout.as_millis()
                ))),
            };

            let err = match outcome {
                Ok(value) => {
                    permit.succeeded();
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                // The provider refused this input; says nothing about its health.
                permit.release();
                let reason = match err {
                    ProviderError::Permanent(reason) => reason,
                    other => other.to_string(),
                };
                return Err(CallError::Rejected {
                    provider: self.name.clone(),
                    reason,
                });
            }

            if !self.retry.should_retry(attempts) {
                permit.failed();
                return Err(CallError::Exhausted {
                    provider: self.name.clone(),
                    attempts,
                    last: err,
                });
            }

            let delay = self.retry.delay_for(attempts, &err);
            debug!(
                provider = %self.name,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying provider call"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
