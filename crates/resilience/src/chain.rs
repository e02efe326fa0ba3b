//! Ordered provider chain: primary, secondaries, then a deterministic fallback.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::error::{CallError, ProviderError};
use crate::guard::ProviderGuard;

pub type ProviderFuture<T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'static>>;

/// Which link of the chain produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Primary,
    Secondary,
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Routed<T> {
    pub value: T,
    /// Name of the provider that answered, or the chain's fallback label.
    pub provider: String,
    pub route: Route,
}

impl<T> Routed<T> {
    pub fn is_fallback(&self) -> bool {
        self.route == Route::Fallback
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// A provider rejected the input; no other provider is tried.
    #[error("{chain}: {source}")]
    Rejected {
        chain: String,
        #[source]
        source: CallError,
    },

    /// Every provider was unavailable and no fallback is configured.
    #[error("{chain}: all {attempted} provider(s) unavailable; last: {last}")]
    Unavailable {
        chain: String,
        attempted: usize,
        last: String,
    },

    #[error("{chain}: fallback failed: {error}")]
    FallbackFailed { chain: String, error: ProviderError },
}

/// Providers for one collaborator role, tried in order.
pub struct ProviderChain<C: ?Sized> {
    name: String,
    entries: Vec<(Arc<ProviderGuard>, Arc<C>)>,
    fallback: Option<Arc<C>>,
}

impl<C: ?Sized> Clone for ProviderChain<C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            entries: self.entries.clone(),
            fallback: self.fallback.clone(),
        }
    }
}

impl<C: ?Sized> std::fmt::Debug for ProviderChain<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderChain")
            .field("name", &self.name)
            .field(
                "providers",
                &self.entries.iter().map(|(g, _)| g.name()).collect::<Vec<_>>(),
            )
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl<C: ?Sized + Send + Sync + 'static> ProviderChain<C> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
            fallback: None,
        }
    }

    pub fn with_provider(mut self, guard: Arc<ProviderGuard>, provider: Arc<C>) -> Self {
        self.entries.push((guard, provider));
        self
    }

    pub fn with_fallback(mut self, fallback: Arc<C>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn guards(&self) -> impl Iterator<Item = &Arc<ProviderGuard>> {
        self.entries.iter().map(|(g, _)| g)
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Nothing to call at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.fallback.is_none()
    }

    /// Call providers in order until one answers.
    ///
    /// Unavailability (open circuit, exhausted retries) moves on to the next
    /// provider. A rejection stops the chain: the input is the problem.
    pub async fn invoke<T, F>(&self, call: F) -> Result<Routed<T>, ChainError>
    where
        F: Fn(Arc<C>) -> ProviderFuture<T>,
    {
        let mut last: Option<CallError> = None;

        for (index, (guard, provider)) in self.entries.iter().enumerate() {
            let route = if index == 0 {
                Route::Primary
            } else {
                Route::Secondary
            };

            match guard.call(|| call(provider.clone())).await {
                Ok(value) => {
                    if route == Route::Secondary {
                        info!(chain = %self.name, provider = guard.name(), "served by secondary provider");
                    }
                    return Ok(Routed {
                        value,
                        provider: guard.name().to_string(),
                        route,
                    });
                }
                Err(err) if err.is_unavailable() => {
                    warn!(chain = %self.name, provider = guard.name(), error = %err, "provider unavailable");
                    last = Some(err);
                }
                Err(err) => {
                    return Err(ChainError::Rejected {
                        chain: self.name.clone(),
                        source: err,
                    });
                }
            }
        }

        let Some(fallback) = &self.fallback else {
            return Err(ChainError::Unavailable {
                chain: self.name.clone(),
                attempted: self.entries.len(),
                last: last
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no providers configured".to_string()),
            });
        };

        warn!(
            chain = %self.name,
            fallback = true,
            attempted = self.entries.len(),
            "deterministic fallback used"
        );
        match call(fallback.clone()).await {
            Ok(value) => Ok(Routed {
                value,
                provider: format!("{}-fallback", self.name),
                route: Route::Fallback,
            }),
            Err(error) => Err(ChainError::FallbackFailed {
                chain: self.name.clone(),
                error,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::breaker::{CircuitBreakerConfig, CircuitState};
    use crate::guard::ProviderSettings;
    use crate::limiter::RateLimit;
    use crate::retry::RetryPolicy;

    trait Echo: Send + Sync {
        fn echo(&self) -> Result<String, ProviderError>;
    }

    struct Fixed(Result<String, ProviderError>, AtomicU32);

    impl Fixed {
        fn ok(s: &str) -> Arc<Self> {
            Arc::new(Self(Ok(s.to_string()), AtomicU32::new(0)))
        }
        fn err(e: ProviderError) -> Arc<Self> {
            Arc::new(Self(Err(e), AtomicU32::new(0)))
        }
        fn calls(&self) -> u32 {
            self.1.load(Ordering::SeqCst)
        }
    }

    impl Echo for Fixed {
        fn echo(&self) -> Result<String, ProviderError> {
            self.1.fetch_add(1, Ordering::SeqCst);
            self.0.clone()
        }
    }

    fn guard(name: &str) -> Arc<ProviderGuard> {
        Arc::new(ProviderGuard::new(
            name,
            ProviderSettings {
                breaker: CircuitBreakerConfig {
                    failure_threshold: 1,
                    cooldown: Duration::from_secs(60),
                },
                retry: RetryPolicy::no_retry(),
                rate_limit: RateLimit::per_second(1_000),
                call_timeout: Duration::from_secs(1),
            },
        ))
    }

    fn call(p: Arc<dyn Echo>) -> ProviderFuture<String> {
        Box::pin(async move { p.echo() })
    }

    #[tokio::test(start_paused = true)]
    async fn primary_answers() {
        let chain = ProviderChain::<dyn Echo>::new("echo")
            .with_provider(guard("a"), Fixed::ok("a"))
            .with_fallback(Fixed::ok("fb"));

        let routed = chain.invoke(call).await.unwrap();
        assert_eq!(routed.value, "a");
        assert_eq!(routed.route, Route::Primary);
    }

    #[tokio::test(start_paused = true)]
    async fn fails_over_to_secondary() {
        let chain = ProviderChain::<dyn Echo>::new("echo")
            .with_provider(guard("a"), Fixed::err(ProviderError::transient("down")))
            .with_provider(guard("b"), Fixed::ok("b"));

        let routed = chain.invoke(call).await.unwrap();
        assert_eq!(routed.value, "b");
        assert_eq!(routed.provider, "b");
        assert_eq!(routed.route, Route::Secondary);
    }

    #[tokio::test(start_paused = true)]
    async fn open_primary_is_skipped_and_fallback_used() {
        let primary = Fixed::err(ProviderError::transient("down"));
        let ga = guard("a");
        let chain = ProviderChain::<dyn Echo>::new("echo")
            .with_provider(ga.clone(), primary.clone())
            .with_fallback(Fixed::ok("fb"));

        let first = chain.invoke(call).await.unwrap();
        assert!(first.is_fallback());
        assert_eq!(ga.circuit().state, CircuitState::Open);

        let second = chain.invoke(call).await.unwrap();
        assert_eq!(second.route, Route::Fallback);
        assert_eq!(second.provider, "echo-fallback");
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_does_not_fail_over() {
        let secondary = Fixed::ok("b");
        let chain = ProviderChain::<dyn Echo>::new("echo")
            .with_provider(guard("a"), Fixed::err(ProviderError::permanent("bad")))
            .with_provider(guard("b"), secondary.clone())
            .with_fallback(Fixed::ok("fb"));

        let err = chain.invoke(call).await.unwrap_err();
        assert!(matches!(err, ChainError::Rejected { .. }));
        assert_eq!(secondary.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_without_fallback() {
        let chain = ProviderChain::<dyn Echo>::new("echo")
            .with_provider(guard("a"), Fixed::err(ProviderError::transient("down")));

        let err = chain.invoke(call).await.unwrap_err();
        assert!(matches!(err, ChainError::Unavailable { attempted: 1, .. }));
    }
}
