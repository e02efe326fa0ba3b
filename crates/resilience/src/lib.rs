//! `pressroom-resilience` — guards around every external provider call.
//!
//! ## Components
//!
//! - `CircuitBreaker`: per-provider closed/open/half-open state
//! - `RetryPolicy`: bounded retries with exponential backoff and jitter
//! - `TokenBucket`: rate limiter shared by all callers of one provider
//! - `ProviderGuard`: the three above composed around a single provider
//! - `ProviderChain`: primary → secondary → deterministic fallback routing
//! - `ProviderRegistry`: owns one guard per provider name
//!
//! Nothing in this crate knows about jobs or stages.

pub mod breaker;
pub mod chain;
pub mod error;
pub mod guard;
pub mod limiter;
pub mod registry;
pub mod retry;

pub use breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitOpenError, CircuitPermit, CircuitSnapshot,
    CircuitState,
};
pub use chain::{ChainError, ProviderChain, ProviderFuture, Route, Routed};
pub use error::{CallError, ProviderError};
pub use guard::{ProviderGuard, ProviderSettings};
pub use limiter::{RateLimit, TokenBucket};
pub use registry::{ProviderHealth, ProviderRegistry};
pub use retry::{BackoffStrategy, RetryPolicy};
