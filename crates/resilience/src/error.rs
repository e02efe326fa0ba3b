//! Provider failure taxonomy.

use std::time::Duration;

use thiserror::Error;

/// Failure reported by an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Timeouts, 5xx-class failures, dropped connections.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Malformed input or a hard rejection; retrying cannot help.
    #[error("permanent provider error: {0}")]
    Permanent(String),

    /// The provider asked us to slow down.
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
}

impl ProviderError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProviderError::Permanent(_))
    }
}

/// Outcome of a guarded call that did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// Breaker is open; no attempt was made.
    #[error("circuit open for provider {provider}")]
    CircuitOpen { provider: String },

    /// Every allowed attempt failed with a retryable error.
    #[error("provider {provider} failed after {attempts} attempt(s): {last}")]
    Exhausted {
        provider: String,
        attempts: u32,
        last: ProviderError,
    },

    /// The provider answered with a permanent error.
    #[error("provider {provider} rejected the request: {reason}")]
    Rejected { provider: String, reason: String },
}

impl CallError {
    pub fn provider(&self) -> &str {
        match self {
            CallError::CircuitOpen { provider }
            | CallError::Exhausted { provider, .. }
            | CallError::Rejected { provider, .. } => provider,
        }
    }

    /// The provider could not serve the call; another provider may.
    pub fn is_unavailable(&self) -> bool {
        !matches!(self, CallError::Rejected { .. })
    }
}
