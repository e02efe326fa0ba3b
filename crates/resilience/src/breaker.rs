//! Per-provider circuit breaker.
//!
//! ```text
//! closed ──K consecutive failures──► open ──cooldown elapsed──► half_open
//!   ▲                                 ▲                            │
//!   └──────────probe succeeded────────┼────────────────────────────┤
//!                                     └───────probe failed─────────┘
//! ```
//!
//! While half-open exactly one call (the probe) is let through; everyone else
//! fails fast until the probe reports back. Only the probe decides whether a
//! half-open circuit closes or reopens. Calls admitted earlier that finish
//! after the circuit left `closed` do not move it.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failed calls that open the circuit.
    pub failure_threshold: u32,
    /// Time spent open before a probe is allowed.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Point-in-time view of a breaker, safe to serialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit open for provider {provider}")]
pub struct CircuitOpenError {
    pub provider: String,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    opened_at_wall: Option<DateTime<Utc>>,
    probe_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    provider: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

/// Admission granted by [`CircuitBreaker::try_acquire`].
///
/// Report the outcome with [`CircuitPermit::succeeded`] or
/// [`CircuitPermit::failed`], or [`CircuitPermit::release`] when the call says
/// nothing about provider health. Dropping an unresolved probe permit frees
/// the half-open slot so the next caller can probe instead.
#[derive(Debug)]
#[must_use]
pub struct CircuitPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    resolved: bool,
}

impl CircuitPermit<'_> {
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn succeeded(mut self) {
        self.resolved = true;
        self.breaker.record_success(self.probe);
    }

    pub fn failed(mut self) {
        self.resolved = true;
        self.breaker.record_failure(self.probe);
    }

    /// Resolve without touching the failure streak or the circuit state.
    pub fn release(self) {
        // Drop frees the probe slot.
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if self.probe && !self.resolved {
            self.breaker.free_probe_slot();
        }
    }
}

impl CircuitBreaker {
    pub fn new(provider: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            provider: provider.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                opened_at_wall: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        CircuitSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            opened_at: inner.opened_at_wall,
        }
    }

    /// Ask to make a call. Fails fast when open or while a probe is in flight.
    pub fn try_acquire(&self) -> Result<CircuitPermit<'_>, CircuitOpenError> {
        let mut inner = self.lock();
        let probe = match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= self.config.cooldown);
                if !cooled {
                    return Err(self.open_error());
                }
                inner.state = CircuitState::HalfOpen;
                inner.probe_in_flight = true;
                info!(provider = %self.provider, "circuit half-open");
                true
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    return Err(self.open_error());
                }
                inner.probe_in_flight = true;
                true
            }
        };

        Ok(CircuitPermit {
            breaker: self,
            probe,
            resolved: false,
        })
    }

    fn record_success(&self, probe: bool) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen if probe => {
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.opened_at_wall = None;
                inner.probe_in_flight = false;
                info!(provider = %self.provider, "circuit closed");
            }
            // Late result from a call admitted before the circuit opened.
            _ => {}
        }
    }

    fn record_failure(&self, probe: bool) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.trip(&mut inner);
                }
            }
            CircuitState::HalfOpen if probe => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                self.trip(&mut inner);
            }
            _ => {}
        }
    }

    fn free_probe_slot(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.probe_in_flight = false;
        }
    }

    fn trip(&self, inner: &mut Inner) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.opened_at_wall = Some(Utc::now());
        inner.probe_in_flight = false;
        warn!(
            provider = %self.provider,
            consecutive_failures = inner.consecutive_failures,
            cooldown_ms = self.config.cooldown.as_millis() as u64,
            "circuit opened"
        );
    }

    fn open_error(&self) -> CircuitOpenError {
        CircuitOpenError {
            provider: self.provider.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("circuit breaker lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, cooldown_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "classifier-a",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                cooldown: Duration::from_secs(cooldown_secs),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_consecutive_failures() {
        let cb = breaker(3, 10);

        for _ in 0..2 {
            cb.try_acquire().unwrap().failed();
            assert_eq!(cb.state(), CircuitState::Closed);
        }
        cb.try_acquire().unwrap().failed();

        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.snapshot().opened_at.is_some());
        assert!(cb.try_acquire().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_the_failure_streak() {
        let cb = breaker(3, 10);
        cb.try_acquire().unwrap().failed();
        cb.try_acquire().unwrap().failed();
        cb.try_acquire().unwrap().succeeded();
        cb.try_acquire().unwrap().failed();

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exactly_one_probe_after_cooldown() {
        let cb = breaker(1, 10);
        cb.try_acquire().unwrap().failed();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(cb.try_acquire().is_err());

        tokio::time::advance(Duration::from_secs(1)).await;
        let probe = cb.try_acquire().unwrap();
        assert!(probe.is_probe());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // Second caller while the probe is in flight fails fast.
        assert!(cb.try_acquire().is_err());

        probe.succeeded();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(!cb.try_acquire().unwrap().is_probe());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_reopens_and_restarts_cooldown() {
        let cb = breaker(1, 10);
        cb.try_acquire().unwrap().failed();

        tokio::time::advance(Duration::from_secs(10)).await;
        cb.try_acquire().unwrap().failed();
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(cb.try_acquire().is_err());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(cb.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_probe_frees_the_half_open_slot() {
        let cb = breaker(1, 1);
        cb.try_acquire().unwrap().failed();
        tokio::time::advance(Duration::from_secs(1)).await;

        let probe = cb.try_acquire().unwrap();
        drop(probe);

        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.try_acquire().unwrap().is_probe());
    }

    #[tokio::test(start_paused = true)]
    async fn late_success_does_not_close_an_open_circuit() {
        let cb = breaker(1, 10);
        let a = cb.try_acquire().unwrap();
        let b = cb.try_acquire().unwrap();

        a.failed();
        assert_eq!(cb.state(), CircuitState::Open);

        b.succeeded();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.try_acquire().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn only_the_probe_resolves_a_half_open_circuit() {
        let cb = breaker(1, 10);
        let early = cb.try_acquire().unwrap();
        let late = cb.try_acquire().unwrap();
        early.failed();

        tokio::time::advance(Duration::from_secs(10)).await;
        let probe = cb.try_acquire().unwrap();
        assert!(probe.is_probe());

        late.succeeded();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.try_acquire().is_err());

        probe.succeeded();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn late_failure_does_not_reopen_a_half_open_circuit() {
        let cb = breaker(1, 10);
        let early = cb.try_acquire().unwrap();
        let late = cb.try_acquire().unwrap();
        early.failed();

        tokio::time::advance(Duration::from_secs(10)).await;
        let probe = cb.try_acquire().unwrap();
        late.failed();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        probe.succeeded();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn released_permit_keeps_the_failure_streak() {
        let cb = breaker(2, 10);
        cb.try_acquire().unwrap().failed();
        cb.try_acquire().unwrap().release();
        cb.try_acquire().unwrap().failed();

        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn released_probe_frees_the_half_open_slot() {
        let cb = breaker(1, 1);
        cb.try_acquire().unwrap().failed();
        tokio::time::advance(Duration::from_secs(1)).await;

        cb.try_acquire().unwrap().release();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.try_acquire().unwrap().is_probe());
    }
}
