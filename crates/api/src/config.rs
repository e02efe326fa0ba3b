//! Process configuration, read from the environment.
//!
//! Every key has a default so the server starts with no environment at all
//! (in-memory ledger, no external collaborators).

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use pressroom_resilience::{CircuitBreakerConfig, ProviderSettings, RateLimit, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Base URLs of the JSON-over-HTTP collaborators. Unset means "not wired".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoints {
    pub fetcher: Option<String>,
    pub classifier: Option<String>,
    pub classifier_secondary: Option<String>,
    pub rewriter: Option<String>,
    pub rewriter_secondary: Option<String>,
    pub assembler: Option<String>,
    pub evaluator: Option<String>,
    pub optimizer: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// Postgres ledger when set, in-memory otherwise.
    pub database_url: Option<String>,
    pub max_concurrent_jobs: usize,
    pub sweep_interval: Duration,
    pub stale_job_timeout: Duration,
    /// Defaults applied to every provider guard.
    pub provider: ProviderSettings,
    pub endpoints: Endpoints,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; tests pass a map instead of touching the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let max_attempts: u32 = parse(&lookup, "PRESSROOM_RETRY_MAX_ATTEMPTS", 3)?;
        if max_attempts == 0 {
            return Err(invalid("PRESSROOM_RETRY_MAX_ATTEMPTS", "0"));
        }
        let max_concurrent_jobs: usize = parse(&lookup, "PRESSROOM_MAX_CONCURRENT_JOBS", 4)?;
        if max_concurrent_jobs == 0 {
            return Err(invalid("PRESSROOM_MAX_CONCURRENT_JOBS", "0"));
        }
        let rps: u32 = parse(&lookup, "PRESSROOM_PROVIDER_RPS", 10)?;
        if rps == 0 {
            return Err(invalid("PRESSROOM_PROVIDER_RPS", "0"));
        }

        let provider = ProviderSettings {
            breaker: CircuitBreakerConfig {
                failure_threshold: parse(&lookup, "PRESSROOM_BREAKER_FAILURE_THRESHOLD", 5)?,
                cooldown: Duration::from_secs(parse(&lookup, "PRESSROOM_BREAKER_COOLDOWN_SECS", 30)?),
            },
            retry: RetryPolicy {
                max_attempts,
                base_delay: Duration::from_millis(parse(&lookup, "PRESSROOM_RETRY_BASE_DELAY_MS", 200)?),
                ..RetryPolicy::default()
            },
            rate_limit: RateLimit::per_second(rps),
            ..ProviderSettings::default()
        };

        let url = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            bind_addr: parse(&lookup, "PRESSROOM_BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            database_url: url("DATABASE_URL"),
            max_concurrent_jobs,
            sweep_interval: Duration::from_secs(parse(&lookup, "PRESSROOM_SWEEP_INTERVAL_SECS", 60)?),
            stale_job_timeout: Duration::from_secs(parse(
                &lookup,
                "PRESSROOM_STALE_JOB_TIMEOUT_SECS",
                3600,
            )?),
            provider,
            endpoints: Endpoints {
                fetcher: url("PRESSROOM_FETCHER_URL"),
                classifier: url("PRESSROOM_CLASSIFIER_URL"),
                classifier_secondary: url("PRESSROOM_CLASSIFIER_SECONDARY_URL"),
                rewriter: url("PRESSROOM_REWRITER_URL"),
                rewriter_secondary: url("PRESSROOM_REWRITER_SECONDARY_URL"),
                assembler: url("PRESSROOM_ASSEMBLER_URL"),
                evaluator: url("PRESSROOM_EVALUATOR_URL"),
                optimizer: url("PRESSROOM_OPTIMIZER_URL"),
            },
        })
    }
}

fn parse<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| invalid(key, &raw)),
    }
}

fn invalid(key: &'static str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let cfg = config_from(&[]).unwrap();
        assert_eq!(cfg.bind_addr.port(), 8080);
        assert_eq!(cfg.database_url, None);
        assert_eq!(cfg.max_concurrent_jobs, 4);
        assert_eq!(cfg.sweep_interval, Duration::from_secs(60));
        assert_eq!(cfg.stale_job_timeout, Duration::from_secs(3600));
        assert_eq!(cfg.provider.breaker.failure_threshold, 5);
        assert_eq!(cfg.provider.retry.max_attempts, 3);
        assert_eq!(cfg.provider.rate_limit.per_second, 10);
        assert_eq!(cfg.endpoints, Endpoints::default());
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = config_from(&[
            ("PRESSROOM_BIND_ADDR", "127.0.0.1:9000"),
            ("DATABASE_URL", "postgres://localhost/pressroom"),
            ("PRESSROOM_BREAKER_COOLDOWN_SECS", "5"),
            ("PRESSROOM_RETRY_BASE_DELAY_MS", "50"),
            ("PRESSROOM_CLASSIFIER_URL", "http://classifier:8000"),
            ("PRESSROOM_REWRITER_URL", "  "),
        ])
        .unwrap();

        assert_eq!(cfg.bind_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/pressroom"));
        assert_eq!(cfg.provider.breaker.cooldown, Duration::from_secs(5));
        assert_eq!(cfg.provider.retry.base_delay, Duration::from_millis(50));
        assert_eq!(cfg.endpoints.classifier.as_deref(), Some("http://classifier:8000"));
        assert_eq!(cfg.endpoints.rewriter, None);
    }

    #[test]
    fn malformed_values_name_the_key() {
        let err = config_from(&[("PRESSROOM_SWEEP_INTERVAL_SECS", "soon")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "PRESSROOM_SWEEP_INTERVAL_SECS",
                value: "soon".to_string(),
            }
        );

        let err = config_from(&[("PRESSROOM_RETRY_MAX_ATTEMPTS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PRESSROOM_RETRY_MAX_ATTEMPTS", .. }));
    }
}
