//! Per-job configuration snapshot.
//!
//! A [`JobConfig`] is copied into the job record when the job is created, so a
//! running job is immune to configuration changes made after it started.

use serde::{Deserialize, Serialize};

/// Limits and toggles for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Source identifiers passed to the fetcher. Empty means "fetcher default".
    pub sources: Vec<String>,
    /// Upper bound on items taken from the fetcher.
    pub max_items: usize,
    /// Concurrent provider calls a single stage may have in flight.
    pub max_in_flight: usize,
    pub gate: GateConfig,
    pub features: FeatureToggles,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            max_items: 100,
            max_in_flight: 8,
            gate: GateConfig::default(),
            features: FeatureToggles::default(),
        }
    }
}

impl JobConfig {
    /// Reject snapshots the orchestrator cannot run.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_items == 0 {
            return Err("max_items must be > 0".to_string());
        }
        if self.max_in_flight == 0 {
            return Err("max_in_flight must be > 0".to_string());
        }
        self.gate.validate()
    }

    pub fn with_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sources = sources.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_evaluation(mut self, enabled: bool) -> Self {
        self.features.evaluation = enabled;
        self
    }

    pub fn with_optimization(mut self, enabled: bool) -> Self {
        self.features.optimization = enabled;
        self
    }
}

/// Optional trailing stages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureToggles {
    pub evaluation: bool,
    pub optimization: bool,
}

/// Quality gate thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Minimum characters in the rewritten body.
    pub min_body_chars: usize,
    /// Maximum characters in the rewritten body.
    pub max_body_chars: usize,
    /// Views every accepted item must carry (e.g. headline, summary).
    pub declared_views: Vec<String>,
    /// Accepted items allowed per (source, category).
    pub diversity_cap: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_body_chars: 80,
            max_body_chars: 20_000,
            declared_views: vec!["headline".to_string(), "summary".to_string()],
            diversity_cap: 3,
        }
    }
}

impl GateConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.min_body_chars > self.max_body_chars {
            return Err("gate.min_body_chars must be <= gate.max_body_chars".to_string());
        }
        if self.diversity_cap == 0 {
            return Err("gate.diversity_cap must be > 0".to_string());
        }
        Ok(())
    }
}
