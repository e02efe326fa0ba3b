//! Destination for finished job artifacts.
//!
//! Outputs are kept apart from the job record: the ledger tracks state, the
//! sink holds what the pipeline produced.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use pressroom_core::JobId;

use crate::collaborators::{AssembledOutput, EvaluationReport};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobOutput {
    pub job_id: JobId,
    pub output: AssembledOutput,
    /// Provider that assembled the output.
    pub assembled_by: String,
    /// Any stage of this run fell back to a deterministic collaborator.
    pub used_fallback: bool,
    pub evaluation: Option<EvaluationReport>,
    pub optimized: bool,
    pub delivered_at: DateTime<Utc>,
}

pub trait OutputSink: Send + Sync + 'static {
    fn deliver(&self, output: JobOutput);

    fn output(&self, job_id: JobId) -> Option<JobOutput>;
}

/// In-memory sink for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryOutputSink {
    inner: Mutex<HashMap<JobId, JobOutput>>,
}

impl InMemoryOutputSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("output sink lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OutputSink for InMemoryOutputSink {
    fn deliver(&self, output: JobOutput) {
        self.inner
            .lock()
            .expect("output sink lock poisoned")
            .insert(output.job_id, output);
    }

    fn output(&self, job_id: JobId) -> Option<JobOutput> {
        self.inner
            .lock()
            .expect("output sink lock poisoned")
            .get(&job_id)
            .cloned()
    }
}
