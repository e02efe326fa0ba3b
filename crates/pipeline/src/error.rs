//! Errors surfaced to callers of the pipeline service.

use thiserror::Error;

use pressroom_core::{JobId, JobStatus, LedgerError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("job {job_id} is already {status}")]
    AlreadyTerminal { job_id: JobId, status: JobStatus },

    #[error("invalid job config: {0}")]
    InvalidConfig(String),

    /// Error in the orchestrator itself; the job was finalized as failed.
    #[error("orchestrator fault: {0}")]
    OrchestratorFault(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<LedgerError> for PipelineError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::JobNotFound(id) => PipelineError::JobNotFound(id),
            LedgerError::InvalidTransition { job_id, from, to } => {
                PipelineError::InvalidTransition { job_id, from, to }
            }
            LedgerError::AlreadyTerminal { job_id, status } => {
                PipelineError::AlreadyTerminal { job_id, status }
            }
            LedgerError::Invariant { .. } => PipelineError::OrchestratorFault(err.to_string()),
            LedgerError::Storage(msg) => PipelineError::Storage(msg),
        }
    }
}
