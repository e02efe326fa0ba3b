//! Ledger error model.

use thiserror::Error;

use crate::id::JobId;
use crate::job::JobStatus;

/// Result type used by job ledgers and job state transitions.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Failure of a job ledger operation.
///
/// Transition errors are deterministic and come from [`crate::Job`]'s state
/// machine; `Storage` covers the backing store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    /// The requested status change is not allowed from the current status.
    #[error("invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    /// The job already reached a terminal status; nothing may change.
    #[error("job {job_id} is already terminal ({status})")]
    AlreadyTerminal { job_id: JobId, status: JobStatus },

    /// A write would break a job record invariant.
    #[error("invariant violated for job {job_id}: {message}")]
    Invariant { job_id: JobId, message: String },

    #[error("storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn invariant(job_id: JobId, msg: impl Into<String>) -> Self {
        Self::Invariant {
            job_id,
            message: msg.into(),
        }
    }
}
