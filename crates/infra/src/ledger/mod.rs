//! Job Ledger: the single source of truth for job state.
//!
//! Implementations serialize writes per job id and make every write durable
//! before returning. All state-machine rules live on [`pressroom_core::Job`];
//! a ledger loads, applies, and persists.

mod in_memory;
mod postgres;

use async_trait::async_trait;

use pressroom_core::{FinalizeOutcome, Job, JobConfig, JobFilter, JobId, JobStatus, LedgerResult, StageResult};

pub use in_memory::InMemoryJobLedger;
pub use postgres::PostgresJobLedger;

#[async_trait]
pub trait JobLedger: Send + Sync {
    /// Persist a new `pending` job with a snapshot of `config`.
    async fn create(&self, config: JobConfig) -> LedgerResult<Job>;

    /// `pending -> running`.
    async fn mark_started(&self, id: JobId) -> LedgerResult<Job>;

    /// Append a stage result. Fails once the job is terminal.
    async fn record_stage_result(&self, id: JobId, result: StageResult) -> LedgerResult<Job>;

    /// Move to a terminal status. Same status twice is a no-op.
    async fn finalize(
        &self,
        id: JobId,
        status: JobStatus,
        reason: Option<String>,
    ) -> LedgerResult<FinalizeOutcome>;

    /// Set the cancellation flag on a non-terminal job.
    async fn request_cancel(&self, id: JobId) -> LedgerResult<Job>;

    async fn get(&self, id: JobId) -> LedgerResult<Job>;

    /// Matching jobs, oldest first.
    async fn list(&self, filter: &JobFilter) -> LedgerResult<Vec<Job>>;
}
