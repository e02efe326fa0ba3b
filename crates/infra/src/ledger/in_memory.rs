//! In-memory job ledger for tests and single-process deployments.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use pressroom_core::{
    FinalizeOutcome, Job, JobConfig, JobFilter, JobId, JobStatus, LedgerError, LedgerResult,
    StageResult,
};

use super::JobLedger;

/// Jobs keyed by id; ids are time-ordered so iteration is creation order.
///
/// Every write runs under the map's write lock, which serializes writers to
/// the same job.
#[derive(Debug, Default)]
pub struct InMemoryJobLedger {
    jobs: RwLock<BTreeMap<JobId, Job>>,
}

impl InMemoryJobLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Insert a job as-is. Used to seed fixtures with chosen timestamps.
    pub fn insert(&self, job: Job) {
        self.jobs
            .write()
            .expect("job ledger lock poisoned")
            .insert(job.id, job);
    }

    fn update<T>(
        &self,
        id: JobId,
        apply: impl FnOnce(&mut Job) -> LedgerResult<T>,
    ) -> LedgerResult<(T, Job)> {
        let mut jobs = self.jobs.write().expect("job ledger lock poisoned");
        let stored = jobs.get_mut(&id).ok_or(LedgerError::JobNotFound(id))?;

        // Apply to a copy so a rejected transition leaves the record untouched.
        let mut next = stored.clone();
        let out = apply(&mut next)?;
        *stored = next.clone();
        Ok((out, next))
    }
}

#[async_trait]
impl JobLedger for InMemoryJobLedger {
    async fn create(&self, config: JobConfig) -> LedgerResult<Job> {
        let job = Job::new(config);
        self.insert(job.clone());
        debug!(job_id = %job.id, "job created");
        Ok(job)
    }

    async fn mark_started(&self, id: JobId) -> LedgerResult<Job> {
        let now = Utc::now();
        self.update(id, |job| job.mark_started(now)).map(|(_, job)| job)
    }

    async fn record_stage_result(&self, id: JobId, result: StageResult) -> LedgerResult<Job> {
        self.update(id, |job| job.record_stage(result)).map(|(_, job)| job)
    }

    async fn finalize(
        &self,
        id: JobId,
        status: JobStatus,
        reason: Option<String>,
    ) -> LedgerResult<FinalizeOutcome> {
        let now = Utc::now();
        self.update(id, |job| job.finalize(status, reason, now))
            .map(|(outcome, _)| outcome)
    }

    async fn request_cancel(&self, id: JobId) -> LedgerResult<Job> {
        self.update(id, Job::request_cancel).map(|(_, job)| job)
    }

    async fn get(&self, id: JobId) -> LedgerResult<Job> {
        self.jobs
            .read()
            .expect("job ledger lock poisoned")
            .get(&id)
            .cloned()
            .ok_or(LedgerError::JobNotFound(id))
    }

    async fn list(&self, filter: &JobFilter) -> LedgerResult<Vec<Job>> {
        let jobs = self.jobs.read().expect("job ledger lock poisoned");
        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(jobs
            .values()
            .filter(|job| filter.matches(job))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pressroom_core::{ItemCounts, StageName, StageStatus};

    fn stage(name: StageName) -> StageResult {
        let now = Utc::now();
        StageResult::executed(name, StageStatus::Completed, now, now, ItemCounts::default(), None)
    }

    #[tokio::test]
    async fn create_start_record_finalize() {
        let ledger = InMemoryJobLedger::new();
        let job = ledger.create(JobConfig::default()).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        let job = ledger.mark_started(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Running);

        ledger
            .record_stage_result(job.id, stage(StageName::Ingest))
            .await
            .unwrap();
        let outcome = ledger
            .finalize(job.id, JobStatus::Completed, None)
            .await
            .unwrap();
        assert_eq!(outcome, FinalizeOutcome::Applied);

        let stored = ledger.get(job.id).await.unwrap();
        assert_eq!(stored.stages.len(), 1);
        assert!(stored.finished_at.is_some());
    }

    #[tokio::test]
    async fn mark_started_twice_is_invalid_transition() {
        let ledger = InMemoryJobLedger::new();
        let job = ledger.create(JobConfig::default()).await.unwrap();
        ledger.mark_started(job.id).await.unwrap();

        let err = ledger.mark_started(job.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn finalize_is_idempotent_and_freezes_the_record() {
        let ledger = InMemoryJobLedger::new();
        let job = ledger.create(JobConfig::default()).await.unwrap();
        ledger
            .finalize(job.id, JobStatus::Failed, Some("boom".into()))
            .await
            .unwrap();
        let first = ledger.get(job.id).await.unwrap();

        let again = ledger
            .finalize(job.id, JobStatus::Failed, Some("other".into()))
            .await
            .unwrap();
        assert_eq!(again, FinalizeOutcome::AlreadyFinalized);

        let err = ledger
            .finalize(job.id, JobStatus::Completed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));

        assert!(matches!(
            ledger.record_stage_result(job.id, stage(StageName::Ingest)).await,
            Err(LedgerError::AlreadyTerminal { .. })
        ));
        assert!(matches!(
            ledger.request_cancel(job.id).await,
            Err(LedgerError::AlreadyTerminal { .. })
        ));
        assert_eq!(ledger.get(job.id).await.unwrap(), first);
    }

    #[tokio::test]
    async fn rejected_write_leaves_record_untouched() {
        let ledger = InMemoryJobLedger::new();
        let job = ledger.create(JobConfig::default()).await.unwrap();
        ledger.mark_started(job.id).await.unwrap();
        ledger
            .record_stage_result(job.id, stage(StageName::Classify))
            .await
            .unwrap();
        let before = ledger.get(job.id).await.unwrap();

        let err = ledger
            .record_stage_result(job.id, stage(StageName::Ingest))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Invariant { .. }));
        assert_eq!(ledger.get(job.id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let ledger = InMemoryJobLedger::new();
        let id = JobId::new();
        assert_eq!(ledger.get(id).await.unwrap_err(), LedgerError::JobNotFound(id));
        assert!(matches!(
            ledger.request_cancel(id).await,
            Err(LedgerError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_filters_by_status_and_limit() {
        let ledger = InMemoryJobLedger::new();
        let a = ledger.create(JobConfig::default()).await.unwrap();
        let b = ledger.create(JobConfig::default()).await.unwrap();
        let _c = ledger.create(JobConfig::default()).await.unwrap();
        ledger.mark_started(b.id).await.unwrap();

        let running = ledger
            .list(&JobFilter::all().with_status(JobStatus::Running))
            .await
            .unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, b.id);

        let first = ledger.list(&JobFilter::all().with_limit(1)).await.unwrap();
        assert_eq!(first[0].id, a.id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_finalize_applies_exactly_once() {
        let ledger = Arc::new(InMemoryJobLedger::new());
        let job = ledger.create(JobConfig::default()).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let ledger = ledger.clone();
            let status = if i % 2 == 0 {
                JobStatus::Failed
            } else {
                JobStatus::Cancelled
            };
            handles.push(tokio::spawn(async move {
                ledger.finalize(job.id, status, None).await
            }));
        }

        let mut applied = 0;
        for handle in handles {
            if let Ok(FinalizeOutcome::Applied) = handle.await.unwrap() {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);
    }
}
