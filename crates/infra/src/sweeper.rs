//! Stale-job sweeper.
//!
//! Bounds total job lifetime independently of the orchestrator: any job still
//! `pending` or `running` past the timeout is finalized as `failed`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use pressroom_core::{FinalizeOutcome, JobFilter, JobId, JobStatus, LedgerError, LedgerResult};

use crate::ledger::JobLedger;

#[derive(Clone)]
pub struct StaleJobSweeper {
    ledger: Arc<dyn JobLedger>,
    /// Maximum time since `started_at` (or `created_at`) before a job is orphaned.
    pub timeout: Duration,
    /// Time between sweeps.
    pub interval: Duration,
}

impl std::fmt::Debug for StaleJobSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaleJobSweeper")
            .field("timeout", &self.timeout)
            .field("interval", &self.interval)
            .finish()
    }
}

/// Handle for the background sweeper task.
#[derive(Debug)]
pub struct SweeperHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the loop and wait for the current sweep to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.join.await;
    }
}

impl StaleJobSweeper {
    pub fn new(ledger: Arc<dyn JobLedger>, timeout: Duration, interval: Duration) -> Self {
        Self {
            ledger,
            timeout,
            interval,
        }
    }

    fn orphan_reason(&self) -> String {
        format!("orphaned: no progress within {}s", self.timeout.as_secs())
    }

    /// Finalize every stale job as of `now`. Returns the ids this sweep finalized.
    ///
    /// A job finalized by someone else between the scan and the write is left
    /// alone.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> LedgerResult<Vec<JobId>> {
        let timeout = chrono::Duration::from_std(self.timeout)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        let active = self.ledger.list(&JobFilter::active()).await?;

        let mut swept = Vec::new();
        for job in active.iter().filter(|job| job.is_stale(now, timeout)) {
            match self
                .ledger
                .finalize(job.id, JobStatus::Failed, Some(self.orphan_reason()))
                .await
            {
                Ok(FinalizeOutcome::Applied) => {
                    warn!(
                        job_id = %job.id,
                        previous_status = %job.status,
                        last_activity = %job.last_activity(),
                        "stale job finalized as failed"
                    );
                    swept.push(job.id);
                }
                Ok(FinalizeOutcome::AlreadyFinalized) => {}
                // Raced with the orchestrator or a cancel; the job is terminal now.
                Err(LedgerError::InvalidTransition { .. } | LedgerError::JobNotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(swept)
    }

    /// Run [`sweep_once`](Self::sweep_once) every `interval` until shut down.
    pub fn spawn(self) -> SweeperHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let join = tokio::spawn(async move {
            info!(
                timeout_secs = self.timeout.as_secs(),
                interval_secs = self.interval.as_secs(),
                "stale job sweeper started"
            );
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = self.sweep_once(Utc::now()).await {
                            error!(error = %err, "stale job sweep failed");
                        }
                    }
                }
            }
            info!("stale job sweeper stopped");
        });

        SweeperHandle { cancel, join }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryJobLedger;
    use pressroom_core::{Job, JobConfig};

    fn sweeper(ledger: Arc<InMemoryJobLedger>) -> StaleJobSweeper {
        StaleJobSweeper::new(ledger, Duration::from_secs(3600), Duration::from_secs(60))
    }

    fn running_since(started: DateTime<Utc>) -> Job {
        let mut job = Job::new_at(JobConfig::default(), started);
        job.mark_started(started).unwrap();
        job
    }

    #[tokio::test]
    async fn stale_running_job_is_failed_exactly_once() {
        let ledger = InMemoryJobLedger::arc();
        let now = Utc::now();
        let stale = running_since(now - chrono::Duration::hours(2));
        let fresh = running_since(now - chrono::Duration::minutes(5));
        ledger.insert(stale.clone());
        ledger.insert(fresh.clone());

        let sweeper = sweeper(ledger.clone());
        assert_eq!(sweeper.sweep_once(now).await.unwrap(), vec![stale.id]);
        assert!(sweeper.sweep_once(now).await.unwrap().is_empty());

        let job = ledger.get(stale.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(
            job.terminal_reason.as_deref(),
            Some("orphaned: no progress within 3600s")
        );
        assert_eq!(ledger.get(fresh.id).await.unwrap().status, JobStatus::Running);
    }

    #[tokio::test]
    async fn never_started_job_uses_created_at() {
        let ledger = InMemoryJobLedger::arc();
        let now = Utc::now();
        let pending = Job::new_at(JobConfig::default(), now - chrono::Duration::hours(3));
        ledger.insert(pending.clone());

        let swept = sweeper(ledger.clone()).sweep_once(now).await.unwrap();
        assert_eq!(swept, vec![pending.id]);
    }

    #[tokio::test]
    async fn terminal_jobs_are_untouched() {
        let ledger = InMemoryJobLedger::arc();
        let now = Utc::now();
        let mut done = running_since(now - chrono::Duration::hours(5));
        done.finalize(JobStatus::Completed, None, now - chrono::Duration::hours(4))
            .unwrap();
        ledger.insert(done.clone());

        assert!(sweeper(ledger.clone()).sweep_once(now).await.unwrap().is_empty());
        assert_eq!(ledger.get(done.id).await.unwrap(), done);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_sweeper_runs_and_shuts_down() {
        let ledger = InMemoryJobLedger::arc();
        let stale = running_since(Utc::now() - chrono::Duration::hours(2));
        ledger.insert(stale.clone());

        let handle = sweeper(ledger.clone()).spawn();
        // The first tick fires immediately.
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.shutdown().await;

        assert_eq!(ledger.get(stale.id).await.unwrap().status, JobStatus::Failed);
    }
}
