//! Job record and its state machine.
//!
//! ## Lifecycle
//!
//! ```text
//! pending ──mark_started──► running ──finalize──► completed | partial | failed | cancelled
//!    │                                                 ▲
//!    └────────────────────finalize─────────────────────┘
//! ```
//!
//! All transitions are implemented here as pure methods on [`Job`]; ledgers
//! apply them under their own write serialization and persist the result.

use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::JobConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::id::JobId;

/// Overall status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, waiting for a worker
    Pending,
    /// Orchestrator is driving stages
    Running,
    /// Every executed stage completed
    Completed,
    /// Mixed stage outcomes
    Partial,
    /// Every executed stage failed, or the orchestrator faulted
    Failed,
    /// Cancellation was observed at a stage boundary
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Partial,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending | JobStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Partial => "partial",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown job status: {s}"))
    }
}

/// Named pipeline step, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Ingest,
    Classify,
    Rewrite,
    QualityGate,
    Assemble,
    Evaluation,
    Optimization,
}

impl StageName {
    /// Position of the stage in the fixed pipeline order.
    pub fn ordinal(&self) -> u8 {
        *self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Ingest => "ingest",
            StageName::Classify => "classify",
            StageName::Rewrite => "rewrite",
            StageName::QualityGate => "quality_gate",
            StageName::Assemble => "assemble",
            StageName::Evaluation => "evaluation",
            StageName::Optimization => "optimization",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    /// Some items succeeded and some failed within the stage
    Partial,
    Failed,
    /// Never started (cancellation, missing upstream output, missing collaborator)
    Skipped,
}

impl StageStatus {
    /// Classify an item-processing stage by its per-item tallies.
    ///
    /// A stage with no input is `Completed`.
    pub fn from_counts(succeeded: usize, failed: usize) -> Self {
        match (succeeded, failed) {
            (_, 0) => StageStatus::Completed,
            (0, _) => StageStatus::Failed,
            _ => StageStatus::Partial,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Completed => "completed",
            StageStatus::Partial => "partial",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-stage item tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCounts {
    pub input: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl ItemCounts {
    pub fn new(input: usize, succeeded: usize, failed: usize) -> Self {
        Self {
            input,
            succeeded,
            failed,
        }
    }
}

/// Ledger record of one stage execution (or skip).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: StageName,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub item_counts: ItemCounts,
    pub error_summary: Option<String>,
}

impl StageResult {
    /// Record for a stage that never started.
    pub fn skipped(stage: StageName, reason: impl Into<String>) -> Self {
        Self {
            stage,
            status: StageStatus::Skipped,
            started_at: None,
            finished_at: None,
            item_counts: ItemCounts::default(),
            error_summary: Some(reason.into()),
        }
    }

    /// Record for a stage that ran between `started_at` and `finished_at`.
    pub fn executed(
        stage: StageName,
        status: StageStatus,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        item_counts: ItemCounts,
        error_summary: Option<String>,
    ) -> Self {
        Self {
            stage,
            status,
            started_at: Some(started_at),
            finished_at: Some(finished_at),
            item_counts,
            error_summary,
        }
    }

    pub fn was_executed(&self) -> bool {
        self.status != StageStatus::Skipped
    }
}

/// Result of a [`Job::finalize`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// The job moved to the requested terminal status.
    Applied,
    /// The job already had the requested terminal status; nothing changed.
    AlreadyFinalized,
}

/// One execution of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    /// Snapshot taken at creation; a running job never sees later config changes.
    pub config: JobConfig,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    /// Set iff `status` is terminal.
    pub finished_at: Option<DateTime<Utc>>,
    pub cancel_requested: bool,
    /// Append-only, in execution order.
    pub stages: Vec<StageResult>,
    pub terminal_reason: Option<String>,
}

impl Job {
    pub fn new(config: JobConfig) -> Self {
        Self::new_at(config, Utc::now())
    }

    pub fn new_at(config: JobConfig, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            status: JobStatus::Pending,
            config,
            created_at: now,
            started_at: None,
            finished_at: None,
            cancel_requested: false,
            stages: Vec::new(),
            terminal_reason: None,
        }
    }

    /// `pending -> running`.
    pub fn mark_started(&mut self, now: DateTime<Utc>) -> LedgerResult<()> {
        if self.status != JobStatus::Pending {
            return Err(LedgerError::InvalidTransition {
                job_id: self.id,
                from: self.status,
                to: JobStatus::Running,
            });
        }
        self.status = JobStatus::Running;
        self.started_at = Some(now);
        Ok(())
    }

    /// Append a stage result.
    pub fn record_stage(&mut self, result: StageResult) -> LedgerResult<()> {
        self.ensure_not_terminal()?;

        if result.status == StageStatus::Skipped && result.started_at.is_some() {
            return Err(LedgerError::invariant(
                self.id,
                format!("skipped stage {} must not have started_at", result.stage),
            ));
        }

        if let Some(last) = self.stages.last() {
            if last.stage.ordinal() >= result.stage.ordinal() {
                return Err(LedgerError::invariant(
                    self.id,
                    format!(
                        "stage {} recorded after {}; results must follow execution order",
                        result.stage, last.stage
                    ),
                ));
            }
        }

        self.stages.push(result);
        Ok(())
    }

    /// Move to a terminal status.
    ///
    /// Repeating the call with the same status is a no-op; asking for a
    /// different status once terminal is an error.
    pub fn finalize(
        &mut self,
        status: JobStatus,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> LedgerResult<FinalizeOutcome> {
        if !status.is_terminal() {
            return Err(LedgerError::InvalidTransition {
                job_id: self.id,
                from: self.status,
                to: status,
            });
        }

        if self.status.is_terminal() {
            if self.status == status {
                return Ok(FinalizeOutcome::AlreadyFinalized);
            }
            return Err(LedgerError::InvalidTransition {
                job_id: self.id,
                from: self.status,
                to: status,
            });
        }

        self.status = status;
        self.finished_at = Some(now);
        self.terminal_reason = reason;
        Ok(FinalizeOutcome::Applied)
    }

    /// Set the cancellation flag. Only legal while the job is non-terminal.
    pub fn request_cancel(&mut self) -> LedgerResult<()> {
        self.ensure_not_terminal()?;
        self.cancel_requested = true;
        Ok(())
    }

    /// Timestamp the stale-job timeout is measured from.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.started_at.unwrap_or(self.created_at)
    }

    /// Non-terminal and idle for longer than `timeout` as of `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        !self.status.is_terminal() && now - self.last_activity() > timeout
    }

    fn ensure_not_terminal(&self) -> LedgerResult<()> {
        if self.status.is_terminal() {
            return Err(LedgerError::AlreadyTerminal {
                job_id: self.id,
                status: self.status,
            });
        }
        Ok(())
    }
}

/// Reduce stage outcomes to the job's overall status.
///
/// Cancellation overrides everything. When no stage executed at all the job
/// is reported as `cancelled` rather than `partial`.
pub fn overall_status(stages: &[StageResult], cancelled: bool) -> JobStatus {
    if cancelled {
        return JobStatus::Cancelled;
    }

    let mut executed = stages.iter().filter(|s| s.was_executed()).peekable();
    if executed.peek().is_none() {
        return JobStatus::Cancelled;
    }

    let (mut all_completed, mut all_failed) = (true, true);
    for stage in executed {
        all_completed &= stage.status == StageStatus::Completed;
        all_failed &= stage.status == StageStatus::Failed;
    }

    match (all_completed, all_failed) {
        (true, _) => JobStatus::Completed,
        (_, true) => JobStatus::Failed,
        _ => JobStatus::Partial,
    }
}

/// Filter for listing jobs. An empty `statuses` list matches every status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFilter {
    #[serde(default)]
    pub statuses: Vec<JobStatus>,
    pub limit: Option<usize>,
}

impl JobFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Jobs that are still `pending` or `running`.
    pub fn active() -> Self {
        Self {
            statuses: vec![JobStatus::Pending, JobStatus::Running],
            limit: None,
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.statuses.is_empty() || self.statuses.contains(&job.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn executed(stage: StageName, status: StageStatus) -> StageResult {
        let now = Utc::now();
        StageResult::executed(stage, status, now, now, ItemCounts::default(), None)
    }

    #[test]
    fn job_lifecycle() {
        let mut job = Job::new(JobConfig::default());
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.finished_at.is_none());

        job.mark_started(Utc::now()).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.started_at.is_some());

        job.record_stage(executed(StageName::Ingest, StageStatus::Completed))
            .unwrap();

        let outcome = job.finalize(JobStatus::Completed, None, Utc::now()).unwrap();
        assert_eq!(outcome, FinalizeOutcome::Applied);
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn mark_started_requires_pending() {
        let mut job = Job::new(JobConfig::default());
        job.mark_started(Utc::now()).unwrap();

        let err = job.mark_started(Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InvalidTransition {
                from: JobStatus::Running,
                to: JobStatus::Running,
                ..
            }
        ));
    }

    #[test]
    fn finalize_is_idempotent_for_same_status() {
        let mut job = Job::new(JobConfig::default());
        job.finalize(JobStatus::Failed, Some("boom".into()), Utc::now())
            .unwrap();
        let snapshot = job.clone();

        let outcome = job
            .finalize(JobStatus::Failed, Some("other".into()), Utc::now())
            .unwrap();
        assert_eq!(outcome, FinalizeOutcome::AlreadyFinalized);
        assert_eq!(job, snapshot);
    }

    #[test]
    fn finalize_with_different_status_after_terminal_is_rejected() {
        let mut job = Job::new(JobConfig::default());
        job.finalize(JobStatus::Cancelled, None, Utc::now()).unwrap();

        let err = job
            .finalize(JobStatus::Completed, None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));
        assert_eq!(job.status, JobStatus::Cancelled);
    }

    #[test]
    fn finalize_rejects_non_terminal_target() {
        let mut job = Job::new(JobConfig::default());
        let err = job
            .finalize(JobStatus::Running, None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));
        assert!(job.finished_at.is_none());
    }

    #[test]
    fn terminal_job_rejects_stage_results_and_cancel() {
        let mut job = Job::new(JobConfig::default());
        job.finalize(JobStatus::Completed, None, Utc::now()).unwrap();

        assert!(matches!(
            job.record_stage(executed(StageName::Ingest, StageStatus::Completed)),
            Err(LedgerError::AlreadyTerminal { .. })
        ));
        assert!(matches!(
            job.request_cancel(),
            Err(LedgerError::AlreadyTerminal { .. })
        ));
        assert!(!job.cancel_requested);
    }

    #[test]
    fn skipped_stage_cannot_carry_started_at() {
        let mut job = Job::new(JobConfig::default());
        let mut result = StageResult::skipped(StageName::Ingest, "cancelled");
        result.started_at = Some(Utc::now());

        assert!(matches!(
            job.record_stage(result),
            Err(LedgerError::Invariant { .. })
        ));
    }

    #[test]
    fn stage_results_must_follow_execution_order() {
        let mut job = Job::new(JobConfig::default());
        job.record_stage(executed(StageName::Rewrite, StageStatus::Completed))
            .unwrap();

        assert!(job
            .record_stage(executed(StageName::Classify, StageStatus::Completed))
            .is_err());
        assert!(job
            .record_stage(executed(StageName::Rewrite, StageStatus::Completed))
            .is_err());
        assert_eq!(job.stages.len(), 1);
    }

    #[test]
    fn stale_uses_started_at_when_present() {
        let created = Utc::now() - chrono::Duration::hours(5);
        let mut job = Job::new_at(JobConfig::default(), created);
        let timeout = chrono::Duration::hours(1);

        assert!(job.is_stale(Utc::now(), timeout));

        job.mark_started(Utc::now()).unwrap();
        assert!(!job.is_stale(Utc::now(), timeout));
    }

    #[test]
    fn status_parses_from_its_text_form() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("done".parse::<JobStatus>().is_err());
    }

    #[test]
    fn no_executed_stage_reports_cancelled() {
        let stages = vec![
            StageResult::skipped(StageName::Ingest, "x"),
            StageResult::skipped(StageName::Classify, "x"),
        ];
        assert_eq!(overall_status(&stages, false), JobStatus::Cancelled);
        assert_eq!(overall_status(&[], false), JobStatus::Cancelled);
    }

    #[test]
    fn skipped_stages_do_not_affect_aggregation() {
        let stages = vec![
            executed(StageName::Ingest, StageStatus::Failed),
            StageResult::skipped(StageName::Classify, "no upstream output"),
        ];
        assert_eq!(overall_status(&stages, false), JobStatus::Failed);
    }

    fn stage_status() -> impl Strategy<Value = StageStatus> {
        prop_oneof![
            Just(StageStatus::Completed),
            Just(StageStatus::Partial),
            Just(StageStatus::Failed),
            Just(StageStatus::Skipped),
        ]
    }

    proptest! {
        #[test]
        fn aggregation_matches_stage_outcomes(statuses in proptest::collection::vec(stage_status(), 1..7)) {
            let stages: Vec<StageResult> = statuses
                .iter()
                .enumerate()
                .map(|(i, status)| {
                    let name = [
                        StageName::Ingest,
                        StageName::Classify,
                        StageName::Rewrite,
                        StageName::QualityGate,
                        StageName::Assemble,
                        StageName::Evaluation,
                        StageName::Optimization,
                    ][i];
                    if *status == StageStatus::Skipped {
                        StageResult::skipped(name, "skip")
                    } else {
                        executed(name, *status)
                    }
                })
                .collect();

            let ran: Vec<_> = statuses.iter().filter(|s| **s != StageStatus::Skipped).collect();
            let expected = if ran.is_empty() {
                JobStatus::Cancelled
            } else if ran.iter().all(|s| **s == StageStatus::Completed) {
                JobStatus::Completed
            } else if ran.iter().all(|s| **s == StageStatus::Failed) {
                JobStatus::Failed
            } else {
                JobStatus::Partial
            };

            prop_assert_eq!(overall_status(&stages, false), expected);
            prop_assert_eq!(overall_status(&stages, true), JobStatus::Cancelled);
        }

        #[test]
        fn from_counts_is_partial_only_for_mixed(succeeded in 0usize..20, failed in 0usize..20) {
            let status = StageStatus::from_counts(succeeded, failed);
            let mixed = succeeded > 0 && failed > 0;
            prop_assert_eq!(status == StageStatus::Partial, mixed);
        }
    }
}
