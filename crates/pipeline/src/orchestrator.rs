//! Drives one job through the stage pipeline.
//!
//! The orchestrator owns the run loop only. Job state lives in the
//! [`JobLedger`]; every stage record is persisted before the next stage
//! starts, so a crash leaves a ledger that reflects the last completed stage.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn, Instrument, Span};

use pressroom_core::{
    overall_status, ItemCounts, Job, JobId, JobStatus, LedgerError, LedgerResult, StageName,
    StageResult, StageStatus,
};
use pressroom_infra::JobLedger;

use crate::error::PipelineError;
use crate::events::{EventBus, JobEvent};
use crate::providers::Providers;
use crate::sink::{JobOutput, OutputSink};
use crate::stages::{stages_for, RunState, StageContext, StageOutcome, StageRunner};

pub struct Orchestrator {
    ledger: Arc<dyn JobLedger>,
    runner: Arc<StageRunner>,
    sink: Arc<dyn OutputSink>,
    events: EventBus,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("runner", &self.runner)
            .finish_non_exhaustive()
    }
}

/// How a run loop ended.
enum RunEnd {
    Finished(JobStatus),
    /// Another writer finalized the job first (sweeper, operator).
    Superseded(JobStatus),
}

impl Orchestrator {
    pub fn new(
        ledger: Arc<dyn JobLedger>,
        providers: Providers,
        sink: Arc<dyn OutputSink>,
        events: EventBus,
    ) -> Self {
        Self {
            ledger,
            runner: Arc::new(StageRunner::new(providers)),
            sink,
            events,
        }
    }

    pub fn ledger(&self) -> &Arc<dyn JobLedger> {
        &self.ledger
    }

    pub fn providers(&self) -> &Providers {
        self.runner.providers()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Run `job_id` to a terminal status.
    ///
    /// Returns the status the job ended with. If the job cannot be started
    /// (unknown, or not pending) the ledger error is returned and nothing is
    /// written. Any other ledger failure mid-run finalizes the job as failed
    /// and surfaces as [`PipelineError::OrchestratorFault`].
    #[instrument(skip(self, cancel), fields(job_id = %job_id))]
    pub async fn run(
        &self,
        job_id: JobId,
        cancel: CancellationToken,
    ) -> Result<JobStatus, PipelineError> {
        let job = self.ledger.mark_started(job_id).await?;
        self.events.publish(JobEvent::Started {
            job_id,
            at: job.started_at.unwrap_or_else(Utc::now),
        });
        info!("job started");

        match self.drive(job, cancel).await {
            Ok(RunEnd::Finished(status)) => Ok(status),
            Ok(RunEnd::Superseded(status)) => {
                warn!(%status, "job finalized by another writer; run abandoned");
                Ok(status)
            }
            Err(fault) => {
                error!(error = %fault, "orchestrator fault; failing job");
                let reason = format!("orchestrator fault: {fault}");
                match self
                    .ledger
                    .finalize(job_id, JobStatus::Failed, Some(reason.clone()))
                    .await
                {
                    Ok(_) => self.events.publish(JobEvent::Finished {
                        job_id,
                        status: JobStatus::Failed,
                        reason: Some(reason),
                        at: Utc::now(),
                    }),
                    Err(err) => error!(error = %err, "could not finalize faulted job"),
                }
                Err(PipelineError::OrchestratorFault(fault.to_string()))
            }
        }
    }

    async fn drive(&self, job: Job, cancel: CancellationToken) -> LedgerResult<RunEnd> {
        let ctx = StageContext {
            job_id: job.id,
            config: Arc::new(job.config),
            cancel,
        };
        let plan = stages_for(&ctx.config);
        let mut state = RunState::default();
        let mut recorded: Vec<StageResult> = Vec::with_capacity(plan.len());
        let mut cancelled = false;

        for (index, stage) in plan.iter().enumerate() {
            if self.cancellation_requested(&ctx).await? {
                info!(stage = %stage.name, "cancellation observed at stage boundary");
                cancelled = true;
                for rest in &plan[index..] {
                    let result = StageResult::skipped(rest.name, "job cancelled before stage started");
                    if !self.record(&ctx, result, &mut recorded).await? {
                        return self.superseded(ctx.job_id).await;
                    }
                }
                break;
            }

            let result = match self.runner.skip_reason(stage, &state) {
                Some(reason) => StageResult::skipped(stage.name, reason),
                None => {
                    let (result, next) = self.execute_stage(stage.name, &ctx, state).await;
                    state = next;
                    result
                }
            };
            if !self.record(&ctx, result, &mut recorded).await? {
                return self.superseded(ctx.job_id).await;
            }
        }

        let status = overall_status(&recorded, cancelled);
        if !cancelled {
            self.deliver(&ctx, &state);
        }

        let reason = terminal_reason(status, &recorded);
        match self.ledger.finalize(ctx.job_id, status, reason.clone()).await {
            Ok(_) => {}
            Err(LedgerError::InvalidTransition { .. }) | Err(LedgerError::AlreadyTerminal { .. }) => {
                return self.superseded(ctx.job_id).await;
            }
            Err(err) => return Err(err),
        }

        self.events.publish(JobEvent::Finished {
            job_id: ctx.job_id,
            status,
            reason,
            at: Utc::now(),
        });
        info!(%status, "job finished");
        Ok(RunEnd::Finished(status))
    }

    /// Run one stage on its own task so a panic becomes a failed stage.
    async fn execute_stage(
        &self,
        stage: StageName,
        ctx: &StageContext,
        state: RunState,
    ) -> (StageResult, RunState) {
        let started_at = Utc::now();
        let backup = state.clone();
        let runner = self.runner.clone();
        let task_ctx = ctx.clone();

        let handle = tokio::spawn(
            async move {
                let mut state = state;
                let outcome = runner.execute(stage, &task_ctx, &mut state).await;
                (outcome, state)
            }
            .instrument(Span::current()),
        );

        let (outcome, state) = match handle.await {
            Ok(done) => done,
            Err(err) => {
                error!(%stage, error = %err, "stage panicked");
                (
                    StageOutcome::failed(ItemCounts::default(), "stage panicked"),
                    backup,
                )
            }
        };

        let result = StageResult::executed(
            stage,
            outcome.status,
            started_at,
            Utc::now(),
            outcome.counts,
            outcome.summary,
        );
        (result, state)
    }

    /// Persist a stage record. `Ok(false)` means the job is already terminal.
    async fn record(
        &self,
        ctx: &StageContext,
        result: StageResult,
        recorded: &mut Vec<StageResult>,
    ) -> LedgerResult<bool> {
        match self
            .ledger
            .record_stage_result(ctx.job_id, result.clone())
            .await
        {
            Ok(_) => {}
            Err(LedgerError::AlreadyTerminal { .. }) => return Ok(false),
            Err(err) => return Err(err),
        }

        info!(
            stage = %result.stage,
            status = %result.status,
            input = result.item_counts.input,
            succeeded = result.item_counts.succeeded,
            failed = result.item_counts.failed,
            "stage finished"
        );
        self.events.publish(JobEvent::StageFinished {
            job_id: ctx.job_id,
            stage: result.stage,
            status: result.status,
            at: result.finished_at.unwrap_or_else(Utc::now),
        });
        recorded.push(result);
        Ok(true)
    }

    async fn cancellation_requested(&self, ctx: &StageContext) -> LedgerResult<bool> {
        if ctx.cancel.is_cancelled() {
            return Ok(true);
        }
        Ok(self.ledger.get(ctx.job_id).await?.cancel_requested)
    }

    async fn superseded(&self, job_id: JobId) -> LedgerResult<RunEnd> {
        let job = self.ledger.get(job_id).await?;
        Ok(RunEnd::Superseded(job.status))
    }

    fn deliver(&self, ctx: &StageContext, state: &RunState) {
        let (Some(assembled), Some(output)) = (&state.assembled, state.final_output()) else {
            return;
        };
        self.sink.deliver(JobOutput {
            job_id: ctx.job_id,
            output: output.clone(),
            assembled_by: assembled.provider.clone(),
            used_fallback: state.used_fallback(),
            evaluation: state.evaluation.clone(),
            optimized: state.optimization.is_some(),
            delivered_at: Utc::now(),
        });
    }
}

fn terminal_reason(status: JobStatus, stages: &[StageResult]) -> Option<String> {
    match status {
        JobStatus::Cancelled => Some("cancelled by request".to_string()),
        JobStatus::Failed => {
            let failures = stages
                .iter()
                .filter(|s| s.status == StageStatus::Failed)
                .map(|s| match &s.error_summary {
                    Some(summary) => format!("{}: {summary}", s.stage),
                    None => s.stage.to_string(),
                })
                .collect::<Vec<_>>();
            Some(if failures.is_empty() {
                "no stage completed".to_string()
            } else {
                failures.join("; ")
            })
        }
        _ => None,
    }
}
