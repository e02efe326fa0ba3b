//! Stage descriptors and stage execution.
//!
//! The pipeline is a static, ordered list of [`StageDescriptor`]s. Each one
//! says whether it runs for a given job configuration and what upstream
//! output it needs. [`StageRunner`] executes one stage against the run's
//! [`RunState`] and reduces whatever happened to a [`StageOutcome`]; errors
//! never escape a stage.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use pressroom_core::{
    Annotation, AnnotationKind, ItemCounts, ItemId, JobConfig, JobId, ProcessedItem, RawItem,
    Rewrite, StageName, StageStatus,
};
use pressroom_gate::{GateOutcome, QualityGate, ReasonCode};
use pressroom_resilience::{ProviderFuture, Routed};

use crate::collaborators::{
    AssembledOutput, Assembler, Classification, Classifier, EvaluationReport, Evaluator,
    FetchRequest, Fetcher, OptimizationOutcome, Optimizer, RewriteOutput, Rewriter,
};
use crate::providers::Providers;

/// Upstream output a stage cannot run without.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Nothing,
    UsableItems,
    AcceptedItems,
    AssembledOutput,
}

#[derive(Debug)]
pub struct StageDescriptor {
    pub name: StageName,
    pub enabled: fn(&JobConfig) -> bool,
    pub requires: Requirement,
}

fn always(_: &JobConfig) -> bool {
    true
}

pub static PIPELINE: &[StageDescriptor] = &[
    StageDescriptor {
        name: StageName::Ingest,
        enabled: always,
        requires: Requirement::Nothing,
    },
    StageDescriptor {
        name: StageName::Classify,
        enabled: always,
        requires: Requirement::UsableItems,
    },
    StageDescriptor {
        name: StageName::Rewrite,
        enabled: always,
        requires: Requirement::UsableItems,
    },
    StageDescriptor {
        name: StageName::QualityGate,
        enabled: always,
        requires: Requirement::UsableItems,
    },
    StageDescriptor {
        name: StageName::Assemble,
        enabled: always,
        requires: Requirement::AcceptedItems,
    },
    StageDescriptor {
        name: StageName::Evaluation,
        enabled: |config| config.features.evaluation,
        requires: Requirement::AssembledOutput,
    },
    StageDescriptor {
        name: StageName::Optimization,
        enabled: |config| config.features.optimization,
        requires: Requirement::AssembledOutput,
    },
];

/// Stages that run for `config`, in execution order.
pub fn stages_for(config: &JobConfig) -> Vec<&'static StageDescriptor> {
    PIPELINE.iter().filter(|d| (d.enabled)(config)).collect()
}

/// Per-run context handed to every stage.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub job_id: JobId,
    pub config: Arc<JobConfig>,
    pub cancel: CancellationToken,
}

/// Everything the stages of one run have produced so far.
#[derive(Debug, Clone, Default)]
pub struct RunState {
    pub items: Vec<ProcessedItem>,
    pub gate: Option<GateOutcome>,
    pub assembled: Option<Routed<AssembledOutput>>,
    pub evaluation: Option<EvaluationReport>,
    pub optimization: Option<OptimizationOutcome>,
}

impl RunState {
    pub fn usable_count(&self) -> usize {
        self.items.iter().filter(|i| i.is_usable()).count()
    }

    /// Items accepted by the gate, newest first.
    pub fn accepted_items(&self) -> Vec<ProcessedItem> {
        let Some(gate) = &self.gate else {
            return Vec::new();
        };
        let by_id: BTreeMap<ItemId, &ProcessedItem> =
            self.items.iter().map(|i| (i.id, i)).collect();
        gate.accepted()
            .filter_map(|id| by_id.get(&id).map(|i| (*i).clone()))
            .collect()
    }

    /// Optimized output if optimization ran, otherwise the assembled output.
    pub fn final_output(&self) -> Option<&AssembledOutput> {
        self.optimization
            .as_ref()
            .map(|o| &o.output)
            .or(self.assembled.as_ref().map(|a| &a.value))
    }

    pub fn used_fallback(&self) -> bool {
        self.assembled.as_ref().is_some_and(|a| a.is_fallback())
            || self
                .items
                .iter()
                .flat_map(|i| &i.annotations)
                .any(|a| a.kind == AnnotationKind::Fallback)
    }

    fn unmet(&self, requirement: Requirement) -> Option<&'static str> {
        match requirement {
            Requirement::Nothing => None,
            Requirement::UsableItems if self.usable_count() == 0 => {
                Some("no usable items from upstream stages")
            }
            Requirement::AcceptedItems
                if self.gate.as_ref().is_none_or(|g| g.accepted_count() == 0) =>
            {
                Some("no items accepted by the quality gate")
            }
            Requirement::AssembledOutput if self.final_output().is_none() => {
                Some("no assembled output")
            }
            _ => None,
        }
    }
}

/// What a stage reports back to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutcome {
    pub status: StageStatus,
    pub counts: ItemCounts,
    pub summary: Option<String>,
}

impl StageOutcome {
    pub fn completed(counts: ItemCounts) -> Self {
        Self {
            status: StageStatus::Completed,
            counts,
            summary: None,
        }
    }

    pub fn failed(counts: ItemCounts, summary: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Failed,
            counts,
            summary: Some(summary.into()),
        }
    }
}

pub struct StageRunner {
    providers: Providers,
}

impl std::fmt::Debug for StageRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRunner")
            .field("providers", &self.providers)
            .finish()
    }
}

impl StageRunner {
    pub fn new(providers: Providers) -> Self {
        Self { providers }
    }

    pub fn providers(&self) -> &Providers {
        &self.providers
    }

    /// Why `stage` must be skipped given what has run so far, if it must.
    pub fn skip_reason(&self, stage: &StageDescriptor, state: &RunState) -> Option<String> {
        match stage.name {
            StageName::Evaluation if self.providers.evaluator.is_empty() => {
                return Some("no evaluator configured".to_string());
            }
            StageName::Optimization if self.providers.optimizer.is_empty() => {
                return Some("no optimizer configured".to_string());
            }
            _ => {}
        }
        state.unmet(stage.requires).map(str::to_string)
    }

    pub async fn execute(
        &self,
        stage: StageName,
        ctx: &StageContext,
        state: &mut RunState,
    ) -> StageOutcome {
        match stage {
            StageName::Ingest => self.ingest(ctx, state).await,
            StageName::Classify => self.classify(ctx, state).await,
            StageName::Rewrite => self.rewrite(ctx, state).await,
            StageName::QualityGate => self.quality_gate(ctx, state),
            StageName::Assemble => self.assemble(state).await,
            StageName::Evaluation => self.evaluate(state).await,
            StageName::Optimization => self.optimize(state).await,
        }
    }

    async fn ingest(&self, ctx: &StageContext, state: &mut RunState) -> StageOutcome {
        let request = FetchRequest {
            job_id: ctx.job_id,
            sources: ctx.config.sources.clone(),
            max_items: ctx.config.max_items,
        };

        match self.providers.fetcher.invoke(fetch_call(request)).await {
            Ok(routed) => {
                let mut raw = routed.value;
                let fetched = raw.len();
                raw.truncate(ctx.config.max_items);
                state.items = raw.into_iter().map(ProcessedItem::from_raw).collect();
                debug!(
                    job_id = %ctx.job_id,
                    provider = %routed.provider,
                    fetched,
                    kept = state.items.len(),
                    "items fetched"
                );
                StageOutcome::completed(ItemCounts::new(fetched, state.items.len(), 0))
            }
            Err(err) => StageOutcome::failed(ItemCounts::default(), err.to_string()),
        }
    }

    async fn classify(&self, ctx: &StageContext, state: &mut RunState) -> StageOutcome {
        let chain = self.providers.classifier.clone();
        let items = std::mem::take(&mut state.items);

        let (items, outcome) = fan_out(StageName::Classify, ctx, items, move |mut item| {
            let chain = chain.clone();
            async move {
                match chain.invoke(classify_call(item.clone())).await {
                    Ok(routed) => {
                        let is_fallback = routed.is_fallback();
                        let Classification {
                            category,
                            confidence,
                        } = routed.value;
                        item.annotate(
                            Annotation::new(
                                StageName::Classify,
                                AnnotationKind::Classified,
                                format!("{category} (confidence {confidence:.2})"),
                            )
                            .with_provider(&routed.provider),
                        );
                        if is_fallback {
                            item.annotate(fallback_annotation(StageName::Classify));
                        }
                        item.category = Some(category);
                    }
                    Err(err) => item.mark_failed(StageName::Classify, err.to_string()),
                }
                item
            }
        })
        .await;

        state.items = items;
        outcome
    }

    async fn rewrite(&self, ctx: &StageContext, state: &mut RunState) -> StageOutcome {
        let chain = self.providers.rewriter.clone();
        let views = Arc::new(ctx.config.gate.declared_views.clone());
        let items = std::mem::take(&mut state.items);

        let (items, outcome) = fan_out(StageName::Rewrite, ctx, items, move |mut item| {
            let chain = chain.clone();
            let views = views.clone();
            async move {
                match chain.invoke(rewrite_call(item.clone(), views)).await {
                    Ok(routed) => {
                        let is_fallback = routed.is_fallback();
                        let RewriteOutput {
                            title,
                            body,
                            views,
                            changes,
                        } = routed.value;
                        item.annotate(
                            Annotation::new(
                                StageName::Rewrite,
                                AnnotationKind::Rewritten,
                                format!("{} change(s)", changes.len()),
                            )
                            .with_provider(&routed.provider),
                        );
                        for change in changes {
                            let mut note =
                                Annotation::new(StageName::Rewrite, AnnotationKind::Change, change.note);
                            if let Some(span) = change.span {
                                note = note.with_span(span);
                            }
                            item.annotate(note);
                        }
                        if is_fallback {
                            item.annotate(fallback_annotation(StageName::Rewrite));
                        }
                        item.rewrite = Some(Rewrite { title, body, views });
                    }
                    Err(err) => item.mark_failed(StageName::Rewrite, err.to_string()),
                }
                item
            }
        })
        .await;

        state.items = items;
        outcome
    }

    fn quality_gate(&self, ctx: &StageContext, state: &mut RunState) -> StageOutcome {
        let gate = QualityGate::new(ctx.config.gate.clone());
        let outcome = gate.evaluate_batch(&state.items);

        let verdicts: BTreeMap<ItemId, _> = outcome.verdicts.iter().map(|v| (v.item_id, v)).collect();
        for item in &mut state.items {
            if let Some(verdict) = verdicts.get(&item.id) {
                let note = if verdict.passed {
                    "accepted".to_string()
                } else {
                    format!("rejected: {}", join_codes(&verdict.failed_checks))
                };
                item.annotate(Annotation::new(
                    StageName::QualityGate,
                    AnnotationKind::GateVerdict,
                    note,
                ));
            }
        }

        let total = outcome.verdicts.len();
        let accepted = outcome.accepted_count();
        let rejected = total - accepted;

        let mut tally: BTreeMap<ReasonCode, usize> = BTreeMap::new();
        for verdict in outcome.rejected() {
            for code in &verdict.failed_checks {
                *tally.entry(*code).or_default() += 1;
            }
        }
        debug!(job_id = %ctx.job_id, total, accepted, "quality gate evaluated");
        state.gate = Some(outcome);

        let counts = ItemCounts::new(total, accepted, rejected);
        let summary = (rejected > 0).then(|| {
            let codes = tally
                .iter()
                .map(|(code, n)| format!("{code} ({n})"))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{rejected} of {total} items rejected: {codes}")
        });

        StageOutcome {
            status: if accepted > 0 || total == 0 {
                StageStatus::Completed
            } else {
                StageStatus::Failed
            },
            counts,
            summary,
        }
    }

    async fn assemble(&self, state: &mut RunState) -> StageOutcome {
        let accepted = state.accepted_items();
        let input = accepted.len();

        match self.providers.assembler.invoke(assemble_call(accepted)).await {
            Ok(routed) => {
                let assembled = routed.value.item_count();
                state.assembled = Some(routed);
                StageOutcome::completed(ItemCounts::new(
                    input,
                    assembled,
                    input.saturating_sub(assembled),
                ))
            }
            Err(err) => StageOutcome::failed(ItemCounts::new(input, 0, input), err.to_string()),
        }
    }

    async fn evaluate(&self, state: &mut RunState) -> StageOutcome {
        let Some(output) = state.final_output().cloned() else {
            return StageOutcome::failed(ItemCounts::default(), "no assembled output");
        };
        let n = output.item_count();

        match self.providers.evaluator.invoke(evaluate_call(output)).await {
            Ok(routed) => {
                state.evaluation = Some(routed.value);
                StageOutcome::completed(ItemCounts::new(n, n, 0))
            }
            Err(err) => StageOutcome::failed(ItemCounts::new(n, 0, n), err.to_string()),
        }
    }

    async fn optimize(&self, state: &mut RunState) -> StageOutcome {
        let Some(output) = state.final_output().cloned() else {
            return StageOutcome::failed(ItemCounts::default(), "no assembled output");
        };
        let n = output.item_count();
        let evaluation = state.evaluation.clone();

        match self
            .providers
            .optimizer
            .invoke(optimize_call(output, evaluation))
            .await
        {
            Ok(routed) => {
                let kept = routed.value.output.item_count();
                state.optimization = Some(routed.value);
                StageOutcome::completed(ItemCounts::new(n, kept, n.saturating_sub(kept)))
            }
            Err(err) => StageOutcome::failed(ItemCounts::new(n, 0, n), err.to_string()),
        }
    }
}

/// Run `op` over every usable item with at most `max_in_flight` in flight.
///
/// Items that already failed upstream pass through untouched and uncounted.
/// Once cancellation is observed no further item is started; items already
/// in flight finish. A panicking item is marked failed, not lost.
async fn fan_out<F, Fut>(
    stage: StageName,
    ctx: &StageContext,
    items: Vec<ProcessedItem>,
    op: F,
) -> (Vec<ProcessedItem>, StageOutcome)
where
    F: Fn(ProcessedItem) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = ProcessedItem> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(ctx.config.max_in_flight.max(1)));
    let mut slots: Vec<Option<ProcessedItem>> = Vec::with_capacity(items.len());
    let mut in_flight = Vec::new();
    let mut cancelled = false;

    for (index, item) in items.into_iter().enumerate() {
        if cancelled || !item.is_usable() {
            slots.push(Some(item));
            continue;
        }

        let permit = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => None,
            permit = semaphore.clone().acquire_owned() => permit.ok(),
        };
        let Some(permit) = permit else {
            debug!(job_id = %ctx.job_id, %stage, "cancellation observed; no new items started");
            cancelled = true;
            slots.push(Some(item));
            continue;
        };

        slots.push(None);
        let backup = item.clone();
        let op = op.clone();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            op(item).await
        });
        in_flight.push((index, backup, handle));
    }

    let dispatched = in_flight.len();
    let mut succeeded = 0;
    let mut reasons = BTreeSet::new();
    for (index, mut backup, handle) in in_flight {
        let item = match handle.await {
            Ok(item) => item,
            Err(err) => {
                error!(job_id = %ctx.job_id, %stage, item_id = %backup.id, error = %err, "item task panicked");
                backup.mark_failed(stage, "item processing panicked");
                backup
            }
        };
        match &item.failure {
            None => succeeded += 1,
            Some(failure) => {
                reasons.insert(failure.reason.clone());
            }
        }
        slots[index] = Some(item);
    }

    let failed = dispatched - succeeded;
    let outcome = StageOutcome {
        status: if dispatched == 0 {
            StageStatus::Completed
        } else {
            StageStatus::from_counts(succeeded, failed)
        },
        counts: ItemCounts::new(dispatched, succeeded, failed),
        summary: (failed > 0).then(|| {
            format!(
                "{failed} of {dispatched} items failed: {}",
                summarize(&reasons)
            )
        }),
    };

    (slots.into_iter().flatten().collect(), outcome)
}

fn summarize(reasons: &BTreeSet<String>) -> String {
    const SHOWN: usize = 3;
    let mut out = reasons
        .iter()
        .take(SHOWN)
        .cloned()
        .collect::<Vec<_>>()
        .join("; ");
    if reasons.len() > SHOWN {
        out.push_str(&format!("; and {} more", reasons.len() - SHOWN));
    }
    out
}

fn join_codes(codes: &[ReasonCode]) -> String {
    codes
        .iter()
        .map(ReasonCode::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn fallback_annotation(stage: StageName) -> Annotation {
    Annotation::new(
        stage,
        AnnotationKind::Fallback,
        format!("deterministic fallback used for {stage}"),
    )
}

fn fetch_call(request: FetchRequest) -> impl Fn(Arc<dyn Fetcher>) -> ProviderFuture<Vec<RawItem>> {
    move |fetcher| {
        let request = request.clone();
        Box::pin(async move { fetcher.fetch(&request).await })
    }
}

fn classify_call(item: ProcessedItem) -> impl Fn(Arc<dyn Classifier>) -> ProviderFuture<Classification> {
    move |classifier| {
        let item = item.clone();
        Box::pin(async move { classifier.classify(&item).await })
    }
}

fn rewrite_call(
    item: ProcessedItem,
    views: Arc<Vec<String>>,
) -> impl Fn(Arc<dyn Rewriter>) -> ProviderFuture<RewriteOutput> {
    move |rewriter| {
        let item = item.clone();
        let views = views.clone();
        Box::pin(async move { rewriter.rewrite(&item, &views).await })
    }
}

fn assemble_call(items: Vec<ProcessedItem>) -> impl Fn(Arc<dyn Assembler>) -> ProviderFuture<AssembledOutput> {
    let items = Arc::new(items);
    move |assembler| {
        let items = items.clone();
        Box::pin(async move { assembler.assemble(&items).await })
    }
}

fn evaluate_call(output: AssembledOutput) -> impl Fn(Arc<dyn Evaluator>) -> ProviderFuture<EvaluationReport> {
    move |evaluator| {
        let output = output.clone();
        Box::pin(async move { evaluator.evaluate(&output).await })
    }
}

fn optimize_call(
    output: AssembledOutput,
    evaluation: Option<EvaluationReport>,
) -> impl Fn(Arc<dyn Optimizer>) -> ProviderFuture<OptimizationOutcome> {
    move |optimizer| {
        let output = output.clone();
        let evaluation = evaluation.clone();
        Box::pin(async move { optimizer.optimize(&output, evaluation.as_ref()).await })
    }
}
