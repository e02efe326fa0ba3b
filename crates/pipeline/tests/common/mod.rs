#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use pressroom_core::{
    FinalizeOutcome, Job, JobConfig, JobFilter, JobId, JobStatus, LedgerError, LedgerResult,
    ProcessedItem, RawItem, StageName, StageResult,
};
use pressroom_infra::{InMemoryJobLedger, JobLedger};
use pressroom_pipeline::{
    AssembledOutput, ChangeNote, Classification, Classifier, EvaluationReport, Evaluator,
    FetchRequest, Fetcher, RewriteOutput, Rewriter,
};
use pressroom_resilience::{
    CircuitBreakerConfig, ProviderError, ProviderRegistry, ProviderSettings, RateLimit,
    RetryPolicy,
};

/// Registry whose providers fail fast: no retries, breaker opens on the first
/// exhausted call.
pub fn fast_registry() -> Arc<ProviderRegistry> {
    Arc::new(ProviderRegistry::new(ProviderSettings {
        breaker: CircuitBreakerConfig {
            failure_threshold: 1,
            cooldown: Duration::from_secs(60),
        },
        retry: RetryPolicy::no_retry(),
        rate_limit: RateLimit::per_second(1_000),
        call_timeout: Duration::from_secs(5),
    }))
}

pub fn raw(n: u32, topic: &str) -> RawItem {
    RawItem {
        source_id: format!("source-{n}"),
        url: Some(format!("https://news.example/{n}")),
        title: format!("Story {n} about {topic}"),
        body: format!(
            "Reporters covered the {topic} story number {n} in depth this week. \
             Officials shared new figures and residents described what changed for them."
        ),
        published_at: Utc.with_ymd_and_hms(2026, 3, 1, 8, n, 0).unwrap(),
        reachable: true,
    }
}

pub fn batch(n: u32) -> Vec<RawItem> {
    (1..=n).map(|i| raw(i, "software")).collect()
}

pub struct StaticFetcher(pub Vec<RawItem>);

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<RawItem>, ProviderError> {
        Ok(self.0.iter().take(request.max_items).cloned().collect())
    }
}

pub struct DownFetcher;

#[async_trait]
impl Fetcher for DownFetcher {
    async fn fetch(&self, _: &FetchRequest) -> Result<Vec<RawItem>, ProviderError> {
        Err(ProviderError::transient("connection refused"))
    }
}

/// Panics while fetching, outside any per-item task.
pub struct PanickingFetcher;

#[async_trait]
impl Fetcher for PanickingFetcher {
    async fn fetch(&self, _: &FetchRequest) -> Result<Vec<RawItem>, ProviderError> {
        panic!("feed parser blew up");
    }
}

pub struct FixedClassifier(pub &'static str);

#[async_trait]
impl Classifier for FixedClassifier {
    async fn classify(&self, _: &ProcessedItem) -> Result<Classification, ProviderError> {
        Ok(Classification {
            category: self.0.to_string(),
            confidence: 0.9,
        })
    }
}

pub struct DownClassifier;

#[async_trait]
impl Classifier for DownClassifier {
    async fn classify(&self, _: &ProcessedItem) -> Result<Classification, ProviderError> {
        Err(ProviderError::transient("503 service unavailable"))
    }
}

/// Panics on the item whose original title is `title`, classifies the rest.
pub struct PanickingClassifier {
    pub title: String,
}

#[async_trait]
impl Classifier for PanickingClassifier {
    async fn classify(&self, item: &ProcessedItem) -> Result<Classification, ProviderError> {
        if item.original.title == self.title {
            panic!("tokenizer overflow");
        }
        Ok(Classification {
            category: "technology".to_string(),
            confidence: 0.8,
        })
    }
}

/// Cancels `token` from inside the first call, as if a cancel request
/// arrived while the stage was running.
pub struct CancellingClassifier(pub CancellationToken);

#[async_trait]
impl Classifier for CancellingClassifier {
    async fn classify(&self, _: &ProcessedItem) -> Result<Classification, ProviderError> {
        self.0.cancel();
        Ok(Classification {
            category: "technology".to_string(),
            confidence: 0.5,
        })
    }
}

/// Rewrites everything except items whose original title is `reject`.
pub struct PickyRewriter {
    pub reject: String,
}

#[async_trait]
impl Rewriter for PickyRewriter {
    async fn rewrite(
        &self,
        item: &ProcessedItem,
        views: &[String],
    ) -> Result<RewriteOutput, ProviderError> {
        if item.original.title == self.reject {
            return Err(ProviderError::permanent("unsupported language"));
        }
        let views: BTreeMap<String, String> = views
            .iter()
            .map(|v| (v.clone(), format!("{v}: {}", item.original.title)))
            .collect();
        Ok(RewriteOutput {
            title: item.original.title.clone(),
            body: item.original.body.clone(),
            views,
            changes: vec![ChangeNote {
                note: "tightened lede".to_string(),
                span: None,
            }],
        })
    }
}

pub struct FixedEvaluator(pub f64);

#[async_trait]
impl Evaluator for FixedEvaluator {
    async fn evaluate(&self, _: &AssembledOutput) -> Result<EvaluationReport, ProviderError> {
        Ok(EvaluationReport {
            score: self.0,
            notes: vec!["balanced coverage".to_string()],
        })
    }
}

/// In-memory ledger whose store fails when asked to record `fail_on`.
pub struct FailingLedger {
    pub inner: Arc<InMemoryJobLedger>,
    pub fail_on: StageName,
}

#[async_trait]
impl JobLedger for FailingLedger {
    async fn create(&self, config: JobConfig) -> LedgerResult<Job> {
        self.inner.create(config).await
    }

    async fn mark_started(&self, id: JobId) -> LedgerResult<Job> {
        self.inner.mark_started(id).await
    }

    async fn record_stage_result(&self, id: JobId, result: StageResult) -> LedgerResult<Job> {
        if result.stage == self.fail_on {
            return Err(LedgerError::storage("disk full"));
        }
        self.inner.record_stage_result(id, result).await
    }

    async fn finalize(
        &self,
        id: JobId,
        status: JobStatus,
        reason: Option<String>,
    ) -> LedgerResult<FinalizeOutcome> {
        self.inner.finalize(id, status, reason).await
    }

    async fn request_cancel(&self, id: JobId) -> LedgerResult<Job> {
        self.inner.request_cancel(id).await
    }

    async fn get(&self, id: JobId) -> LedgerResult<Job> {
        self.inner.get(id).await
    }

    async fn list(&self, filter: &JobFilter) -> LedgerResult<Vec<Job>> {
        self.inner.list(filter).await
    }
}
