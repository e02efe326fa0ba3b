//! Service wiring: ledger, providers, pipeline service.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use pressroom_infra::{InMemoryJobLedger, JobLedger, PostgresJobLedger, StaleJobSweeper, SweeperHandle};
use pressroom_pipeline::{
    EventBus, HttpCollaborator, InMemoryOutputSink, PipelineService, Providers,
};
use pressroom_resilience::ProviderRegistry;

use crate::config::{AppConfig, Endpoints};

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppServices {
    pub pipeline: PipelineService,
    pub ledger: Arc<dyn JobLedger>,
}

impl std::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppServices")
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

impl AppServices {
    pub fn new(ledger: Arc<dyn JobLedger>, providers: Providers, max_concurrent_jobs: usize) -> Self {
        let pipeline = PipelineService::new(
            ledger.clone(),
            providers,
            InMemoryOutputSink::arc(),
            EventBus::default(),
            max_concurrent_jobs,
        );
        Self { pipeline, ledger }
    }

    /// In-memory ledger with the given providers (tests/dev).
    pub fn in_memory(providers: Providers) -> Self {
        Self::new(InMemoryJobLedger::arc(), providers, pressroom_pipeline::DEFAULT_MAX_CONCURRENT_JOBS)
    }

    pub fn spawn_sweeper(&self, config: &AppConfig) -> SweeperHandle {
        StaleJobSweeper::new(self.ledger.clone(), config.stale_job_timeout, config.sweep_interval).spawn()
    }
}

/// Wire everything `main` needs from configuration.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let ledger: Arc<dyn JobLedger> = match &config.database_url {
        Some(url) => {
            let ledger = PostgresJobLedger::connect(url)
                .await
                .context("failed to connect Postgres job ledger")?;
            info!("using Postgres job ledger");
            Arc::new(ledger)
        }
        None => {
            warn!("DATABASE_URL not set; using in-memory job ledger (jobs are lost on restart)");
            InMemoryJobLedger::arc()
        }
    };

    let registry = Arc::new(ProviderRegistry::new(config.provider.clone()));
    let providers = build_providers(registry, &config.endpoints, config.provider.call_timeout)?;
    Ok(AppServices::new(ledger, providers, config.max_concurrent_jobs))
}

/// HTTP collaborators for every configured endpoint, in primary/secondary
/// order. Roles without an endpoint rely on their deterministic fallback.
pub fn build_providers(
    registry: Arc<ProviderRegistry>,
    endpoints: &Endpoints,
    timeout: Duration,
) -> anyhow::Result<Providers> {
    let client = |name: &str, url: &str| {
        HttpCollaborator::new(name, url, timeout)
            .map(Arc::new)
            .with_context(|| format!("failed to build HTTP client for {name}"))
    };

    let mut builder = Providers::builder(registry);
    if let Some(url) = &endpoints.fetcher {
        builder = builder.fetcher("fetcher", client("fetcher", url)?);
    }
    if let Some(url) = &endpoints.classifier {
        builder = builder.classifier("classifier", client("classifier", url)?);
    }
    if let Some(url) = &endpoints.classifier_secondary {
        builder = builder.classifier("classifier-secondary", client("classifier-secondary", url)?);
    }
    if let Some(url) = &endpoints.rewriter {
        builder = builder.rewriter("rewriter", client("rewriter", url)?);
    }
    if let Some(url) = &endpoints.rewriter_secondary {
        builder = builder.rewriter("rewriter-secondary", client("rewriter-secondary", url)?);
    }
    if let Some(url) = &endpoints.assembler {
        builder = builder.assembler("assembler", client("assembler", url)?);
    }
    if let Some(url) = &endpoints.evaluator {
        builder = builder.evaluator("evaluator", client("evaluator", url)?);
    }
    if let Some(url) = &endpoints.optimizer {
        builder = builder.optimizer("optimizer", client("optimizer", url)?);
    }

    if endpoints.fetcher.is_none() {
        warn!("PRESSROOM_FETCHER_URL not set; every job will fail at ingest");
    }
    Ok(builder.build())
}
