//! Public entry point: start, inspect and cancel jobs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use pressroom_core::{Job, JobConfig, JobFilter, JobId, JobStatus, LedgerError};
use pressroom_infra::JobLedger;
use pressroom_resilience::ProviderHealth;

use crate::error::PipelineError;
use crate::events::{EventBus, JobEvent};
use crate::orchestrator::Orchestrator;
use crate::providers::Providers;
use crate::sink::{JobOutput, OutputSink};

/// Jobs run concurrently up to this many unless configured otherwise.
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 4;

type RunningJobs = Arc<Mutex<HashMap<JobId, CancellationToken>>>;

#[derive(Clone)]
pub struct PipelineService {
    ledger: Arc<dyn JobLedger>,
    orchestrator: Arc<Orchestrator>,
    sink: Arc<dyn OutputSink>,
    running: RunningJobs,
    permits: Arc<Semaphore>,
}

impl std::fmt::Debug for PipelineService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineService")
            .field("running", &self.running_count())
            .field("available_permits", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

impl PipelineService {
    pub fn new(
        ledger: Arc<dyn JobLedger>,
        providers: Providers,
        sink: Arc<dyn OutputSink>,
        events: EventBus,
        max_concurrent_jobs: usize,
    ) -> Self {
        let orchestrator = Orchestrator::new(ledger.clone(), providers, sink.clone(), events);
        Self {
            ledger,
            orchestrator: Arc::new(orchestrator),
            sink,
            running: Arc::new(Mutex::new(HashMap::new())),
            permits: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
        }
    }

    /// Validate, persist and dispatch a job. Returns as soon as the job is
    /// recorded as `pending`; the run happens in the background.
    #[instrument(skip(self, config), err)]
    pub async fn start_job(&self, config: JobConfig) -> Result<JobId, PipelineError> {
        config.validate().map_err(PipelineError::InvalidConfig)?;
        let job = self.ledger.create(config).await?;
        info!(job_id = %job.id, "job accepted");
        self.dispatch(job.id);
        Ok(job.id)
    }

    pub async fn get_job(&self, id: JobId) -> Result<Job, PipelineError> {
        Ok(self.ledger.get(id).await?)
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, PipelineError> {
        Ok(self.ledger.list(filter).await?)
    }

    /// Request cooperative cancellation. The run stops at the next stage
    /// boundary; items already in flight are allowed to finish.
    #[instrument(skip(self), fields(job_id = %id), err)]
    pub async fn cancel_job(&self, id: JobId) -> Result<Job, PipelineError> {
        let job = self.ledger.request_cancel(id).await.map_err(|err| match err {
            LedgerError::AlreadyTerminal { job_id, status } => PipelineError::InvalidTransition {
                job_id,
                from: status,
                to: JobStatus::Cancelled,
            },
            other => other.into(),
        })?;

        if let Some(token) = self.running.lock().expect("running jobs lock poisoned").get(&id) {
            token.cancel();
        }
        info!("cancellation requested");
        Ok(job)
    }

    /// Re-dispatch jobs left `pending` by a previous process.
    pub async fn recover_pending(&self) -> Result<usize, PipelineError> {
        let pending = self
            .ledger
            .list(&JobFilter::all().with_status(JobStatus::Pending))
            .await?;

        let mut dispatched = 0;
        for job in pending {
            if self.is_running(job.id) {
                continue;
            }
            self.dispatch(job.id);
            dispatched += 1;
        }
        if dispatched > 0 {
            info!(dispatched, "recovered pending jobs");
        }
        Ok(dispatched)
    }

    pub fn output(&self, id: JobId) -> Option<JobOutput> {
        self.sink.output(id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.orchestrator.events().subscribe()
    }

    pub fn provider_health(&self) -> Vec<ProviderHealth> {
        self.orchestrator.providers().health()
    }

    pub fn running_count(&self) -> usize {
        self.running.lock().expect("running jobs lock poisoned").len()
    }

    fn is_running(&self, id: JobId) -> bool {
        self.running
            .lock()
            .expect("running jobs lock poisoned")
            .contains_key(&id)
    }

    fn dispatch(&self, job_id: JobId) {
        let token = CancellationToken::new();
        self.running
            .lock()
            .expect("running jobs lock poisoned")
            .insert(job_id, token.clone());

        let orchestrator = self.orchestrator.clone();
        let permits = self.permits.clone();
        let running = self.running.clone();

        tokio::spawn(async move {
            if let Ok(_permit) = permits.acquire_owned().await {
                match orchestrator.run(job_id, token).await {
                    Ok(status) => debug!(%job_id, %status, "job run ended"),
                    Err(err) => warn!(%job_id, error = %err, "job run ended with error"),
                }
            }
            running
                .lock()
                .expect("running jobs lock poisoned")
                .remove(&job_id);
        });
    }
}
