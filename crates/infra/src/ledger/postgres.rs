//! Postgres-backed job ledger.
//!
//! One row per job in `pipeline_jobs`. Configuration and stage results are
//! stored as JSONB; the schema enforces `finished_at IS NOT NULL` exactly when
//! the status is terminal.
//!
//! Every write runs in its own transaction:
//! 1. `SELECT ... FOR UPDATE` locks the job row, so concurrent writers to the
//!    same job serialize
//! 2. the transition is applied in memory via [`Job`]'s state machine
//! 3. the row is updated and the transaction committed before returning
//!
//! A rejected transition rolls back without touching the row.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use pressroom_core::{
    FinalizeOutcome, Job, JobConfig, JobFilter, JobId, JobStatus, LedgerError, LedgerResult,
    StageResult,
};

use super::JobLedger;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pipeline_jobs (
    id                UUID PRIMARY KEY,
    status            TEXT NOT NULL,
    config            JSONB NOT NULL,
    created_at        TIMESTAMPTZ NOT NULL,
    started_at        TIMESTAMPTZ,
    finished_at       TIMESTAMPTZ,
    cancel_requested  BOOLEAN NOT NULL DEFAULT FALSE,
    stages            JSONB NOT NULL DEFAULT '[]'::jsonb,
    terminal_reason   TEXT,
    CONSTRAINT pipeline_jobs_status_check CHECK (
        status IN ('pending', 'running', 'completed', 'partial', 'failed', 'cancelled')
    ),
    CONSTRAINT pipeline_jobs_finished_iff_terminal CHECK (
        (finished_at IS NOT NULL) = (status IN ('completed', 'partial', 'failed', 'cancelled'))
    )
);

CREATE INDEX IF NOT EXISTS pipeline_jobs_status_idx ON pipeline_jobs (status, created_at);
"#;

const SELECT_COLUMNS: &str = "id, status, config, created_at, started_at, finished_at, \
                              cancel_requested, stages, terminal_reason";

#[derive(Debug, Clone)]
pub struct PostgresJobLedger {
    pool: Arc<PgPool>,
}

impl PostgresJobLedger {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect and make sure the schema exists.
    pub async fn connect(database_url: &str) -> LedgerResult<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let ledger = Self::new(pool);
        ledger.migrate().await?;
        Ok(ledger)
    }

    /// Create the `pipeline_jobs` table if it does not exist.
    pub async fn migrate(&self) -> LedgerResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    /// Lock the row, apply `apply` to the loaded job and persist the result.
    async fn update<T: Send>(
        &self,
        operation: &'static str,
        id: JobId,
        apply: impl FnOnce(&mut Job) -> LedgerResult<T> + Send,
    ) -> LedgerResult<(T, Job)> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut job = lock_job(&mut tx, id).await?;
        let out = match apply(&mut job) {
            Ok(out) => out,
            Err(err) => {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(err);
            }
        };

        sqlx::query(
            r#"
            UPDATE pipeline_jobs
            SET status = $2,
                started_at = $3,
                finished_at = $4,
                cancel_requested = $5,
                stages = $6,
                terminal_reason = $7
            WHERE id = $1
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.status.as_str())
        .bind(job.started_at)
        .bind(job.finished_at)
        .bind(job.cancel_requested)
        .bind(Json(&job.stages))
        .bind(job.terminal_reason.as_deref())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error(operation, e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok((out, job))
    }
}

#[async_trait]
impl JobLedger for PostgresJobLedger {
    #[instrument(skip(self, config), err)]
    async fn create(&self, config: JobConfig) -> LedgerResult<Job> {
        let job = Job::new(config);

        sqlx::query(
            r#"
            INSERT INTO pipeline_jobs (id, status, config, created_at, cancel_requested, stages)
            VALUES ($1, $2, $3, $4, FALSE, '[]'::jsonb)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.status.as_str())
        .bind(Json(&job.config))
        .bind(job.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_job", e))?;

        Ok(job)
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn mark_started(&self, id: JobId) -> LedgerResult<Job> {
        let now = Utc::now();
        self.update("mark_started", id, |job| job.mark_started(now))
            .await
            .map(|(_, job)| job)
    }

    #[instrument(skip(self, result), fields(job_id = %id, stage = %result.stage), err)]
    async fn record_stage_result(&self, id: JobId, result: StageResult) -> LedgerResult<Job> {
        self.update("record_stage_result", id, |job| job.record_stage(result))
            .await
            .map(|(_, job)| job)
    }

    #[instrument(skip(self, reason), fields(job_id = %id, status = %status), err)]
    async fn finalize(
        &self,
        id: JobId,
        status: JobStatus,
        reason: Option<String>,
    ) -> LedgerResult<FinalizeOutcome> {
        let now = Utc::now();
        self.update("finalize", id, |job| job.finalize(status, reason, now))
            .await
            .map(|(outcome, _)| outcome)
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn request_cancel(&self, id: JobId) -> LedgerResult<Job> {
        self.update("request_cancel", id, Job::request_cancel)
            .await
            .map(|(_, job)| job)
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn get(&self, id: JobId) -> LedgerResult<Job> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM pipeline_jobs WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_job", e))?;

        match row {
            Some(row) => job_from_row(&row),
            None => Err(LedgerError::JobNotFound(id)),
        }
    }

    #[instrument(skip(self), err)]
    async fn list(&self, filter: &JobFilter) -> LedgerResult<Vec<Job>> {
        let statuses: Vec<&str> = filter.statuses.iter().map(|s| s.as_str()).collect();
        let limit = filter
            .limit
            .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
            .unwrap_or(i64::MAX);

        let rows = sqlx::query(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM pipeline_jobs
            WHERE cardinality($1::text[]) = 0 OR status = ANY($1)
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            "#
        ))
        .bind(&statuses)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_jobs", e))?;

        rows.iter().map(job_from_row).collect()
    }
}

async fn lock_job(tx: &mut Transaction<'_, Postgres>, id: JobId) -> LedgerResult<Job> {
    let row = sqlx::query(&format!(
        "SELECT {SELECT_COLUMNS} FROM pipeline_jobs WHERE id = $1 FOR UPDATE"
    ))
    .bind(id.as_uuid())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("lock_job", e))?;

    match row {
        Some(row) => job_from_row(&row),
        None => Err(LedgerError::JobNotFound(id)),
    }
}

fn job_from_row(row: &sqlx::postgres::PgRow) -> LedgerResult<Job> {
    let decode = |e: sqlx::Error| LedgerError::storage(format!("failed to decode job row: {e}"));

    let id: Uuid = row.try_get("id").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;
    let Json(config): Json<JobConfig> = row.try_get("config").map_err(decode)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(decode)?;
    let started_at: Option<DateTime<Utc>> = row.try_get("started_at").map_err(decode)?;
    let finished_at: Option<DateTime<Utc>> = row.try_get("finished_at").map_err(decode)?;
    let cancel_requested: bool = row.try_get("cancel_requested").map_err(decode)?;
    let Json(stages): Json<Vec<StageResult>> = row.try_get("stages").map_err(decode)?;
    let terminal_reason: Option<String> = row.try_get("terminal_reason").map_err(decode)?;

    let status = status
        .parse::<JobStatus>()
        .map_err(|e| LedgerError::storage(format!("failed to decode job row: {e}")))?;

    Ok(Job {
        id: JobId::from_uuid(id),
        status,
        config,
        created_at,
        started_at,
        finished_at,
        cancel_requested,
        stages,
        terminal_reason,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
            LedgerError::storage(format!(
                "database error in {operation} (code {code}): {}",
                db_err.message()
            ))
        }
        sqlx::Error::PoolClosed => {
            LedgerError::storage(format!("connection pool closed in {operation}"))
        }
        other => LedgerError::storage(format!("sqlx error in {operation}: {other}")),
    }
}
