use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use pressroom_core::{JobConfig, JobFilter, JobId, JobStatus};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

/// `GET /jobs?status=running,pending&limit=20`
#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

impl ListJobsQuery {
    pub fn to_filter(&self) -> Result<JobFilter, axum::response::Response> {
        let mut filter = JobFilter::all();
        if let Some(raw) = &self.status {
            for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let status: JobStatus = part.parse().map_err(|msg: String| {
                    errors::json_error(StatusCode::BAD_REQUEST, "invalid_status", msg)
                })?;
                filter = filter.with_status(status);
            }
        }
        if let Some(limit) = self.limit {
            filter = filter.with_limit(limit);
        }
        Ok(filter)
    }
}

/// `GET /jobs/events?job_id=...`
#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    pub job_id: Option<String>,
}

/// An empty body starts a job with the default configuration.
pub fn parse_job_config(body: &[u8]) -> Result<JobConfig, axum::response::Response> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(JobConfig::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_body",
            format!("invalid job config: {e}"),
        )
    })
}

pub fn parse_job_id(raw: &str) -> Result<JobId, axum::response::Response> {
    raw.parse()
        .map_err(|e: pressroom_core::id::InvalidId| {
            errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string())
        })
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct JobAccepted {
    pub job_id: JobId,
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
pub struct Items<T> {
    pub items: Vec<T>,
}
