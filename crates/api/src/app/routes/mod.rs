use axum::{
    routing::{get, post},
    Router,
};

pub mod event_stream;
pub mod jobs;
pub mod system;

/// Router for the job and provider endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/jobs", post(jobs::start_job).get(jobs::list_jobs))
        .route("/jobs/events", get(event_stream::stream_job_events))
        .route("/jobs/:id", get(jobs::get_job))
        .route("/jobs/:id/cancel", post(jobs::cancel_job))
        .route("/jobs/:id/output", get(jobs::get_output))
        .route("/providers", get(system::providers))
}
