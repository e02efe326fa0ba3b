use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use pressroom_core::JobStatus;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

/// POST /jobs
///
/// Returns 202 as soon as the job is recorded; the run continues in the
/// background. Poll `GET /jobs/:id` or subscribe to `/jobs/events`.
pub async fn start_job(
    Extension(services): Extension<Arc<AppServices>>,
    body: Bytes,
) -> axum::response::Response {
    let config = match dto::parse_job_config(&body) {
        Ok(config) => config,
        Err(resp) => return resp,
    };

    match services.pipeline.start_job(config).await {
        Ok(job_id) => (
            StatusCode::ACCEPTED,
            Json(dto::JobAccepted {
                job_id,
                status: JobStatus::Pending,
            }),
        )
            .into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}

/// GET /jobs
pub async fn list_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ListJobsQuery>,
) -> axum::response::Response {
    let filter = match query.to_filter() {
        Ok(filter) => filter,
        Err(resp) => return resp,
    };

    match services.pipeline.list_jobs(&filter).await {
        Ok(items) => (StatusCode::OK, Json(dto::Items { items })).into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}

/// GET /jobs/:id
pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match dto::parse_job_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.pipeline.get_job(id).await {
        Ok(job) => (StatusCode::OK, Json(job)).into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}

/// POST /jobs/:id/cancel
///
/// Cancellation is cooperative: 202 means the request was recorded, not that
/// the job has stopped.
pub async fn cancel_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match dto::parse_job_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.pipeline.cancel_job(id).await {
        Ok(job) => (StatusCode::ACCEPTED, Json(job)).into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}

/// GET /jobs/:id/output
pub async fn get_output(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match dto::parse_job_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    if let Some(output) = services.pipeline.output(id) {
        return (StatusCode::OK, Json(output)).into_response();
    }

    match services.pipeline.get_job(id).await {
        Ok(job) => errors::json_error(
            StatusCode::NOT_FOUND,
            "output_not_available",
            format!("job {id} has no output (status: {})", job.status),
        ),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}
