use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use pressroom_pipeline::PipelineError;

pub fn pipeline_error_to_response(err: PipelineError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        PipelineError::JobNotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", message),
        PipelineError::InvalidTransition { .. } => {
            json_error(StatusCode::CONFLICT, "invalid_transition", message)
        }
        PipelineError::AlreadyTerminal { .. } => {
            json_error(StatusCode::CONFLICT, "already_terminal", message)
        }
        PipelineError::InvalidConfig(_) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", message)
        }
        PipelineError::OrchestratorFault(_) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "orchestrator_fault", message)
        }
        PipelineError::Storage(_) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", message)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
