use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use crate::app::dto;
use crate::app::services::AppServices;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// GET /providers: circuit state of every guarded provider.
pub async fn providers(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    let items = services.pipeline.provider_health();
    (StatusCode::OK, Json(dto::Items { items })).into_response()
}
