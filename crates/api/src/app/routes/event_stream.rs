//! Live job lifecycle events over Server-Sent Events.
//!
//! Each SSE event is named after the job event topic (`job.started`,
//! `job.stage_finished`, `job.finished`) and carries the event as JSON.
//! Subscribers that fall behind miss events; the stream itself stays open.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Extension, Query},
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse,
    },
};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::debug;

use crate::app::dto;
use crate::app::services::AppServices;

/// GET /jobs/events
///
/// Optional `job_id` query parameter restricts the stream to one job.
pub async fn stream_job_events(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::EventsQuery>,
) -> axum::response::Response {
    let only = match query.job_id.as_deref().map(dto::parse_job_id).transpose() {
        Ok(only) => only,
        Err(resp) => return resp,
    };

    let stream = BroadcastStream::new(services.pipeline.subscribe()).filter_map(move |message| {
        match message {
            Ok(event) if only.is_none_or(|id| event.job_id() == id) => SseEvent::default()
                .event(event.topic())
                .json_data(&event)
                .ok()
                .map(Ok::<_, Infallible>),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                debug!(skipped, "event stream subscriber lagged");
                None
            }
        }
    });

    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response()
}
