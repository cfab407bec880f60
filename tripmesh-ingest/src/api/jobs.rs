//! Job status and progress stream endpoints

use axum::{
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
    Json, Router,
};
use futures::stream::{self, Stream, StreamExt};
use std::convert::Infallible;
use tracing::info;
use tripmesh_common::sse::progress_sse_stream;
use tripmesh_common::ProgressMessage;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::models::IngestionJob;
use crate::AppState;

/// GET /jobs/:job_id
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<IngestionJob>> {
    let job = state.ingestion.tracker().get(job_id).await?;
    Ok(Json(job))
}

/// GET /jobs/:job_id/events
///
/// SSE stream of progress messages. The first event is the job's current
/// state; live messages follow until the job reaches a terminal status.
pub async fn job_events(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    // Subscribe before reading the snapshot so no transition falls in between
    let subscription = state.registry.subscribe(job_id);
    let job = state.ingestion.tracker().get(job_id).await?;

    info!(job_id = %job_id, status = job.status.as_str(), "SSE client subscribed to job progress");

    let snapshot = ProgressMessage {
        status: job.status,
        processed_rows: job.processed_rows,
        total_rows: job.total_rows,
        message: job.message,
    };
    let messages = stream::once(async move { snapshot }).chain(subscription);

    Ok(progress_sse_stream(messages))
}

/// Build job routes
pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/jobs/:job_id", get(get_job))
        .route("/jobs/:job_id/events", get(job_events))
}
