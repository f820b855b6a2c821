use axum::{
    Router,
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{
        Json,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::SubmitError;
use crate::events::PipelineEvent;
use crate::jobs::{JobQueue, RunState, RunView};
use crate::types::{Entry, TaskSpec};

/// Default request body ceiling; large enough for runs of a few hundred
/// thousand short entries.
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    queue: JobQueue,
    max_body_bytes: usize,
}

impl AppState {
    pub fn new(queue: JobQueue) -> Self {
        Self {
            queue,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitRunRequest {
    pub entries: Vec<Entry>,
    /// Overrides the configured labels and prompt for this run only.
    #[serde(default)]
    pub task: Option<TaskSpec>,
}

#[derive(Debug, Serialize)]
pub struct SubmitRunResponse {
    pub id: Uuid,
    pub state: RunState,
}

/// Routes without the metrics layer; `main` adds `/metrics` on top.
pub fn router(state: AppState) -> Router {
    let body_limit = DefaultBodyLimit::max(state.max_body_bytes);
    Router::new()
        .route("/health", get(health_handler))
        .route("/runs", post(submit_run_handler))
        .route("/runs/:id", get(run_status_handler).delete(cancel_run_handler))
        .route("/runs/:id/events", get(run_events_handler))
        .layer(body_limit)
        .with_state(state)
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

#[tracing::instrument(skip(state, request), fields(entries = request.entries.len()))]
async fn submit_run_handler(
    State(state): State<AppState>,
    Json(request): Json<SubmitRunRequest>,
) -> Result<(StatusCode, Json<SubmitRunResponse>), StatusCode> {
    if request.entries.is_empty() {
        tracing::warn!("Rejecting run without entries");
        return Err(StatusCode::BAD_REQUEST);
    }

    let id = state
        .queue
        .submit(request.entries, request.task.as_ref())
        .map_err(|e| match &e {
            SubmitError::InvalidTask(_) => {
                tracing::warn!(error = %e, "Rejecting run with invalid task");
                StatusCode::BAD_REQUEST
            }
            SubmitError::QueueClosed => {
                tracing::error!(error = %e, "Failed to queue run");
                StatusCode::SERVICE_UNAVAILABLE
            }
        })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitRunResponse {
            id,
            state: RunState::Queued,
        }),
    ))
}

async fn run_status_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RunView>, StatusCode> {
    state
        .queue
        .registry()
        .view(id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

#[tracing::instrument(skip(state))]
async fn cancel_run_handler(State(state): State<AppState>, Path(id): Path<Uuid>) -> StatusCode {
    if state.queue.registry().cancel(id) {
        tracing::info!(run_id = %id, "Run cancellation requested");
        StatusCode::ACCEPTED
    } else {
        StatusCode::NOT_FOUND
    }
}

/// Streams a `snapshot` event, then every pipeline event until the run ends.
#[tracing::instrument(skip(state))]
async fn run_events_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    let (snapshot, feed) = state
        .queue
        .registry()
        .subscribe(id)
        .ok_or(StatusCode::NOT_FOUND)?;

    let first = stream::once(async move { Ok::<_, Infallible>(json_event("snapshot", &snapshot)) });
    let live = stream::unfold(feed, |feed| async move {
        let mut rx = feed?;
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let next = (!event.is_terminal()).then_some(rx);
                    return Some((Ok::<_, Infallible>(pipeline_event(&event)), next));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagged, dropping events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Ok(Sse::new(first.chain(live)).keep_alive(KeepAlive::default()))
}

fn pipeline_event(event: &PipelineEvent) -> Event {
    json_event(event.kind(), event)
}

fn json_event(name: &str, payload: &impl Serialize) -> Event {
    match Event::default().event(name).json_data(payload) {
        Ok(event) => event,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize event");
            Event::default().event("error").data(e.to_string())
        }
    }
}
