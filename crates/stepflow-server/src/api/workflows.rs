use std::convert::Infallible;
use std::pin::Pin;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, Sse},
    routing::{get, post},
    Json, Router,
};

use stepflow_core::models::{Workflow, WorkflowInput};
use stepflow_core::{AppState, EngineError, WorkflowView};

type SseStream = Pin<Box<dyn tokio_stream::Stream<Item = Result<Event, Infallible>> + Send>>;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_workflows).post(create_workflow))
        .route(
            "/{id}",
            get(get_workflow).put(update_workflow).delete(delete_workflow),
        )
        .route("/{id}/run", post(run_workflow))
        .route("/{id}/cancel", post(cancel_workflow))
        .route("/{id}/watch", get(watch_workflow))
}

async fn list_workflows(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, EngineError> {
    let workflows = state.workflow_store.list().await?;
    Ok(Json(serde_json::json!({ "workflows": workflows })))
}

async fn create_workflow(
    State(state): State<AppState>,
    Json(body): Json<WorkflowInput>,
) -> Result<Json<serde_json::Value>, EngineError> {
    let workflow = state.workflow_store.create(body).await?;
    Ok(Json(serde_json::json!({ "workflow": workflow })))
}

async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Workflow>, EngineError> {
    state
        .workflow_store
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| EngineError::NotFound(format!("Workflow {} not found", id)))
}

async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<WorkflowInput>,
) -> Result<Json<serde_json::Value>, EngineError> {
    let workflow = state.workflow_store.update(&id, body).await?;
    Ok(Json(serde_json::json!({ "workflow": workflow })))
}

async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, EngineError> {
    state.workflow_store.delete(&id).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

/// Start a run and return at once; progress arrives over SSE.
async fn run_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<serde_json::Value>), EngineError> {
    let (workflow_id, run_id) = state.orchestrator.run_workflow(&id).await?.detach();
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "status": "started",
            "workflowId": workflow_id,
            "runId": run_id,
        })),
    ))
}

async fn cancel_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, EngineError> {
    let run_id = state.orchestrator.cancel(&id)?;
    Ok(Json(serde_json::json!({ "cancelling": true, "runId": run_id })))
}

enum WatchTick {
    Changed,
    Stopped,
    Heartbeat,
}

fn view_event(view: &WorkflowView) -> Event {
    Event::default()
        .event("workflow")
        .data(serde_json::to_string(view).unwrap_or_default())
}

/// Stream the synchronized view of one workflow every time it changes.
async fn watch_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<SseStream>, EngineError> {
    let sync = state.synchronizer()?;
    let mut changes = sync.changes();
    let initial = sync
        .attach(&id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("Workflow {} not found", id)))?;

    let stream = async_stream::stream! {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;

        yield Ok::<_, Infallible>(view_event(&initial));
        let mut last = initial;

        loop {
            let tick = tokio::select! {
                changed = changes.changed() => {
                    if changed.is_ok() { WatchTick::Changed } else { WatchTick::Stopped }
                }
                _ = heartbeat.tick() => WatchTick::Heartbeat,
            };
            match tick {
                WatchTick::Changed => match sync.view(&id) {
                    Some(view) if view != last => {
                        yield Ok(view_event(&view));
                        last = view;
                    }
                    Some(_) => {}
                    None => {
                        yield Ok(Event::default()
                            .event("deleted")
                            .data(serde_json::json!({ "workflowId": id }).to_string()));
                        break;
                    }
                },
                WatchTick::Heartbeat => yield Ok(Event::default().comment("heartbeat")),
                WatchTick::Stopped => break,
            }
        }
    };

    Ok(Sse::new(Box::pin(stream)))
}
