use std::convert::Infallible;
use std::pin::Pin;

use axum::{
    extract::{Query, State},
    response::sse::{Event, Sse},
    routing::get,
    Router,
};
use serde::Deserialize;
use tokio_stream::StreamExt;

use stepflow_core::events::Received;
use stepflow_core::{AppState, EngineError};

type SseStream = Pin<Box<dyn tokio_stream::Stream<Item = Result<Event, Infallible>> + Send>>;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(event_stream))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventStreamQuery {
    workflow_id: Option<String>,
}

/// Raw run events as they are published, optionally for one workflow.
async fn event_stream(
    State(state): State<AppState>,
    Query(query): Query<EventStreamQuery>,
) -> Result<Sse<SseStream>, EngineError> {
    let mut subscription = state
        .channel
        .subscribe("sse")
        .ok_or_else(|| EngineError::Internal("Notification channel is closed".to_string()))?;

    let connected = serde_json::json!({
        "type": "connected",
        "subscriberId": subscription.id(),
    });
    let initial = tokio_stream::once(Ok::<_, Infallible>(
        Event::default().event("connected").data(connected.to_string()),
    ));

    // Heartbeat (keep connection alive)
    let heartbeat = tokio_stream::wrappers::IntervalStream::new(tokio::time::interval(
        std::time::Duration::from_secs(15),
    ))
    .map(|_| Ok(Event::default().comment("heartbeat")));

    let filter = query.workflow_id;
    let events = async_stream::stream! {
        loop {
            match subscription.recv().await {
                Received::Event(event) => {
                    if filter.as_ref().is_some_and(|id| *id != event.workflow_id) {
                        continue;
                    }
                    yield Ok::<_, Infallible>(
                        Event::default()
                            .event("run")
                            .data(serde_json::to_string(&event).unwrap_or_default()),
                    );
                }
                Received::Lagged(missed) => {
                    yield Ok(Event::default()
                        .event("lagged")
                        .data(serde_json::json!({ "missed": missed }).to_string()));
                }
                Received::Closed => break,
            }
        }
    };

    let stream: SseStream = Box::pin(initial.chain(events.merge(heartbeat)));
    Ok(Sse::new(stream))
}
