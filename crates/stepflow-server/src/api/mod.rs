pub mod events;
pub mod workflows;

use axum::Router;

use stepflow_core::AppState;

/// Build the complete API router with all sub-routes.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/api/workflows", workflows::router())
        .nest("/api/events", events::router())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use stepflow_core::testing::ScriptedModelService;
    use stepflow_core::{AppState, AppStateInner, Database, EngineConfig};

    fn test_state() -> AppState {
        Arc::new(AppStateInner::new(
            Database::open_in_memory().unwrap(),
            EngineConfig::default(),
            Arc::new(ScriptedModelService::new()),
        ))
    }

    async fn send(
        app: axum::Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(json) => Body::from(json.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_unknown_workflow_is_404() {
        let app = crate::build_router(test_state());
        let (status, body) = send(app, "GET", "/api/workflows/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn test_blank_name_is_400() {
        let app = crate::build_router(test_state());
        let (status, _) = send(
            app,
            "POST",
            "/api/workflows",
            Some(serde_json::json!({ "name": "  ", "steps": [] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cancel_idle_workflow_is_409() {
        let state = test_state();
        let wf = state
            .workflow_store
            .create(stepflow_core::models::WorkflowInput::new("Idle", vec![]))
            .await
            .unwrap();
        let app = crate::build_router(state);
        let uri = format!("/api/workflows/{}/cancel", wf.id);
        let (status, _) = send(app, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }
}
