//! Stepflow Server - HTTP surface of the workflow execution engine
//!
//! Serves on top of `stepflow-core`:
//! - RESTful workflow CRUD and run control via axum
//! - Server-Sent Events for raw run events and synchronized workflow views
//!
//! This crate can be used standalone (`stepflow server`) or embedded in
//! another application with a pre-built `AppState`.

pub mod api;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use stepflow_core::{AppState, AppStateInner, Database, EngineConfig};

/// Configuration for the Stepflow server.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3210,
            db_path: "stepflow.db".to_string(),
        }
    }
}

/// Create a shared `AppState` from a database path.
///
/// Runs left `running` by a previous process are marked failed before the
/// state is handed out.
pub async fn create_app_state(db_path: &str, config: EngineConfig) -> Result<AppState, String> {
    let db = Database::open(db_path).map_err(|e| format!("Failed to open database: {}", e))?;

    let state: AppState = Arc::new(AppStateInner::with_http_models(db, config));

    let recovered = state
        .orchestrator
        .recover_interrupted_runs()
        .await
        .map_err(|e| format!("Failed to recover interrupted runs: {}", e))?;
    if !recovered.is_empty() {
        tracing::warn!("Marked {} interrupted run(s) as failed", recovered.len());
    }

    Ok(state)
}

/// Initialize the tracing subscriber (`RUST_LOG` overrides the default filter).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stepflow_server=info,stepflow_core=info,tower_http=info".into()),
        )
        .try_init();
}

/// Start the Stepflow server.
///
/// Returns the actual address the server is listening on.
pub async fn start_server(config: ServerConfig) -> Result<SocketAddr, String> {
    init_tracing();

    tracing::info!(
        "Starting Stepflow server on {}:{}",
        config.host,
        config.port
    );

    let state = create_app_state(&config.db_path, EngineConfig::from_env()).await?;

    start_server_with_state(config, state).await
}

/// Build the full router (API + health check) for `state`.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api::api_router())
        .route("/api/health", axum::routing::get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server with a pre-built `AppState`.
pub async fn start_server_with_state(
    config: ServerConfig,
    state: AppState,
) -> Result<SocketAddr, String> {
    let app = build_router(state);

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| format!("Invalid address: {}", e))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind to {}: {}", addr, e))?;

    let local_addr = listener
        .local_addr()
        .map_err(|e| format!("Failed to get local address: {}", e))?;

    tracing::info!("Stepflow server listening on {}", local_addr);

    // Spawn the server in a background task
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok(local_addr)
}

async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "server": "stepflow-server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
