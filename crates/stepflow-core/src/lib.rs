//! Stepflow Core - workflow execution engine and live status synchronization.
//!
//! A workflow is a named, ordered pipeline of model-invocation steps. This
//! crate stores workflows, runs them one step at a time (threading each
//! accepted output into the next prompt), broadcasts every transition, and
//! lets any number of observers reconstruct the run's exact state. It has
//! **no HTTP framework dependency** by default, making it suitable for use in:
//!
//! - HTTP servers (via `stepflow-server`)
//! - CLI tools (via `stepflow-cli`)
//!
//! # Feature Flags
//!
//! - `axum` - Enables `IntoResponse` impl on `EngineError` for use in axum handlers.
//! - `testing` - Exposes [`testing::ScriptedModelService`] to downstream tests.

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod models;
pub mod state;
pub mod store;
pub mod sync;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod workflow;

// Convenience re-exports
pub use config::EngineConfig;
pub use db::Database;
pub use error::EngineError;
pub use events::{NotificationChannel, RunEvent};
pub use state::{AppState, AppStateInner};
pub use store::WorkflowStore;
pub use sync::{StatusSynchronizer, WorkflowView};
pub use workflow::RunOrchestrator;
