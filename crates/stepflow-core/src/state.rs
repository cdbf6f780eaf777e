//! Shared application state for the server and CLI.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::db::Database;
use crate::error::EngineError;
use crate::events::NotificationChannel;
use crate::store::WorkflowStore;
use crate::sync::StatusSynchronizer;
use crate::workflow::{HttpModelService, ModelService, RunOrchestrator, StepInvoker};

/// Shared state accessible by all API handlers and commands.
pub struct AppStateInner {
    pub db: Database,
    pub workflow_store: WorkflowStore,
    pub channel: NotificationChannel,
    pub orchestrator: RunOrchestrator,
    pub config: EngineConfig,
}

pub type AppState = Arc<AppStateInner>;

impl AppStateInner {
    /// Wire the engine around `db`, calling models through `model_service`.
    pub fn new(db: Database, config: EngineConfig, model_service: Arc<dyn ModelService>) -> Self {
        let workflow_store = WorkflowStore::new(db.clone());
        let channel = NotificationChannel::open(config.channel_capacity);
        let invoker = StepInvoker::new(model_service, config.invoker);
        let orchestrator = RunOrchestrator::new(workflow_store.clone(), channel.clone(), invoker);
        Self {
            db,
            workflow_store,
            channel,
            orchestrator,
            config,
        }
    }

    /// Wire the engine with the HTTP model service from `config`.
    pub fn with_http_models(db: Database, config: EngineConfig) -> Self {
        let service = Arc::new(HttpModelService::new(config.model_service.clone()));
        Self::new(db, config, service)
    }

    /// A fresh synchronizer attached to this process's channel and store.
    pub fn synchronizer(&self) -> Result<StatusSynchronizer, EngineError> {
        StatusSynchronizer::start(
            &self.channel,
            Arc::new(self.workflow_store.clone()),
            self.config.sync,
        )
    }
}
