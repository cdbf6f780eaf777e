//! Run orchestrator - drives one workflow run end-to-end.
//!
//! For each run the orchestrator:
//! 1. Acquires the workflow's run token (atomic `status != running → running`
//!    in the store, which also resets every step to pending)
//! 2. Publishes a workflow-level `running` event and returns immediately
//! 3. In a background task, executes steps in ascending order:
//!    mark running → resolve prompt → invoke model → evaluate criterion
//! 4. Stops at the first failing step, or completes after the last one
//! 5. Persists a terminal status and publishes it, then releases the token
//!
//! Store and channel failures during a run are logged and do not change the
//! run's course. Every run ends in a persisted terminal status, including
//! when the run task itself panics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::error::EngineError;
use crate::events::{EventStatus, NotificationChannel, RunEvent};
use crate::models::criteria::CompletionCriteria;
use crate::models::step::{Step, StepStatus};
use crate::models::workflow::WorkflowStatus;
use crate::store::WorkflowStore;
use crate::workflow::criteria;
use crate::workflow::invoker::StepInvoker;
use crate::workflow::template;

const TERMINAL_WRITE_ATTEMPTS: u32 = 3;
const TERMINAL_WRITE_BACKOFF: Duration = Duration::from_millis(100);

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub workflow_id: String,
    pub run_id: u64,
    pub status: WorkflowStatus,
    pub completed_steps: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A run that has been accepted and is executing in the background.
pub struct RunHandle {
    pub workflow_id: String,
    pub run_id: u64,
    task: JoinHandle<RunOutcome>,
}

impl RunHandle {
    /// Wait for the run to reach its terminal state.
    pub async fn wait(self) -> Result<RunOutcome, EngineError> {
        self.task
            .await
            .map_err(|e| EngineError::Internal(format!("Run supervisor failed: {}", e)))
    }

    /// Let the run continue without anyone waiting on it.
    pub fn detach(self) -> (String, u64) {
        (self.workflow_id, self.run_id)
    }
}

struct ActiveRun {
    run_id: u64,
    cancel: Arc<AtomicBool>,
}

/// Executes workflow runs. Cheap to clone; clones share the set of active runs.
#[derive(Clone)]
pub struct RunOrchestrator {
    store: WorkflowStore,
    channel: NotificationChannel,
    invoker: StepInvoker,
    active: Arc<Mutex<HashMap<String, ActiveRun>>>,
}

impl RunOrchestrator {
    pub fn new(store: WorkflowStore, channel: NotificationChannel, invoker: StepInvoker) -> Self {
        Self {
            store,
            channel,
            invoker,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn channel(&self) -> &NotificationChannel {
        &self.channel
    }

    /// Start a run of `workflow_id` and return without waiting for it.
    ///
    /// Fails with `Conflict` if a run is already in flight (no step state is
    /// touched in that case) and `NotFound` for an unknown workflow.
    pub async fn run_workflow(&self, workflow_id: &str) -> Result<RunHandle, EngineError> {
        let run_id = self.store.begin_run(workflow_id).await?;
        let cancel = Arc::new(AtomicBool::new(false));
        self.active_runs().insert(
            workflow_id.to_string(),
            ActiveRun {
                run_id,
                cancel: cancel.clone(),
            },
        );

        tracing::info!("[Orchestrator] Starting run {} of workflow {}", run_id, workflow_id);
        self.publish(RunEvent::workflow(workflow_id, run_id, EventStatus::Running));

        let worker = tokio::spawn(self.clone().execute(workflow_id.to_string(), run_id, cancel));

        let supervisor = {
            let this = self.clone();
            let workflow_id = workflow_id.to_string();
            tokio::spawn(async move {
                match worker.await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::error!(
                            "[Orchestrator] Run {} of workflow {} aborted: {}",
                            run_id,
                            workflow_id,
                            e
                        );
                        let error = format!("Run aborted unexpectedly: {}", e);
                        let abandoned = this.fail_abandoned_steps(&workflow_id, run_id, &error).await;
                        this.finish(
                            &workflow_id,
                            run_id,
                            WorkflowStatus::Failed,
                            0,
                            abandoned,
                            Some(error),
                        )
                        .await
                    }
                }
            })
        };

        Ok(RunHandle {
            workflow_id: workflow_id.to_string(),
            run_id,
            task: supervisor,
        })
    }

    /// Ask an in-flight run to stop before its next step.
    ///
    /// The step currently being invoked is allowed to finish. Returns the
    /// run id that will be cancelled.
    pub fn cancel(&self, workflow_id: &str) -> Result<u64, EngineError> {
        let active = self.active_runs();
        let run = active.get(workflow_id).ok_or_else(|| {
            EngineError::Conflict(format!("Workflow {} is not running", workflow_id))
        })?;
        run.cancel.store(true, Ordering::SeqCst);
        tracing::info!(
            "[Orchestrator] Cancellation requested for run {} of workflow {}",
            run.run_id,
            workflow_id
        );
        Ok(run.run_id)
    }

    pub fn is_running(&self, workflow_id: &str) -> bool {
        self.active_runs().contains_key(workflow_id)
    }

    /// Mark runs abandoned by a previous process as failed.
    ///
    /// Must be called before the first `run_workflow` of this process.
    pub async fn recover_interrupted_runs(&self) -> Result<Vec<String>, EngineError> {
        let mut recovered = Vec::new();
        for workflow in self.store.list().await? {
            if !workflow.is_running() || self.is_running(&workflow.id) {
                continue;
            }
            for step in workflow.steps.iter().filter(|s| s.status == StepStatus::Running) {
                self.store
                    .set_step_result(
                        &step.id,
                        StepStatus::Failed,
                        None,
                        Some("Run interrupted: the engine restarted mid-step".to_string()),
                    )
                    .await?;
            }
            self.store
                .set_workflow_status(&workflow.id, WorkflowStatus::Failed)
                .await?;
            tracing::warn!(
                "[Orchestrator] Marked interrupted run {} of workflow {} as failed",
                workflow.run_id,
                workflow.id
            );
            recovered.push(workflow.id);
        }
        Ok(recovered)
    }

    fn active_runs(&self) -> std::sync::MutexGuard<'_, HashMap<String, ActiveRun>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn execute(self, workflow_id: String, run_id: u64, cancel: Arc<AtomicBool>) -> RunOutcome {
        let workflow = match self.store.get(&workflow_id).await {
            Ok(Some(wf)) => wf,
            Ok(None) => {
                return self
                    .finish(
                        &workflow_id,
                        run_id,
                        WorkflowStatus::Failed,
                        0,
                        None,
                        Some("Workflow disappeared before the run started".to_string()),
                    )
                    .await
            }
            Err(e) => {
                return self
                    .finish(
                        &workflow_id,
                        run_id,
                        WorkflowStatus::Failed,
                        0,
                        None,
                        Some(format!("Failed to load workflow: {}", e)),
                    )
                    .await
            }
        };

        let mut steps = workflow.steps;
        steps.sort_by_key(|s| s.order);

        let mut previous_output = String::new();
        let mut completed = 0;

        for step in &steps {
            if cancel.load(Ordering::SeqCst) {
                tracing::info!(
                    "[Orchestrator] Run {} of workflow {} cancelled before step {}",
                    run_id,
                    workflow_id,
                    step.order
                );
                return self
                    .finish(&workflow_id, run_id, WorkflowStatus::Cancelled, completed, None, None)
                    .await;
            }

            match self.run_step(&workflow_id, run_id, step, &previous_output).await {
                Ok(output) => {
                    previous_output = output;
                    completed += 1;
                }
                Err(error) => {
                    return self
                        .finish(
                            &workflow_id,
                            run_id,
                            WorkflowStatus::Failed,
                            completed,
                            Some(step.id.clone()),
                            Some(error),
                        )
                        .await;
                }
            }
        }

        self.finish(&workflow_id, run_id, WorkflowStatus::Completed, completed, None, None)
            .await
    }

    /// Execute one step. Returns the accepted output, or the error log that
    /// was recorded for the failed step.
    async fn run_step(
        &self,
        workflow_id: &str,
        run_id: u64,
        step: &Step,
        previous_output: &str,
    ) -> Result<String, String> {
        tracing::info!(
            "[Orchestrator] Workflow {} run {}: step {} ({})",
            workflow_id,
            run_id,
            step.order,
            step.model
        );

        self.log_store_failure(
            "mark step running",
            self.store
                .set_step_result(&step.id, StepStatus::Running, None, None)
                .await,
        );
        self.publish(RunEvent::step(workflow_id, run_id, &step.id, step.order, EventStatus::Running));

        let prompt = match template::resolve(&step.prompt_template, previous_output) {
            Ok(prompt) => prompt,
            Err(e) => {
                let error = format!("Invalid prompt template: {}", e);
                self.fail_step(workflow_id, run_id, step, &error).await;
                return Err(error);
            }
        };
        self.log_store_failure(
            "record step input",
            self.store.set_step_input(&step.id, &prompt).await,
        );

        let raw = match self.invoker.invoke(&step.model, &prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                let error = e.to_string();
                self.fail_step(workflow_id, run_id, step, &error).await;
                return Err(error);
            }
        };

        if let CompletionCriteria::Unrecognized(raw_criterion) = &step.completion_criteria {
            tracing::warn!(
                "[Orchestrator] Step {} has unrecognized criterion '{}'; accepting output",
                step.id,
                raw_criterion
            );
        }

        if !criteria::evaluate(&step.completion_criteria, &raw) {
            let error = criteria::rejection_message(&step.completion_criteria);
            tracing::debug!("[Orchestrator] Rejected output of step {}: {}", step.id, raw);
            self.fail_step(workflow_id, run_id, step, &error).await;
            return Err(error);
        }

        self.log_store_failure(
            "record step output",
            self.store
                .set_step_result(&step.id, StepStatus::Completed, Some(raw.clone()), None)
                .await,
        );
        self.publish(
            RunEvent::step(workflow_id, run_id, &step.id, step.order, EventStatus::Completed)
                .with_output(raw.clone()),
        );
        Ok(raw)
    }

    async fn fail_step(&self, workflow_id: &str, run_id: u64, step: &Step, error: &str) {
        tracing::warn!(
            "[Orchestrator] Workflow {} step {} failed: {}",
            workflow_id,
            step.order,
            error
        );
        self.log_store_failure(
            "record step failure",
            self.store
                .set_step_result(&step.id, StepStatus::Failed, None, Some(error.to_string()))
                .await,
        );
        self.publish(
            RunEvent::step(workflow_id, run_id, &step.id, step.order, EventStatus::Failed)
                .with_error(error),
        );
    }

    /// Fail whatever steps of `run_id` a dead run task left marked running.
    /// Returns the id of the first such step.
    async fn fail_abandoned_steps(&self, workflow_id: &str, run_id: u64, error: &str) -> Option<String> {
        let workflow = match self.store.get(workflow_id).await {
            Ok(Some(workflow)) if workflow.run_id == run_id => workflow,
            Ok(_) => return None,
            Err(e) => {
                tracing::error!("[Orchestrator] Failed to load workflow {}: {}", workflow_id, e);
                return None;
            }
        };
        let mut first = None;
        for step in workflow.steps.iter().filter(|s| s.status == StepStatus::Running) {
            self.fail_step(workflow_id, run_id, step, error).await;
            first.get_or_insert_with(|| step.id.clone());
        }
        first
    }

    /// Persist the terminal status, announce it, and release the run token.
    async fn finish(
        &self,
        workflow_id: &str,
        run_id: u64,
        status: WorkflowStatus,
        completed_steps: usize,
        failed_step_id: Option<String>,
        error: Option<String>,
    ) -> RunOutcome {
        let mut attempt = 1;
        loop {
            match self.store.set_workflow_status(workflow_id, status).await {
                Ok(()) => break,
                Err(e) if attempt < TERMINAL_WRITE_ATTEMPTS => {
                    tracing::warn!(
                        "[Orchestrator] Persisting {} for workflow {} failed (attempt {}): {}",
                        status.as_str(),
                        workflow_id,
                        attempt,
                        e
                    );
                    attempt += 1;
                    tokio::time::sleep(TERMINAL_WRITE_BACKOFF).await;
                }
                Err(e) => {
                    tracing::error!(
                        "[Orchestrator] Could not persist {} for workflow {}: {}",
                        status.as_str(),
                        workflow_id,
                        e
                    );
                    break;
                }
            }
        }

        let event_status = match status {
            WorkflowStatus::Completed => EventStatus::Completed,
            WorkflowStatus::Cancelled => EventStatus::Cancelled,
            _ => EventStatus::Failed,
        };
        // Workflow-scoped events carry only the status; errors travel on the step event.
        self.publish(RunEvent::workflow(workflow_id, run_id, event_status));

        {
            let mut active = self.active_runs();
            if active.get(workflow_id).map(|r| r.run_id) == Some(run_id) {
                active.remove(workflow_id);
            }
        }

        tracing::info!(
            "[Orchestrator] Run {} of workflow {} finished: {} ({} step(s) completed)",
            run_id,
            workflow_id,
            status.as_str(),
            completed_steps
        );

        RunOutcome {
            workflow_id: workflow_id.to_string(),
            run_id,
            status,
            completed_steps,
            failed_step_id,
            error,
        }
    }

    fn publish(&self, event: RunEvent) {
        self.channel.publish(event);
    }

    fn log_store_failure(&self, action: &str, result: Result<(), EngineError>) {
        if let Err(e) = result {
            tracing::error!("[Orchestrator] Failed to {}: {}", action, e);
        }
    }
}
