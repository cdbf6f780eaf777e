//! `stepflow workflow` - Manage stored workflows and run them.

use std::collections::HashMap;

use stepflow_core::models::{StepStatus, Workflow, WorkflowStatus};
use stepflow_core::sync::{StepView, WorkflowView};
use stepflow_core::workflow::template;
use stepflow_core::workflow::{RunOutcome, WorkflowDefinition};
use stepflow_core::AppState;

use super::{print_json, truncate};

const PREVIEW_CHARS: usize = 120;

/// List every stored workflow.
pub async fn list(state: &AppState) -> Result<Vec<Workflow>, String> {
    let workflows = state
        .workflow_store
        .list()
        .await
        .map_err(|e| e.to_string())?;

    if workflows.is_empty() {
        println!("No workflows yet. Create one with `stepflow workflow create <file.yaml>`.");
    }
    for wf in &workflows {
        println!(
            "{}  {:<9}  run {:<3}  {} step(s)  {}",
            wf.id,
            wf.status.as_str(),
            wf.run_id,
            wf.steps.len(),
            wf.name
        );
    }
    Ok(workflows)
}

/// Store a new workflow from a YAML definition.
pub async fn create(state: &AppState, workflow_file: &str) -> Result<Workflow, String> {
    let definition = WorkflowDefinition::from_file(workflow_file)?;
    let workflow = state
        .workflow_store
        .create(definition.into_input())
        .await
        .map_err(|e| e.to_string())?;
    print_json(&serde_json::json!({ "workflow": workflow }));
    Ok(workflow)
}

pub async fn show(state: &AppState, id: &str) -> Result<Workflow, String> {
    let workflow = state
        .workflow_store
        .get(id)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("Workflow {} not found", id))?;
    print_json(&serde_json::to_value(&workflow).map_err(|e| e.to_string())?);
    Ok(workflow)
}

/// Replace a workflow's name and steps from a YAML definition.
pub async fn update(state: &AppState, id: &str, workflow_file: &str) -> Result<Workflow, String> {
    let definition = WorkflowDefinition::from_file(workflow_file)?;
    let workflow = state
        .workflow_store
        .update(id, definition.into_input())
        .await
        .map_err(|e| e.to_string())?;
    print_json(&serde_json::json!({ "workflow": workflow }));
    Ok(workflow)
}

pub async fn delete(state: &AppState, id: &str) -> Result<(), String> {
    state
        .workflow_store
        .delete(id)
        .await
        .map_err(|e| e.to_string())?;
    print_json(&serde_json::json!({ "deleted": true, "id": id }));
    Ok(())
}

/// Validate a workflow YAML file without storing it.
pub async fn validate(workflow_file: &str) -> Result<(), String> {
    let definition = WorkflowDefinition::from_file(workflow_file)?;
    let input = definition.into_input();
    input.validate().map_err(|e| e.to_string())?;

    for (i, step) in input.steps.iter().enumerate() {
        template::resolve(&step.prompt_template, "")
            .map_err(|e| format!("Step {}: {}", i + 1, e))?;
    }

    println!("✅ Workflow '{}' is valid", input.name);
    println!("   Steps: {}", input.steps.len());
    for (i, step) in input.steps.iter().enumerate() {
        println!(
            "   {}. {} (criterion: {})",
            i + 1,
            step.model,
            step.completion_criteria
        );
    }
    Ok(())
}

/// Run a stored workflow and wait for it to finish.
///
/// Unless `quiet`, every step transition is printed as the synchronized view
/// changes. Ctrl+C requests cancellation; the step in flight still finishes.
/// Fails when the run does not complete.
pub async fn run(state: &AppState, id: &str, quiet: bool) -> Result<RunOutcome, String> {
    let sync = state.synchronizer().map_err(|e| e.to_string())?;
    let mut changes = sync.changes();
    let initial = sync
        .attach(id)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("Workflow {} not found", id))?;

    let models: HashMap<String, String> = state
        .workflow_store
        .get(id)
        .await
        .map_err(|e| e.to_string())?
        .map(|wf| {
            wf.steps
                .into_iter()
                .map(|s| (s.id, s.model))
                .collect()
        })
        .unwrap_or_default();

    let handle = state
        .orchestrator
        .run_workflow(id)
        .await
        .map_err(|e| e.to_string())?;
    let run_id = handle.run_id;

    if !quiet {
        println!(
            "▶ Running '{}' (run {}, {} step(s))",
            initial.name,
            run_id,
            initial.steps.len()
        );
    }

    let mut printed: HashMap<String, StepStatus> = HashMap::new();
    let mut cancel_requested = false;
    loop {
        if let Some(view) = sync.view(id) {
            if view.run_id == run_id {
                if !quiet {
                    report_transitions(&view, &models, &mut printed);
                }
                if view.is_terminal() {
                    break;
                }
            }
        }
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c(), if !cancel_requested => {
                cancel_requested = true;
                match state.orchestrator.cancel(id) {
                    Ok(_) => println!("⏹ Cancelling after the current step..."),
                    Err(e) => tracing::warn!("[Cli] Cancel failed: {}", e),
                }
            }
        }
    }

    let outcome = handle.wait().await.map_err(|e| e.to_string())?;
    print_json(&serde_json::to_value(&outcome).map_err(|e| e.to_string())?);

    match outcome.status {
        WorkflowStatus::Completed => {
            if !quiet {
                println!("🎉 Workflow completed successfully!");
            }
            Ok(outcome)
        }
        WorkflowStatus::Cancelled => Err(format!("Run {} was cancelled", run_id)),
        status => Err(format!(
            "Run {} ended {}: {}",
            run_id,
            status.as_str(),
            outcome.error.as_deref().unwrap_or("no error recorded")
        )),
    }
}

fn report_transitions(
    view: &WorkflowView,
    models: &HashMap<String, String>,
    printed: &mut HashMap<String, StepStatus>,
) {
    for step in &view.steps {
        if printed.get(&step.step_id) == Some(&step.status) || step.status == StepStatus::Pending {
            continue;
        }
        printed.insert(step.step_id.clone(), step.status);
        println!("{}", describe_step(step, models.get(&step.step_id)));
    }
}

fn describe_step(step: &StepView, model: Option<&String>) -> String {
    let model = model.map(String::as_str).unwrap_or("?");
    match step.status {
        StepStatus::Running => format!("  … step {} ({}) running", step.order, model),
        StepStatus::Completed => format!(
            "  ✅ step {} ({}) completed: {}",
            step.order,
            model,
            truncate(step.output.as_deref().unwrap_or(""), PREVIEW_CHARS)
        ),
        StepStatus::Failed => format!(
            "  ❌ step {} ({}) failed: {}",
            step.order,
            model,
            step.error.as_deref().unwrap_or("unknown error")
        ),
        StepStatus::Pending => format!("  · step {} ({}) pending", step.order, model),
    }
}
