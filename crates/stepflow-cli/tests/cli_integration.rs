//! Integration tests for the stepflow-cli commands.
//!
//! These tests verify that the CLI commands work correctly by
//! exercising the same code paths as the binary, using in-memory
//! SQLite databases and a scripted model service for isolation.

use std::io::Write;
use std::sync::Arc;

use stepflow_cli::commands;
use stepflow_core::models::{StepStatus, WorkflowStatus};
use stepflow_core::testing::ScriptedModelService;
use stepflow_core::{AppState, AppStateInner, Database, EngineConfig};

/// Create an in-memory AppState for testing.
fn test_state(service: Arc<ScriptedModelService>) -> AppState {
    let db = Database::open(":memory:").expect("Failed to open in-memory database");
    Arc::new(AppStateInner::new(db, EngineConfig::default(), service))
}

fn yaml_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .expect("Failed to create temp file");
    file.write_all(content.as_bytes()).unwrap();
    file
}

const REVIEW_FLOW: &str = r#"
name: "Write and review"
steps:
  - model: "writer"
    prompt: "Write a haiku about Rust"
  - model: "reviewer"
    prompt: "Review this haiku:\n{previous}"
    criteria: "CONTAINS:APPROVED"
"#;

#[tokio::test]
async fn test_workflow_create_list_show() {
    let state = test_state(Arc::new(ScriptedModelService::new()));
    let file = yaml_file(REVIEW_FLOW);

    let created = commands::workflow::create(&state, file.path().to_str().unwrap())
        .await
        .unwrap();
    assert_eq!(created.name, "Write and review");
    assert_eq!(created.steps.len(), 2);
    assert_eq!(created.steps[1].order, 2);

    let listed = commands::workflow::list(&state).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, created.id);

    let shown = commands::workflow::show(&state, &created.id).await.unwrap();
    assert_eq!(shown.status, WorkflowStatus::Idle);

    let err = commands::workflow::show(&state, "missing").await.unwrap_err();
    assert!(err.contains("not found"));
}

#[tokio::test]
async fn test_workflow_run_follows_to_completion() {
    let service = Arc::new(ScriptedModelService::new());
    service.reply("writer", "Borrowed, never owned");
    service.reply("reviewer", "APPROVED");
    let state = test_state(service.clone());
    let file = yaml_file(REVIEW_FLOW);
    let created = commands::workflow::create(&state, file.path().to_str().unwrap())
        .await
        .unwrap();

    let outcome = commands::workflow::run(&state, &created.id, false).await.unwrap();
    assert_eq!(outcome.status, WorkflowStatus::Completed);
    assert_eq!(outcome.completed_steps, 2);
    assert_eq!(
        service.calls()[1].1,
        "Review this haiku:\nBorrowed, never owned"
    );

    let stored = state.workflow_store.get(&created.id).await.unwrap().unwrap();
    assert!(stored.steps.iter().all(|s| s.status == StepStatus::Completed));
}

#[tokio::test]
async fn test_workflow_run_reports_failure() {
    let service = Arc::new(ScriptedModelService::new());
    service.reply("reviewer", "needs work");
    let state = test_state(service);
    let file = yaml_file(REVIEW_FLOW);
    let created = commands::workflow::create(&state, file.path().to_str().unwrap())
        .await
        .unwrap();

    let err = commands::workflow::run(&state, &created.id, true).await.unwrap_err();
    assert!(err.contains("failed"));
    assert!(err.contains("not met"));

    let stored = state.workflow_store.get(&created.id).await.unwrap().unwrap();
    assert_eq!(stored.status, WorkflowStatus::Failed);
    assert_eq!(stored.steps[1].status, StepStatus::Failed);
}

#[tokio::test]
async fn test_workflow_update_and_delete() {
    let state = test_state(Arc::new(ScriptedModelService::new()));
    let file = yaml_file(REVIEW_FLOW);
    let created = commands::workflow::create(&state, file.path().to_str().unwrap())
        .await
        .unwrap();

    let replacement = yaml_file(
        r#"
name: "Just write"
steps:
  - model: "writer"
    prompt: "Write"
"#,
    );
    let updated =
        commands::workflow::update(&state, &created.id, replacement.path().to_str().unwrap())
            .await
            .unwrap();
    assert_eq!(updated.name, "Just write");
    assert_eq!(updated.steps.len(), 1);

    commands::workflow::delete(&state, &created.id).await.unwrap();
    assert!(state.workflow_store.get(&created.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_workflow_validate() {
    let good = yaml_file(REVIEW_FLOW);
    assert!(commands::workflow::validate(good.path().to_str().unwrap())
        .await
        .is_ok());

    let broken_template = yaml_file(
        r#"
name: "Broken"
steps:
  - model: "m"
    prompt: "Use {previous"
"#,
    );
    let err = commands::workflow::validate(broken_template.path().to_str().unwrap())
        .await
        .unwrap_err();
    assert!(err.contains("Step 1"));

    let no_model = yaml_file(
        r#"
name: "No model"
steps:
  - model: ""
    prompt: "hi"
"#,
    );
    assert!(commands::workflow::validate(no_model.path().to_str().unwrap())
        .await
        .is_err());
}

#[test]
fn test_load_dotenv_does_not_override() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join(".env"),
        "# comment\n\
         STEPFLOW_DOTENV_A=\"from env\"\n\
         STEPFLOW_DOTENV_B=from-env\n\
         STEPFLOW_DOTENV_C=overwritten\n",
    )
    .unwrap();
    std::fs::write(dir.path().join(".env.local"), "export STEPFLOW_DOTENV_B='local'\n").unwrap();
    std::env::set_var("STEPFLOW_DOTENV_C", "preset");

    commands::load_dotenv_from(dir.path());

    assert_eq!(std::env::var("STEPFLOW_DOTENV_A").unwrap(), "from env");
    assert_eq!(std::env::var("STEPFLOW_DOTENV_B").unwrap(), "local");
    assert_eq!(std::env::var("STEPFLOW_DOTENV_C").unwrap(), "preset");
}
