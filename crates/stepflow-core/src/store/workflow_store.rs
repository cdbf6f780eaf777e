use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row};
use std::collections::HashMap;

use crate::db::Database;
use crate::error::EngineError;
use crate::models::criteria::CompletionCriteria;
use crate::models::step::{normalize_steps, Step, StepStatus};
use crate::models::workflow::{Workflow, WorkflowInput, WorkflowStatus};

/// Persistent store for workflow definitions and their latest run results.
///
/// The only source of truth for workflow state. Mutations that must not race
/// with a run (`begin_run`, `update`, `delete`) are guarded inside a single
/// transaction on `status != 'running'`.
#[derive(Clone)]
pub struct WorkflowStore {
    db: Database,
}

const WORKFLOW_COLUMNS: &str = "id, name, status, run_id, created_at, updated_at";
const STEP_COLUMNS: &str = "id, workflow_id, step_order, model, prompt_template, \
     completion_criteria, status, input_context, output_content, error_log";

impl WorkflowStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(&self, input: WorkflowInput) -> Result<Workflow, EngineError> {
        input.validate()?;
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().timestamp_millis();
        let wf_id = id.clone();
        self.db
            .with_conn_mut_async(move |conn| {
                let tx = conn.transaction().map_err(db_err)?;
                tx.execute(
                    "INSERT INTO workflows (id, name, status, run_id, created_at, updated_at)
                     VALUES (?1, ?2, 'idle', 0, ?3, ?3)",
                    rusqlite::params![wf_id, input.name.trim(), now],
                )
                .map_err(db_err)?;
                insert_steps(&tx, &wf_id, input)?;
                tx.commit().map_err(db_err)
            })
            .await?;

        tracing::info!("[WorkflowStore] Created workflow {}", id);
        self.require(&id).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<Workflow>, EngineError> {
        let id = id.to_string();
        self.db
            .with_conn_async(move |conn| load_workflow(conn, &id))
            .await
    }

    pub async fn list(&self) -> Result<Vec<Workflow>, EngineError> {
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM workflows ORDER BY created_at DESC",
                    WORKFLOW_COLUMNS
                ))?;
                let mut workflows = stmt
                    .query_map([], |row| Ok(row_to_workflow(row)))?
                    .collect::<Result<Vec<_>, _>>()?;

                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM steps ORDER BY workflow_id, step_order",
                    STEP_COLUMNS
                ))?;
                let mut steps_by_workflow: HashMap<String, Vec<Step>> = HashMap::new();
                for step in stmt.query_map([], |row| Ok(row_to_step(row)))? {
                    let step = step?;
                    steps_by_workflow
                        .entry(step.workflow_id.clone())
                        .or_default()
                        .push(step);
                }

                for wf in workflows.iter_mut() {
                    wf.steps = steps_by_workflow.remove(&wf.id).unwrap_or_default();
                }
                Ok(workflows)
            })
            .await
    }

    /// Replace the name and step sequence. Rejected while the workflow runs.
    pub async fn update(&self, id: &str, input: WorkflowInput) -> Result<Workflow, EngineError> {
        input.validate()?;
        let wf_id = id.to_string();
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_mut_async(move |conn| {
                let tx = conn.transaction().map_err(db_err)?;
                ensure_not_running(&tx, &wf_id, "edit")?;
                tx.execute(
                    "UPDATE workflows SET name = ?1, status = 'idle', updated_at = ?2
                     WHERE id = ?3 AND status != 'running'",
                    rusqlite::params![input.name.trim(), now, wf_id],
                )
                .map_err(db_err)?;
                tx.execute(
                    "DELETE FROM steps WHERE workflow_id = ?1",
                    rusqlite::params![wf_id],
                )
                .map_err(db_err)?;
                insert_steps(&tx, &wf_id, input)?;
                tx.commit().map_err(db_err)
            })
            .await?;

        self.require(id).await
    }

    /// Delete a workflow and its steps. Rejected while the workflow runs.
    pub async fn delete(&self, id: &str) -> Result<(), EngineError> {
        let wf_id = id.to_string();
        self.db
            .with_conn_mut_async(move |conn| {
                let tx = conn.transaction().map_err(db_err)?;
                ensure_not_running(&tx, &wf_id, "delete")?;
                tx.execute(
                    "DELETE FROM workflows WHERE id = ?1 AND status != 'running'",
                    rusqlite::params![wf_id],
                )
                .map_err(db_err)?;
                tx.commit().map_err(db_err)
            })
            .await
    }

    /// Atomically acquire the run token for a workflow.
    ///
    /// Compare-and-swaps `status` to `running`, bumps `run_id`, and resets every
    /// step to pending with cleared input/output/error. Returns the new run id.
    pub async fn begin_run(&self, id: &str) -> Result<u64, EngineError> {
        let wf_id = id.to_string();
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_mut_async(move |conn| {
                let tx = conn.transaction().map_err(db_err)?;
                ensure_not_running(&tx, &wf_id, "run")?;
                let changed = tx
                    .execute(
                        "UPDATE workflows SET status = 'running', run_id = run_id + 1, updated_at = ?1
                         WHERE id = ?2 AND status != 'running'",
                        rusqlite::params![now, wf_id],
                    )
                    .map_err(db_err)?;
                if changed != 1 {
                    return Err(EngineError::Conflict(format!(
                        "Workflow {} is already running",
                        wf_id
                    )));
                }
                tx.execute(
                    "UPDATE steps SET status = 'pending', input_context = NULL,
                       output_content = NULL, error_log = NULL
                     WHERE workflow_id = ?1",
                    rusqlite::params![wf_id],
                )
                .map_err(db_err)?;
                let run_id: i64 = tx
                    .query_row(
                        "SELECT run_id FROM workflows WHERE id = ?1",
                        rusqlite::params![wf_id],
                        |row| row.get(0),
                    )
                    .map_err(db_err)?;
                tx.commit().map_err(db_err)?;
                Ok(run_id.max(0) as u64)
            })
            .await
    }

    pub async fn set_workflow_status(
        &self,
        id: &str,
        status: WorkflowStatus,
    ) -> Result<(), EngineError> {
        let id = id.to_string();
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "UPDATE workflows SET status = ?1, updated_at = ?2 WHERE id = ?3",
                    rusqlite::params![status.as_str(), now, id],
                )?;
                Ok(())
            })
            .await
    }

    /// Record a step transition. `output` and `error` overwrite the stored values.
    pub async fn set_step_result(
        &self,
        step_id: &str,
        status: StepStatus,
        output: Option<String>,
        error: Option<String>,
    ) -> Result<(), EngineError> {
        let step_id = step_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "UPDATE steps SET status = ?1, output_content = ?2, error_log = ?3 WHERE id = ?4",
                    rusqlite::params![status.as_str(), output, error, step_id],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn set_step_input(&self, step_id: &str, input_context: &str) -> Result<(), EngineError> {
        let step_id = step_id.to_string();
        let input_context = input_context.to_string();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "UPDATE steps SET input_context = ?1 WHERE id = ?2",
                    rusqlite::params![input_context, step_id],
                )?;
                Ok(())
            })
            .await
    }

    async fn require(&self, id: &str) -> Result<Workflow, EngineError> {
        self.get(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Workflow {} not found", id)))
    }
}

fn db_err(e: rusqlite::Error) -> EngineError {
    EngineError::Database(e.to_string())
}

fn ensure_not_running(conn: &Connection, id: &str, action: &str) -> Result<(), EngineError> {
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM workflows WHERE id = ?1",
            rusqlite::params![id],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err)?;
    match status.as_deref() {
        None => Err(EngineError::NotFound(format!("Workflow {} not found", id))),
        Some("running") => Err(EngineError::Conflict(format!(
            "Cannot {} workflow {} while it is running",
            action, id
        ))),
        Some(_) => Ok(()),
    }
}

fn insert_steps(conn: &Connection, workflow_id: &str, input: WorkflowInput) -> Result<(), EngineError> {
    for draft in normalize_steps(input.steps) {
        conn.execute(
            "INSERT INTO steps (id, workflow_id, step_order, model, prompt_template, completion_criteria, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending')",
            rusqlite::params![
                uuid::Uuid::new_v4().to_string(),
                workflow_id,
                draft.order.unwrap_or(0),
                draft.model.trim(),
                draft.prompt_template,
                draft.completion_criteria.as_string(),
            ],
        )
        .map_err(db_err)?;
    }
    Ok(())
}

fn load_workflow(conn: &Connection, id: &str) -> Result<Option<Workflow>, rusqlite::Error> {
    let workflow = conn
        .query_row(
            &format!("SELECT {} FROM workflows WHERE id = ?1", WORKFLOW_COLUMNS),
            rusqlite::params![id],
            |row| Ok(row_to_workflow(row)),
        )
        .optional()?;

    let Some(mut workflow) = workflow else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM steps WHERE workflow_id = ?1 ORDER BY step_order",
        STEP_COLUMNS
    ))?;
    workflow.steps = stmt
        .query_map(rusqlite::params![id], |row| Ok(row_to_step(row)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Some(workflow))
}

/// Column order: id(0), name(1), status(2), run_id(3), created_at(4), updated_at(5)
fn row_to_workflow(row: &Row<'_>) -> Workflow {
    let created_ms: i64 = row.get(4).unwrap_or(0);
    let updated_ms: i64 = row.get(5).unwrap_or(0);
    let run_id: i64 = row.get(3).unwrap_or(0);

    Workflow {
        id: row.get(0).unwrap_or_default(),
        name: row.get(1).unwrap_or_default(),
        status: WorkflowStatus::from_str(&row.get::<_, String>(2).unwrap_or_default()),
        run_id: run_id.max(0) as u64,
        steps: Vec::new(),
        created_at: chrono::DateTime::from_timestamp_millis(created_ms)
            .unwrap_or_else(Utc::now),
        updated_at: chrono::DateTime::from_timestamp_millis(updated_ms)
            .unwrap_or_else(Utc::now),
    }
}

/// Column order: id(0), workflow_id(1), step_order(2), model(3), prompt_template(4),
///               completion_criteria(5), status(6), input_context(7), output_content(8),
///               error_log(9)
fn row_to_step(row: &Row<'_>) -> Step {
    let order: i64 = row.get(2).unwrap_or(0);
    Step {
        id: row.get(0).unwrap_or_default(),
        workflow_id: row.get(1).unwrap_or_default(),
        order: order.max(0) as u32,
        model: row.get(3).unwrap_or_default(),
        prompt_template: row.get(4).unwrap_or_default(),
        completion_criteria: CompletionCriteria::from_str(
            &row.get::<_, String>(5).unwrap_or_default(),
        ),
        status: StepStatus::from_str(&row.get::<_, String>(6).unwrap_or_default()),
        input_context: row.get(7).unwrap_or(None),
        output_content: row.get(8).unwrap_or(None),
        error_log: row.get(9).unwrap_or(None),
    }
}
