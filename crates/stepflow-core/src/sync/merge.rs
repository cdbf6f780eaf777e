//! Pure merge core of the status synchronizer.
//!
//! Two inputs feed one view per workflow: store snapshots (authoritative but
//! possibly stale) and run events (fresh but lossy and unordered). Both are
//! keyed by `(workflow_id, run_id)`:
//!
//! | input    | older run | same run                              | newer run            |
//! |----------|-----------|---------------------------------------|----------------------|
//! | snapshot | ignored   | per-step max by progress rank         | replaces the view    |
//! | event    | discarded | applied unless it would regress       | resets, then applied |
//!
//! Progress rank is `pending/idle < running < terminal`, and the first
//! terminal status seen for a step wins. A snapshot whose status is `idle`
//! reflects an edit and replaces the view outright (runs never produce
//! `idle`). Within one run the snapshot's step set is authoritative: view
//! steps it does not list are dropped, shared steps still merge by rank.

use std::collections::HashMap;

use serde::Serialize;

use crate::events::{EventScope, RunEvent};
use crate::models::step::{Step, StepStatus};
use crate::models::workflow::{Workflow, WorkflowStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepView {
    pub step_id: String,
    pub order: u32,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepView {
    fn from_step(step: &Step) -> Self {
        Self {
            step_id: step.id.clone(),
            order: step.order,
            status: step.status,
            output: step.output_content.clone(),
            error: step.error_log.clone(),
        }
    }

    fn pending(step_id: &str, order: u32) -> Self {
        Self {
            step_id: step_id.to_string(),
            order,
            status: StepStatus::Pending,
            output: None,
            error: None,
        }
    }

    /// Move to `status` if it ranks higher. Returns whether anything changed.
    fn advance_to(&mut self, status: StepStatus, output: Option<String>, error: Option<String>) -> bool {
        if status.rank() <= self.status.rank() {
            return false;
        }
        self.status = status;
        self.output = output;
        self.error = error;
        true
    }
}

/// The synchronized state of one workflow as an observer should display it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowView {
    pub workflow_id: String,
    pub name: String,
    pub run_id: u64,
    pub status: WorkflowStatus,
    pub steps: Vec<StepView>,
}

impl WorkflowView {
    pub fn from_snapshot(workflow: &Workflow) -> Self {
        let mut steps: Vec<StepView> = workflow.steps.iter().map(StepView::from_step).collect();
        steps.sort_by_key(|s| s.order);
        Self {
            workflow_id: workflow.id.clone(),
            name: workflow.name.clone(),
            run_id: workflow.run_id,
            status: workflow.status,
            steps,
        }
    }

    /// A placeholder for a workflow known only from an event.
    fn skeleton(workflow_id: &str, run_id: u64) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            name: String::new(),
            run_id,
            status: WorkflowStatus::Running,
            steps: Vec::new(),
        }
    }

    pub fn step(&self, step_id: &str) -> Option<&StepView> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn reset_for_run(&mut self, run_id: u64) {
        self.run_id = run_id;
        self.status = WorkflowStatus::Running;
        for step in self.steps.iter_mut() {
            step.status = StepStatus::Pending;
            step.output = None;
            step.error = None;
        }
    }

    fn step_mut_or_insert(&mut self, step_id: &str, order: u32) -> &mut StepView {
        let index = match self.steps.iter().position(|s| s.step_id == step_id) {
            Some(i) => i,
            None => {
                let at = self.steps.partition_point(|s| s.order <= order);
                self.steps.insert(at, StepView::pending(step_id, order));
                at
            }
        };
        &mut self.steps[index]
    }
}

/// Per-workflow merge state for any number of workflows.
#[derive(Debug, Default)]
pub struct SyncState {
    views: HashMap<String, WorkflowView>,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view(&self, workflow_id: &str) -> Option<&WorkflowView> {
        self.views.get(workflow_id)
    }

    pub fn contains(&self, workflow_id: &str) -> bool {
        self.views.contains_key(workflow_id)
    }

    /// Drop a workflow's view (e.g. it was deleted). Returns whether one existed.
    pub fn forget(&mut self, workflow_id: &str) -> bool {
        self.views.remove(workflow_id).is_some()
    }

    /// Merge a store snapshot. Returns whether the view changed.
    pub fn apply_snapshot(&mut self, snapshot: &Workflow) -> bool {
        let Some(view) = self.views.get_mut(&snapshot.id) else {
            self.views
                .insert(snapshot.id.clone(), WorkflowView::from_snapshot(snapshot));
            return true;
        };

        if snapshot.run_id < view.run_id {
            tracing::debug!(
                "[Sync] Ignoring snapshot of run {} for workflow {} (view is at run {})",
                snapshot.run_id,
                snapshot.id,
                view.run_id
            );
            return false;
        }

        if snapshot.run_id > view.run_id || snapshot.status == WorkflowStatus::Idle {
            let fresh = WorkflowView::from_snapshot(snapshot);
            let changed = *view != fresh;
            *view = fresh;
            return changed;
        }

        let mut changed = false;
        if view.name != snapshot.name {
            view.name = snapshot.name.clone();
            changed = true;
        }
        if snapshot.status.rank() > view.status.rank() {
            view.status = snapshot.status;
            changed = true;
        }

        let mut steps: Vec<StepView> = Vec::with_capacity(snapshot.steps.len());
        for step in &snapshot.steps {
            let merged = match view.step(&step.id) {
                Some(current) => {
                    let mut merged = current.clone();
                    merged.order = step.order;
                    merged.advance_to(
                        step.status,
                        step.output_content.clone(),
                        step.error_log.clone(),
                    );
                    merged
                }
                None => StepView::from_step(step),
            };
            steps.push(merged);
        }
        steps.sort_by_key(|s| s.order);
        if steps != view.steps {
            view.steps = steps;
            changed = true;
        }
        changed
    }

    /// Merge a live event. Returns whether the view changed.
    pub fn apply_event(&mut self, event: &RunEvent) -> bool {
        let view = self
            .views
            .entry(event.workflow_id.clone())
            .or_insert_with(|| WorkflowView::skeleton(&event.workflow_id, event.run_id));

        if event.run_id < view.run_id {
            tracing::debug!(
                "[Sync] Discarding stale event of run {} for workflow {} (view is at run {})",
                event.run_id,
                event.workflow_id,
                view.run_id
            );
            return false;
        }

        let mut changed = false;
        if event.run_id > view.run_id {
            view.reset_for_run(event.run_id);
            changed = true;
        } else if view.status == WorkflowStatus::Idle {
            // The definition was edited after this run; its events are history.
            return false;
        }

        match event.scope {
            EventScope::Workflow => {
                let status = event.status.as_workflow_status();
                if status.rank() > view.status.rank() {
                    view.status = status;
                    changed = true;
                }
            }
            EventScope::Step => {
                let Some(step_id) = event.step_id.as_deref() else {
                    return changed;
                };
                let order = event
                    .order
                    .or_else(|| view.step(step_id).map(|s| s.order))
                    .unwrap_or(u32::MAX);
                let step = view.step_mut_or_insert(step_id, order);
                changed |= step.advance_to(
                    event.status.as_step_status(),
                    event.output.clone(),
                    event.error.clone(),
                );
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventStatus;
    use crate::models::criteria::CompletionCriteria;
    use chrono::Utc;

    fn step(id: &str, order: u32, status: StepStatus) -> Step {
        Step {
            id: id.to_string(),
            workflow_id: "wf".to_string(),
            order,
            model: "m".to_string(),
            prompt_template: "p".to_string(),
            completion_criteria: CompletionCriteria::AlwaysPass,
            status,
            input_context: None,
            output_content: None,
            error_log: None,
        }
    }

    fn snapshot(run_id: u64, status: WorkflowStatus, steps: Vec<Step>) -> Workflow {
        Workflow {
            id: "wf".to_string(),
            name: "Flow".to_string(),
            status,
            run_id,
            steps,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn step_event(run_id: u64, id: &str, order: u32, status: EventStatus) -> RunEvent {
        let event = RunEvent::step("wf", run_id, id, order, status);
        match status {
            EventStatus::Completed => event.with_output(format!("{} output", id)),
            EventStatus::Failed => event.with_error(format!("{} error", id)),
            _ => event,
        }
    }

    fn wf_event(run_id: u64, status: EventStatus) -> RunEvent {
        RunEvent::workflow("wf", run_id, status)
    }

    fn permutations(items: &[RunEvent]) -> Vec<Vec<RunEvent>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut out = Vec::new();
        for i in 0..items.len() {
            let mut rest = items.to_vec();
            let head = rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, head.clone());
                out.push(tail);
            }
        }
        out
    }

    fn pending_run_snapshot(run_id: u64) -> Workflow {
        snapshot(
            run_id,
            WorkflowStatus::Running,
            vec![
                step("s1", 1, StepStatus::Pending),
                step("s2", 2, StepStatus::Pending),
            ],
        )
    }

    #[test]
    fn test_snapshot_only_view() {
        let mut state = SyncState::new();
        assert!(state.apply_snapshot(&pending_run_snapshot(1)));
        let view = state.view("wf").unwrap();
        assert_eq!(view.status, WorkflowStatus::Running);
        assert_eq!(view.steps.len(), 2);
        assert!(!state.apply_snapshot(&pending_run_snapshot(1)));
    }

    #[test]
    fn test_events_in_every_order_never_regress() {
        let events = vec![
            wf_event(1, EventStatus::Running),
            step_event(1, "s1", 1, EventStatus::Running),
            step_event(1, "s1", 1, EventStatus::Completed),
            step_event(1, "s2", 2, EventStatus::Running),
            step_event(1, "s2", 2, EventStatus::Completed),
        ];

        for order in permutations(&events) {
            let mut state = SyncState::new();
            state.apply_snapshot(&pending_run_snapshot(1));
            for event in &order {
                state.apply_event(event);
            }
            let view = state.view("wf").unwrap();
            for id in ["s1", "s2"] {
                let step = view.step(id).unwrap();
                assert_eq!(step.status, StepStatus::Completed, "order: {:?}", order);
                assert_eq!(step.output.as_deref(), Some(format!("{} output", id).as_str()));
            }
            assert_eq!(view.status, WorkflowStatus::Running);
        }
    }

    #[test]
    fn test_events_before_any_snapshot_then_snapshot() {
        let events = vec![
            step_event(1, "s1", 1, EventStatus::Running),
            step_event(1, "s1", 1, EventStatus::Failed),
            wf_event(1, EventStatus::Failed),
        ];
        for order in permutations(&events) {
            let mut state = SyncState::new();
            for event in &order {
                state.apply_event(event);
            }
            // A stale snapshot taken while s1 was still running.
            state.apply_snapshot(&snapshot(
                1,
                WorkflowStatus::Running,
                vec![
                    step("s1", 1, StepStatus::Running),
                    step("s2", 2, StepStatus::Pending),
                ],
            ));
            let view = state.view("wf").unwrap();
            assert_eq!(view.status, WorkflowStatus::Failed);
            assert_eq!(view.step("s1").unwrap().status, StepStatus::Failed);
            assert_eq!(view.step("s1").unwrap().error.as_deref(), Some("s1 error"));
            assert_eq!(view.step("s2").unwrap().status, StepStatus::Pending);
            assert_eq!(view.name, "Flow");
            let orders: Vec<u32> = view.steps.iter().map(|s| s.order).collect();
            assert_eq!(orders, vec![1, 2]);
        }
    }

    #[test]
    fn test_stale_snapshot_does_not_override_live_event() {
        let mut state = SyncState::new();
        state.apply_snapshot(&pending_run_snapshot(1));
        state.apply_event(&step_event(1, "s1", 1, EventStatus::Completed));
        assert!(!state.apply_snapshot(&pending_run_snapshot(1)));
        assert_eq!(
            state.view("wf").unwrap().step("s1").unwrap().status,
            StepStatus::Completed
        );
    }

    #[test]
    fn test_first_terminal_status_wins() {
        let mut state = SyncState::new();
        state.apply_snapshot(&pending_run_snapshot(1));
        state.apply_event(&step_event(1, "s1", 1, EventStatus::Completed));
        assert!(!state.apply_event(&step_event(1, "s1", 1, EventStatus::Failed)));
        let step = state.view("wf").unwrap().step("s1").cloned().unwrap();
        assert_eq!(step.status, StepStatus::Completed);
        assert!(step.error.is_none());
    }

    #[test]
    fn test_events_from_previous_run_are_discarded() {
        let mut state = SyncState::new();
        state.apply_snapshot(&pending_run_snapshot(2));
        assert!(!state.apply_event(&step_event(1, "s1", 1, EventStatus::Completed)));
        assert!(!state.apply_event(&wf_event(1, EventStatus::Failed)));
        let view = state.view("wf").unwrap();
        assert_eq!(view.status, WorkflowStatus::Running);
        assert_eq!(view.step("s1").unwrap().status, StepStatus::Pending);
    }

    #[test]
    fn test_event_from_newer_run_resets_the_view() {
        let mut state = SyncState::new();
        state.apply_snapshot(&snapshot(
            1,
            WorkflowStatus::Completed,
            vec![
                step("s1", 1, StepStatus::Completed),
                step("s2", 2, StepStatus::Completed),
            ],
        ));
        assert!(state.apply_event(&step_event(2, "s1", 1, EventStatus::Running)));
        let view = state.view("wf").unwrap();
        assert_eq!(view.run_id, 2);
        assert_eq!(view.status, WorkflowStatus::Running);
        assert_eq!(view.step("s1").unwrap().status, StepStatus::Running);
        assert_eq!(view.step("s2").unwrap().status, StepStatus::Pending);
        assert!(view.step("s2").unwrap().output.is_none());
    }

    #[test]
    fn test_older_snapshot_is_ignored_newer_replaces() {
        let mut state = SyncState::new();
        state.apply_event(&wf_event(3, EventStatus::Running));
        assert!(!state.apply_snapshot(&snapshot(2, WorkflowStatus::Completed, vec![])));
        assert_eq!(state.view("wf").unwrap().run_id, 3);

        assert!(state.apply_snapshot(&snapshot(
            4,
            WorkflowStatus::Running,
            vec![step("s1", 1, StepStatus::Running)]
        )));
        let view = state.view("wf").unwrap();
        assert_eq!(view.run_id, 4);
        assert_eq!(view.steps.len(), 1);
    }

    #[test]
    fn test_edit_replaces_view() {
        let mut state = SyncState::new();
        state.apply_snapshot(&snapshot(
            1,
            WorkflowStatus::Completed,
            vec![step("s1", 1, StepStatus::Completed)],
        ));
        let edited = snapshot(
            1,
            WorkflowStatus::Idle,
            vec![step("n1", 1, StepStatus::Pending), step("n2", 2, StepStatus::Pending)],
        );
        assert!(state.apply_snapshot(&edited));
        let view = state.view("wf").unwrap();
        assert_eq!(view.status, WorkflowStatus::Idle);
        assert!(view.step("s1").is_none());
        assert_eq!(view.steps.len(), 2);

        // Late events from the pre-edit run are history.
        assert!(!state.apply_event(&step_event(1, "s1", 1, EventStatus::Completed)));
    }

    #[test]
    fn test_late_snapshot_after_edit_and_rerun_keeps_live_progress() {
        let mut state = SyncState::new();
        state.apply_snapshot(&snapshot(
            1,
            WorkflowStatus::Completed,
            vec![
                step("s1", 1, StepStatus::Completed),
                step("s2", 2, StepStatus::Completed),
            ],
        ));

        // The definition was edited without an event; the view still holds s1/s2.
        state.apply_event(&wf_event(2, EventStatus::Running));
        state.apply_event(&step_event(2, "n1", 1, EventStatus::Running));
        state.apply_event(&step_event(2, "n1", 1, EventStatus::Completed));

        state.apply_snapshot(&snapshot(
            2,
            WorkflowStatus::Running,
            vec![
                step("n1", 1, StepStatus::Running),
                step("n2", 2, StepStatus::Pending),
            ],
        ));

        let view = state.view("wf").unwrap();
        assert_eq!(view.run_id, 2);
        assert_eq!(view.status, WorkflowStatus::Running);
        let n1 = view.step("n1").unwrap();
        assert_eq!(n1.status, StepStatus::Completed);
        assert_eq!(n1.output.as_deref(), Some("n1 output"));
        assert_eq!(view.step("n2").unwrap().status, StepStatus::Pending);
        assert!(view.step("s1").is_none());
        assert!(view.step("s2").is_none());
        let ids: Vec<&str> = view.steps.iter().map(|s| s.step_id.as_str()).collect();
        assert_eq!(ids, vec!["n1", "n2"]);
    }

    #[test]
    fn test_forget() {
        let mut state = SyncState::new();
        state.apply_snapshot(&pending_run_snapshot(1));
        assert!(state.forget("wf"));
        assert!(!state.contains("wf"));
        assert!(!state.forget("wf"));
    }
}
