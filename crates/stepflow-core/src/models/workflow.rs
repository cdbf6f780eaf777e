use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::step::{Step, StepDraft};
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            _ => Self::Idle,
        }
    }

    /// Progress rank within a run: idle < running < terminal.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Running => 1,
            Self::Completed | Self::Failed | Self::Cancelled => 2,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 2
    }
}

/// A named, ordered pipeline of steps plus its overall execution status.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub status: WorkflowStatus,
    /// Number of the latest run (0 = never run).
    pub run_id: u64,
    pub steps: Vec<Step>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn is_running(&self) -> bool {
        self.status == WorkflowStatus::Running
    }

    pub fn step(&self, step_id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == step_id)
    }
}

/// Input for creating or replacing a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInput {
    pub name: String,
    #[serde(default)]
    pub steps: Vec<StepDraft>,
}

impl WorkflowInput {
    pub fn new(name: impl Into<String>, steps: Vec<StepDraft>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.name.trim().is_empty() {
            return Err(EngineError::BadRequest(
                "Workflow name must not be empty".to_string(),
            ));
        }
        for (i, step) in self.steps.iter().enumerate() {
            if step.model.trim().is_empty() {
                return Err(EngineError::BadRequest(format!(
                    "Step {} has no model",
                    i + 1
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_and_rank() {
        for status in [
            WorkflowStatus::Idle,
            WorkflowStatus::Running,
            WorkflowStatus::Completed,
            WorkflowStatus::Failed,
            WorkflowStatus::Cancelled,
        ] {
            assert_eq!(WorkflowStatus::from_str(status.as_str()), status);
        }
        assert!(WorkflowStatus::Running.rank() > WorkflowStatus::Idle.rank());
        assert!(WorkflowStatus::Cancelled.is_terminal());
        assert!(!WorkflowStatus::Running.is_terminal());
    }

    #[test]
    fn test_validate_rejects_blank_name_and_missing_model() {
        assert!(WorkflowInput::new("  ", vec![]).validate().is_err());
        let input = WorkflowInput::new("ok", vec![StepDraft::new("", "p")]);
        assert!(matches!(input.validate(), Err(EngineError::BadRequest(_))));
        assert!(WorkflowInput::new("ok", vec![StepDraft::new("m", "p")])
            .validate()
            .is_ok());
    }
}
