//! YAML schema for workflow definitions.
//!
//! ```yaml
//! name: "Draft and review"
//! steps:
//!   - model: "${DRAFT_MODEL:-gpt-4o-mini}"
//!     prompt: "Write a function that parses ISO dates."
//!     criteria: CODE_BLOCK
//!   - model: "gpt-4o"
//!     prompt: "Review this code:\n{previous}"
//!     criteria: "CONTAINS:APPROVED"
//! ```
//!
//! `criteria` takes the persisted textual form (`always_pass`, `CODE_BLOCK`,
//! `CONTAINS:<literal>`) and defaults to always-pass. `order` is optional;
//! steps are renumbered `1..=n` when the definition is stored.

use serde::{Deserialize, Serialize};

use crate::config::resolve_env_vars;
use crate::models::step::StepDraft;
use crate::models::workflow::WorkflowInput;

/// Top-level workflow definition loaded from a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,

    /// Free-form note for humans; not stored.
    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub steps: Vec<StepDraft>,
}

impl WorkflowDefinition {
    /// Parse a workflow definition from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, String> {
        serde_yaml::from_str(yaml).map_err(|e| format!("Failed to parse workflow YAML: {}", e))
    }

    /// Load a workflow definition from a file path.
    pub fn from_file(path: &str) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read workflow file '{}': {}", path, e))?;
        Self::from_yaml(&content)
    }

    /// Convert into store input, expanding `${VAR}` references in model names.
    pub fn into_input(self) -> WorkflowInput {
        let steps = self
            .steps
            .into_iter()
            .map(|mut step| {
                step.model = resolve_env_vars(&step.model);
                step
            })
            .collect();
        WorkflowInput::new(self.name, steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::criteria::CompletionCriteria;

    #[test]
    fn test_parse_minimal_workflow() {
        let yaml = r#"
name: "Test Flow"
steps:
  - model: "m1"
    prompt: "Hello, world!"
"#;
        let wf = WorkflowDefinition::from_yaml(yaml).unwrap();
        assert_eq!(wf.name, "Test Flow");
        assert_eq!(wf.steps.len(), 1);
        assert_eq!(wf.steps[0].prompt_template, "Hello, world!");
        assert_eq!(wf.steps[0].completion_criteria, CompletionCriteria::AlwaysPass);
        assert_eq!(wf.steps[0].order, None);
    }

    #[test]
    fn test_parse_criteria_and_order() {
        let yaml = r#"
name: "Draft and review"
description: "two steps"
steps:
  - model: "reviewer"
    prompt: "Review: {previous}"
    criteria: "CONTAINS:APPROVED"
    order: 2
  - model: "writer"
    prompt: "Write code"
    criteria: CODE_BLOCK
    order: 1
"#;
        let wf = WorkflowDefinition::from_yaml(yaml).unwrap();
        assert_eq!(wf.description.as_deref(), Some("two steps"));
        assert_eq!(wf.steps[0].completion_criteria, CompletionCriteria::contains("APPROVED"));
        assert_eq!(wf.steps[1].completion_criteria, CompletionCriteria::CodeBlock);
        assert_eq!(wf.steps[1].order, Some(1));
    }

    #[test]
    fn test_into_input_resolves_model_variables() {
        std::env::set_var("STEPFLOW_SCHEMA_TEST_MODEL", "gpt-test");
        let yaml = r#"
name: "Env"
steps:
  - model: "${STEPFLOW_SCHEMA_TEST_MODEL}"
    prompt: "p"
  - model: "${STEPFLOW_SCHEMA_UNSET_MODEL:-fallback}"
    prompt: "p"
"#;
        let input = WorkflowDefinition::from_yaml(yaml).unwrap().into_input();
        assert_eq!(input.name, "Env");
        assert_eq!(input.steps[0].model, "gpt-test");
        assert_eq!(input.steps[1].model, "fallback");
        assert!(input.validate().is_ok());
    }

    #[test]
    fn test_missing_name_is_an_error() {
        let err = WorkflowDefinition::from_yaml("steps: []").unwrap_err();
        assert!(err.contains("Failed to parse workflow YAML"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = WorkflowDefinition::from_file("/nonexistent/flow.yaml").unwrap_err();
        assert!(err.contains("Failed to read workflow file"));
    }
}
