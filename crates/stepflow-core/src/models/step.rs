use serde::{Deserialize, Serialize};

use super::criteria::CompletionCriteria;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }

    /// Progress rank within a run: pending < running < terminal.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Completed | Self::Failed => 2,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One model-invocation stage of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    pub workflow_id: String,
    /// 1-based, contiguous within the workflow.
    pub order: u32,
    pub model: String,
    pub prompt_template: String,
    pub completion_criteria: CompletionCriteria,
    pub status: StepStatus,
    /// The resolved prompt sent to the model during the latest run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_log: Option<String>,
}

/// A step as submitted by the workflow builder, before it has an identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StepDraft {
    /// Requested position. Only used to sort; final orders are always `1..=n`.
    #[serde(default)]
    pub order: Option<u32>,
    pub model: String,
    #[serde(alias = "prompt")]
    pub prompt_template: String,
    #[serde(default, alias = "criteria")]
    pub completion_criteria: CompletionCriteria,
}

impl StepDraft {
    pub fn new(model: impl Into<String>, prompt_template: impl Into<String>) -> Self {
        Self {
            order: None,
            model: model.into(),
            prompt_template: prompt_template.into(),
            completion_criteria: CompletionCriteria::AlwaysPass,
        }
    }

    pub fn with_criteria(mut self, criteria: CompletionCriteria) -> Self {
        self.completion_criteria = criteria;
        self
    }
}

/// Sort drafts by requested order (stable; drafts without one keep their
/// relative position after the ordered ones) and renumber them `1..=n`.
pub fn normalize_steps(mut drafts: Vec<StepDraft>) -> Vec<StepDraft> {
    drafts.sort_by_key(|d| d.order.unwrap_or(u32::MAX));
    resequence(&mut drafts);
    drafts
}

/// Insert a draft so that it ends up at `order` (1-based, clamped to the end).
pub fn insert_step(drafts: &mut Vec<StepDraft>, order: u32, draft: StepDraft) {
    let index = (order.max(1) as usize - 1).min(drafts.len());
    drafts.insert(index, draft);
    resequence(drafts);
}

/// Remove the draft at `order` (1-based) and close the gap.
pub fn remove_step(drafts: &mut Vec<StepDraft>, order: u32) -> Option<StepDraft> {
    if order == 0 || order as usize > drafts.len() {
        return None;
    }
    let removed = drafts.remove(order as usize - 1);
    resequence(drafts);
    Some(removed)
}

fn resequence(drafts: &mut [StepDraft]) {
    for (i, draft) in drafts.iter_mut().enumerate() {
        draft.order = Some(i as u32 + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drafts(n: usize) -> Vec<StepDraft> {
        (0..n)
            .map(|i| StepDraft::new("m", format!("prompt {}", i + 1)))
            .collect()
    }

    fn orders(drafts: &[StepDraft]) -> Vec<u32> {
        drafts.iter().filter_map(|d| d.order).collect()
    }

    #[test]
    fn test_normalize_sorts_by_requested_order_and_fills_gaps() {
        let mut input = drafts(3);
        input[0].order = Some(7);
        input[1].order = Some(2);
        input[2].order = None;

        let out = normalize_steps(input);
        assert_eq!(orders(&out), vec![1, 2, 3]);
        assert_eq!(out[0].prompt_template, "prompt 2");
        assert_eq!(out[1].prompt_template, "prompt 1");
        assert_eq!(out[2].prompt_template, "prompt 3");
    }

    #[test]
    fn test_remove_at_every_position_keeps_contiguous_orders() {
        for remove_at in 1..=4u32 {
            let mut list = normalize_steps(drafts(4));
            let removed = remove_step(&mut list, remove_at).unwrap();
            assert_eq!(removed.prompt_template, format!("prompt {}", remove_at));
            assert_eq!(orders(&list), vec![1, 2, 3]);
        }
    }

    #[test]
    fn test_insert_at_every_position_keeps_contiguous_orders() {
        for insert_at in 1..=5u32 {
            let mut list = normalize_steps(drafts(3));
            insert_step(&mut list, insert_at, StepDraft::new("m", "new"));
            assert_eq!(orders(&list), vec![1, 2, 3, 4]);
            let expected_index = (insert_at as usize - 1).min(3);
            assert_eq!(list[expected_index].prompt_template, "new");
        }
    }

    #[test]
    fn test_remove_out_of_range_is_noop() {
        let mut list = normalize_steps(drafts(2));
        assert!(remove_step(&mut list, 0).is_none());
        assert!(remove_step(&mut list, 3).is_none());
        assert_eq!(orders(&list), vec![1, 2]);
    }

    #[test]
    fn test_draft_accepts_short_field_aliases() {
        let draft: StepDraft = serde_json::from_value(serde_json::json!({
            "model": "gpt-4o",
            "prompt": "Summarize {previous}",
            "criteria": "CONTAINS:Summary"
        }))
        .unwrap();
        assert_eq!(draft.prompt_template, "Summarize {previous}");
        assert_eq!(
            draft.completion_criteria,
            CompletionCriteria::Contains("Summary".to_string())
        );
    }
}
