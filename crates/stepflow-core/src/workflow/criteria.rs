//! Criteria evaluator - decides whether a step's raw output is accepted.
//!
//! Pure functions, no side effects. An unrecognized criterion is accepted:
//! definitions written for a newer engine should not brick a pipeline, and
//! the orchestrator logs a warning when it meets one.

use crate::models::criteria::CompletionCriteria;

const FENCES: [&str; 2] = ["```", "~~~"];

/// Whether `raw_output` satisfies `criteria`.
pub fn evaluate(criteria: &CompletionCriteria, raw_output: &str) -> bool {
    match criteria {
        CompletionCriteria::AlwaysPass => true,
        CompletionCriteria::CodeBlock => has_fenced_code_block(raw_output),
        CompletionCriteria::Contains(needle) => raw_output.contains(needle.as_str()),
        CompletionCriteria::Unrecognized(_) => true,
    }
}

/// Error-log message for a step whose output was rejected.
pub fn rejection_message(criteria: &CompletionCriteria) -> String {
    format!(
        "Completion criterion '{}' not met: {}",
        criteria,
        criteria.describe()
    )
}

/// True when an opening fence is followed later by a closing fence of the same kind.
fn has_fenced_code_block(text: &str) -> bool {
    FENCES.iter().any(|fence| match text.find(fence) {
        Some(open) => text[open + fence.len()..].contains(fence),
        None => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_always_pass_accepts_anything() {
        for output in ["", "anything", "```", "\n\n"] {
            assert!(evaluate(&CompletionCriteria::AlwaysPass, output));
        }
    }

    #[test]
    fn test_code_block_requires_matched_fences() {
        let c = CompletionCriteria::CodeBlock;
        assert!(evaluate(&c, "here:\n```py\nprint(1)\n```"));
        assert!(evaluate(&c, "~~~\nplain\n~~~"));
        assert!(!evaluate(&c, "no code here"));
        assert!(!evaluate(&c, "unterminated ```rust\nfn main() {}"));
        assert!(!evaluate(&c, "mixed ``` and ~~~ fences"));
    }

    #[test]
    fn test_contains_is_case_sensitive_and_exact() {
        let c = CompletionCriteria::contains("Success");
        assert!(evaluate(&c, "Great Success!"));
        assert!(!evaluate(&c, "great success!"));
        assert!(!evaluate(&c, "Succes"));
    }

    #[test]
    fn test_unrecognized_criterion_is_permissive() {
        let c = CompletionCriteria::from_str("REGEX:^\\d+$");
        assert!(evaluate(&c, "not digits"));
    }

    #[test]
    fn test_rejection_message_names_the_criterion() {
        let msg = rejection_message(&CompletionCriteria::contains("DONE"));
        assert!(msg.contains("CONTAINS:DONE"));
        assert!(msg.contains("not met"));
    }
}
