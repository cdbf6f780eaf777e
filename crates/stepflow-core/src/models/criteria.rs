use serde::{Deserialize, Serialize};

/// Rule deciding whether a step's raw model output is accepted.
///
/// Persisted and exchanged in its textual form:
/// `always_pass`, `CODE_BLOCK`, or `CONTAINS:<literal>`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CompletionCriteria {
    #[default]
    AlwaysPass,
    /// Output must contain a fenced code block (matched opening and closing fence).
    CodeBlock,
    /// Output must contain this literal substring (case-sensitive).
    Contains(String),
    /// A criterion this engine does not know. Evaluated as always-pass.
    Unrecognized(String),
}

const CONTAINS_PREFIX: &str = "CONTAINS:";

impl CompletionCriteria {
    pub fn contains(needle: impl Into<String>) -> Self {
        Self::Contains(needle.into())
    }

    pub fn as_string(&self) -> String {
        match self {
            Self::AlwaysPass => "always_pass".to_string(),
            Self::CodeBlock => "CODE_BLOCK".to_string(),
            Self::Contains(needle) => format!("{}{}", CONTAINS_PREFIX, needle),
            Self::Unrecognized(raw) => raw.clone(),
        }
    }

    pub fn from_str(s: &str) -> Self {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("always_pass") {
            return Self::AlwaysPass;
        }
        if trimmed.eq_ignore_ascii_case("code_block") {
            return Self::CodeBlock;
        }
        // The literal is taken verbatim (no trimming) so whitespace can be part of it.
        if s.len() >= CONTAINS_PREFIX.len()
            && s.is_char_boundary(CONTAINS_PREFIX.len())
            && s[..CONTAINS_PREFIX.len()].eq_ignore_ascii_case(CONTAINS_PREFIX)
        {
            return Self::Contains(s[CONTAINS_PREFIX.len()..].to_string());
        }
        Self::Unrecognized(s.to_string())
    }

    /// Short human-readable description, used in generated failure messages.
    pub fn describe(&self) -> String {
        match self {
            Self::AlwaysPass => "always pass".to_string(),
            Self::CodeBlock => "output must contain a fenced code block".to_string(),
            Self::Contains(needle) => format!("output must contain \"{}\"", needle),
            Self::Unrecognized(raw) => format!("unrecognized criterion '{}'", raw),
        }
    }
}

impl From<String> for CompletionCriteria {
    fn from(s: String) -> Self {
        Self::from_str(&s)
    }
}

impl From<CompletionCriteria> for String {
    fn from(c: CompletionCriteria) -> Self {
        c.as_string()
    }
}

impl std::fmt::Display for CompletionCriteria {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_string())
    }
}
