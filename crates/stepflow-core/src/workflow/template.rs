//! Template resolver - threads the previous step's accepted output into the
//! next step's prompt.
//!
//! The placeholder is `{previous}`; `{previous_context}` is accepted as an
//! alias for definitions written against older builders. Every occurrence is
//! replaced in a single pass, so placeholder text inside the substituted
//! output is left alone.

pub const PLACEHOLDER: &str = "{previous}";
pub const PLACEHOLDER_ALIAS: &str = "{previous_context}";

const OPEN: &str = "{previous";
const ALIAS_SUFFIX: &str = "_context";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("unterminated placeholder at byte {offset}: expected '{expected}'")]
    Unterminated { offset: usize, expected: &'static str },
}

/// Replace every placeholder in `template` with `previous_output`.
///
/// Fails only when a placeholder is opened but not closed, e.g. `{previous`
/// at the end of the template or followed by whitespace. Words that merely
/// start with the token (`{previously}`) are ordinary text.
pub fn resolve(template: &str, previous_output: &str) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len() + previous_output.len());
    let mut rest = template;
    let mut offset = 0;

    while let Some(pos) = rest.find(OPEN) {
        out.push_str(&rest[..pos]);
        let start = offset + pos;
        let after = &rest[pos + OPEN.len()..];

        let token_len = match classify(after) {
            Token::Placeholder(suffix_len) => {
                out.push_str(previous_output);
                OPEN.len() + suffix_len
            }
            Token::Literal => {
                out.push_str(OPEN);
                OPEN.len()
            }
            Token::Unterminated(expected) => {
                return Err(TemplateError::Unterminated {
                    offset: start,
                    expected,
                })
            }
        };

        rest = &rest[pos + token_len..];
        offset = start + token_len;
    }

    out.push_str(rest);
    Ok(out)
}

enum Token {
    /// A complete placeholder; the value is the length after `{previous`.
    Placeholder(usize),
    Literal,
    Unterminated(&'static str),
}

fn classify(after: &str) -> Token {
    if after.starts_with('}') {
        return Token::Placeholder(1);
    }
    if let Some(tail) = after.strip_prefix(ALIAS_SUFFIX) {
        return match tail.chars().next() {
            Some('}') => Token::Placeholder(ALIAS_SUFFIX.len() + 1),
            Some(c) if is_word_char(c) => Token::Literal,
            _ => Token::Unterminated(PLACEHOLDER_ALIAS),
        };
    }
    match after.chars().next() {
        Some(c) if is_word_char(c) => Token::Literal,
        _ => Token::Unterminated(PLACEHOLDER),
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}
