//! Static validation of generated source text.
//!
//! Checks that a candidate defines every expected output symbol at top level
//! and carries no markdown artifacts. Deeper syntax validation belongs to the
//! optional external type checker.

/// Strip a single enclosing markdown code fence, if present.
#[must_use]
pub fn strip_markdown_fences(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let Some(rest) = trimmed.split_once('\n').map(|(_, rest)| rest) else {
        return String::new();
    };
    let Some(body) = rest.trim_end().strip_suffix("```") else {
        return trimmed.to_string();
    };
    body.trim().to_string()
}

/// Whether a top-level line defines `name`.
fn defines(line: &str, name: &str) -> bool {
    // Only column-0 definitions count as top-level.
    if line.starts_with(char::is_whitespace) {
        return false;
    }
    for prefix in ["def ", "async def ", "class "] {
        if let Some(rest) = line.strip_prefix(prefix) {
            if let Some(tail) = rest.strip_prefix(name) {
                return tail
                    .chars()
                    .next()
                    .is_none_or(|c| c == '(' || c == ':' || c.is_whitespace());
            }
        }
    }
    // Module-level assignment: `name = ...` or `name: T = ...`.
    if let Some(tail) = line.strip_prefix(name) {
        let tail = tail.trim_start();
        return tail.starts_with('=') && !tail.starts_with("==") || tail.starts_with(':');
    }
    false
}

/// Validate generated source against the expected output symbols.
///
/// An empty list means valid. Error strings are human-readable and feed the
/// retry loop's error context.
#[must_use]
pub fn validate_generated_source(source: &str, expected_names: &[String]) -> Vec<String> {
    let mut errors = Vec::new();

    if source.trim().is_empty() {
        errors.push("Generated source is empty.".to_string());
        return errors;
    }
    if source.lines().any(|l| l.trim_start().starts_with("```")) {
        errors.push("Generated source contains markdown code fences.".to_string());
    }

    for name in expected_names {
        if !source.lines().any(|line| defines(line, name)) {
            errors.push(format!(
                "Generated source does not define expected name {name:?} at top level."
            ));
        }
    }
    errors
}
