//! Code extraction from free-form model responses.

use std::sync::LazyLock;

use regex::Regex;

/// Opening fence with an optional language tag, then everything up to the
/// closing fence or end-of-input. A tag cut off by end-of-input is not code.
static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:[A-Za-z0-9_+\-]*[ \t]*(?:\r?\n|\z))?(.*?)(?:```|\z)").unwrap()
});

/// Pull fenced code segments out of `text`.
///
/// Segment interiors are trimmed and joined in document order with a single
/// newline, and blank lines are dropped. Text without any fence yields an
/// empty string; an unterminated fence runs to end-of-input.
pub fn extract(text: &str) -> String {
    let combined = FENCE_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|segment| segment.as_str().trim())
        .collect::<Vec<_>>()
        .join("\n");

    combined
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
