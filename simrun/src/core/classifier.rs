//! Ordered, first-match-wins classification of tool output lines.
//!
//! Explicit severity markers always outrank heuristics: a line tagged
//! `[ERROR]` is an error even if it also mentions a warning. Blank lines must
//! be filtered by the caller before classification.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::Category;

static RULES: LazyLock<Vec<(Regex, Category)>> = LazyLock::new(|| {
    [
        // Explicit markers.
        (
            r"(?i:\[\s*(?:error|critical|fatal)\s*\])|^\s*(?:ERROR|CRITICAL|FATAL)\s*:|\s-\s+(?:ERROR|CRITICAL)\s+-\s",
            Category::Error,
        ),
        (
            r"(?i:\[\s*warn(?:ing)?\s*\])|^\s*WARN(?:ING)?\s*:|\s-\s+WARN(?:ING)?\s+-\s",
            Category::Warning,
        ),
        (
            r"(?i:\[\s*info\s*\])|^\s*INFO\s*:|\s-\s+INFO\s+-\s",
            Category::Info,
        ),
        (
            r"(?i:\[\s*debug\s*\])|^\s*DEBUG\s*:|\s-\s+DEBUG\s+-\s",
            Category::Debug,
        ),
        // Keywords.
        (r"(?i)\b(?:executing|running|command)\b", Category::Command),
        (
            r"^\s*[✓✔✅]|(?i:completed successfully)|(?i:\[\s*(?:success|ok)\s*\])|^\s*SUCCESS\s*:",
            Category::Success,
        ),
        (r"(?i)\b(?:processing|starting)\b", Category::Info),
        (r"^\s*(?:={2,}|-)", Category::Command),
        // Unprefixed severities.
        (r"(?i)error:|exception|traceback|failed:", Category::Error),
        (r"(?i)warning:|warn:|\bdeprecat", Category::Warning),
        (r"(?i)debug:", Category::Debug),
        (
            r"(?i)\b(?:generating|loading|saving|creating)\b",
            Category::Info,
        ),
    ]
    .into_iter()
    .map(|(pattern, category)| (Regex::new(pattern).unwrap(), category))
    .collect()
});

/// Classify one non-blank line of tool output.
pub fn classify(line: &str) -> Category {
    RULES
        .iter()
        .find(|(rule, _)| rule.is_match(line))
        .map_or(Category::Default, |(_, category)| *category)
}
