//! Response cleaning
//!
//! Models wrap code in markdown fences and reasoning models prepend
//! `<think>` blocks. Everything generated passes through here before it
//! becomes a candidate, test case or critique.

use once_cell::sync::Lazy;
use regex::Regex;

static THINK_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid think-block regex"));

static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n(.*?)```").expect("valid fence regex"));

static LEADING_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^```[A-Za-z0-9_+-]*[ \t]*\r?\n?").expect("valid leading fence regex"));

static TRAILING_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\r?\n?```\s*$").expect("valid trailing fence regex"));

/// Remove `<think>...</think>` reasoning blocks
pub fn strip_think_blocks(text: &str) -> String {
    THINK_BLOCK.replace_all(text, "").trim().to_string()
}

/// Extract code from a model response.
///
/// The first fenced block wins. Without a complete block, a dangling
/// leading or trailing fence is stripped.
pub fn clean_code(text: &str) -> String {
    let text = strip_think_blocks(text);

    if let Some(block) = FENCED_BLOCK.captures(&text).and_then(|c| c.get(1)) {
        return block.as_str().trim().to_string();
    }

    let without_leading = LEADING_FENCE.replace(&text, "");
    TRAILING_FENCE.replace(&without_leading, "").trim().to_string()
}

/// Truncate to at most `max` bytes on a char boundary
pub fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
