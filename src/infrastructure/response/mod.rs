use once_cell::sync::Lazy;
use regex::Regex;

static REASONING_BLOCK_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<(think|reasoning|internal)>[\s\S]*?</(think|reasoning|internal)>|<think\s*/>")
        .unwrap()
});

static MULTIPLE_NEWLINES_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

static LEADING_FENCE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^```[A-Za-z0-9_-]*[ \t]*\r?\n?").unwrap());

static TRAILING_FENCE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\r?\n?```\s*$").unwrap());

/// Cleans generated prose: drops reasoning blocks some models emit, trims, and
/// collapses runs of blank lines.
pub fn clean_llm_response(response: &str) -> String {
    let without_reasoning = REASONING_BLOCK_PATTERN.replace_all(response, "");
    MULTIPLE_NEWLINES_PATTERN
        .replace_all(without_reasoning.trim(), "\n\n")
        .to_string()
}

/// Removes a surrounding markdown code fence (```json ... ```) if present.
pub fn strip_code_fences(response: &str) -> String {
    let trimmed = response.trim();
    let without_open = LEADING_FENCE_PATTERN.replace(trimmed, "");
    let without_close = TRAILING_FENCE_PATTERN.replace(&without_open, "");
    without_close.trim().to_string()
}
