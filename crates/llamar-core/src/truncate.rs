//! Truncation helpers shared by the trace writer and dry-run previews.

/// Max length for argument strings recorded in traces.
pub const ARG_LIMIT: usize = 200;
/// Max length for result strings recorded in traces.
pub const RESULT_LIMIT: usize = 500;

/// Truncate to `limit` characters, appending an ellipsis when cut.
/// Counts characters, not bytes, so multi-byte input never splits.
pub fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit).collect();
    out.push_str("...");
    out
}

pub fn truncate_arg(text: &str) -> String {
    truncate(text, ARG_LIMIT)
}

pub fn truncate_result(text: &str) -> String {
    truncate(text, RESULT_LIMIT)
}
