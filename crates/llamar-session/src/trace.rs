//! Per-session trace of tool invocations: `<id>_trace.jsonl` next to the
//! transcript. Appends are best-effort from the runner's point of view;
//! a failed trace write never changes a tool result.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use llamar_core::truncate::{truncate_arg, truncate_result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn: Option<u32>,
    pub tool: String,
    pub args: Value,
    pub result: String,
    pub success: bool,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
}

impl TraceEntry {
    /// Build an entry with argument and result truncation applied.
    pub fn new(
        tool: &str,
        args: &Value,
        result: &str,
        success: bool,
        elapsed_ms: u64,
        approved_by: Option<String>,
        turn: Option<u32>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            turn,
            tool: tool.to_string(),
            args: truncate_args(args),
            result: truncate_result(result),
            success,
            elapsed_ms,
            approved_by,
        }
    }
}

/// Truncate every string leaf in the argument object.
fn truncate_args(args: &Value) -> Value {
    match args {
        Value::String(text) => Value::String(truncate_arg(text)),
        Value::Array(items) => Value::Array(items.iter().map(truncate_args).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), truncate_args(value)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Append one entry as one line.
pub fn trace_add(path: &Path, entry: &TraceEntry) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create trace dir: {}", parent.display()))?;
    }
    let line = serde_json::to_string(entry).context("failed to serialize trace entry")?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open trace: {}", path.display()))?;
    writeln!(file, "{line}").context("failed to append trace entry")?;
    Ok(())
}

/// Load the last `n` entries (all of them when `n` is `None`), skipping
/// corrupt lines.
pub fn trace_load(path: &Path, n: Option<usize>) -> Result<Vec<TraceEntry>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return Ok(Vec::new()),
    };

    let mut entries: Vec<TraceEntry> = raw
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect();

    if let Some(n) = n
        && entries.len() > n
    {
        entries.drain(..entries.len() - n);
    }
    Ok(entries)
}

/// Render entries for humans, one line each.
pub fn format_trace(entries: &[TraceEntry]) -> String {
    entries
        .iter()
        .map(|entry| {
            let status = if entry.success { "ok" } else { "err" };
            let approved = entry
                .approved_by
                .as_deref()
                .map(|by| format!(" approved_by={by}"))
                .unwrap_or_default();
            format!(
                "{} {} [{}] {}ms{} {}",
                entry.timestamp, entry.tool, status, entry.elapsed_ms, approved, entry.result
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_add_and_load_in_order() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("s_trace.jsonl");

        for i in 0..3 {
            trace_add(
                &path,
                &TraceEntry::new(
                    "bash",
                    &json!({"command": format!("echo {i}")}),
                    "done",
                    true,
                    5,
                    None,
                    Some(i),
                ),
            )
            .unwrap();
        }

        let entries = trace_load(&path, None).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].turn, Some(0));
        assert_eq!(entries[2].turn, Some(2));
    }

    #[test]
    fn test_load_last_n() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("s_trace.jsonl");
        for i in 0..5 {
            trace_add(
                &path,
                &TraceEntry::new("read_file", &json!({"path": "x"}), "ok", true, 1, None, Some(i)),
            )
            .unwrap();
        }

        let entries = trace_load(&path, Some(2)).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].turn, Some(3));
        assert_eq!(entries[1].turn, Some(4));
    }

    #[test]
    fn test_truncation_applied() {
        let long_arg = "a".repeat(300);
        let long_result = "b".repeat(900);
        let entry = TraceEntry::new(
            "write_file",
            &json!({"path": "x", "content": long_arg}),
            &long_result,
            true,
            12,
            Some("user".into()),
            None,
        );

        let content = entry.args["content"].as_str().unwrap();
        assert_eq!(content.chars().count(), 203);
        assert!(content.ends_with("..."));
        assert_eq!(entry.result.chars().count(), 503);
        assert!(entry.result.ends_with("..."));
    }

    #[test]
    fn test_nested_args_truncated() {
        let entry = TraceEntry::new(
            "data",
            &json!({"rows": ["short", "x".repeat(250)]}),
            "ok",
            true,
            1,
            None,
            None,
        );
        let rows = entry.args["rows"].as_array().unwrap();
        assert_eq!(rows[0], "short");
        assert!(rows[1].as_str().unwrap().ends_with("..."));
    }

    #[test]
    fn test_format_trace() {
        let entry = TraceEntry::new(
            "bash",
            &json!({"command": "ls"}),
            "files listed",
            true,
            42,
            Some("user".into()),
            None,
        );
        let rendered = format_trace(std::slice::from_ref(&entry));
        assert!(rendered.contains("bash"));
        assert!(rendered.contains("[ok]"));
        assert!(rendered.contains("42ms"));
        assert!(rendered.contains("approved_by=user"));
    }

    #[test]
    fn test_missing_trace_loads_empty() {
        let temp = tempdir().unwrap();
        assert!(trace_load(&temp.path().join("none.jsonl"), None).unwrap().is_empty());
    }
}
