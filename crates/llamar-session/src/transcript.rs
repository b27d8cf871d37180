//! Transcript format: one JSON object per line. Line 1 is the session
//! header; every later line is a message. Files are append-only, and
//! loaders tolerate corrupt lines rather than failing the whole session.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use llamar_core::ContentBlock;

/// Assistant messages whose text starts with this prefix are compaction
/// markers: everything before the newest one is summarized by it.
pub const COMPACTION_PREFIX: &str = "[Compaction Summary]\n\n";

pub const TRANSCRIPT_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Assistant => f.write_str("assistant"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
    #[serde(
        rename = "stopReason",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub stop_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl Message {
    pub fn text_only(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentBlock::text(text)],
            stop_reason: None,
            provider: None,
            model: None,
            usage: None,
            timestamp: None,
        }
    }

    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn is_compaction_marker(&self) -> bool {
        self.role == Role::Assistant && self.text().starts_with(COMPACTION_PREFIX)
    }
}

#[derive(Debug, Serialize)]
struct Header<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    version: u32,
    id: &'a str,
    timestamp: String,
    cwd: &'a str,
}

/// Write the header line, only if the file does not already exist.
pub fn write_header(path: &Path, session_id: &str, cwd: &str) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create transcript dir: {}", parent.display()))?;
    }
    let header = Header {
        kind: "session",
        version: TRANSCRIPT_VERSION,
        id: session_id,
        timestamp: Utc::now().to_rfc3339(),
        cwd,
    };
    let line = serde_json::to_string(&header).context("failed to serialize header")?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to create transcript: {}", path.display()))?;
    writeln!(file, "{line}").context("failed to write transcript header")?;
    Ok(())
}

/// Append one message as one line. Never rewrites existing content.
pub fn append_message(path: &Path, message: &Message) -> Result<()> {
    let mut message = message.clone();
    if message.timestamp.is_none() {
        message.timestamp = Some(Utc::now().to_rfc3339());
    }
    let line = serde_json::to_string(&message).context("failed to serialize message")?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open transcript: {}", path.display()))?;
    writeln!(file, "{line}").context("failed to append transcript message")?;
    file.flush().context("failed to flush transcript append")
}

/// Append a compaction marker summarizing everything before it.
pub fn append_compaction(path: &Path, summary: &str) -> Result<()> {
    let message = Message::text_only(Role::Assistant, format!("{COMPACTION_PREFIX}{summary}"));
    append_message(path, &message)
}

/// Load messages, skipping the header and tolerating corrupt lines.
///
/// With `from_compaction`, messages before the newest compaction marker are
/// dropped (the marker itself survives, carrying the summary). With it off,
/// observed markers are logged so partial behavior stays visible.
pub fn load_messages(path: &Path, from_compaction: bool) -> Result<Vec<Message>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return Ok(Vec::new()),
    };

    let mut messages = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        if idx == 0 {
            // Header line; versions only ever add fields, so any parse is fine.
            if let Ok(value) = serde_json::from_str::<Value>(line)
                && value.get("type").and_then(Value::as_str) == Some("session")
            {
                continue;
            }
        }
        match serde_json::from_str::<Message>(line) {
            Ok(message) => messages.push(message),
            Err(error) => {
                warn!(
                    path = %path.display(),
                    line_number = idx + 1,
                    %error,
                    "skipping corrupt transcript line"
                );
            }
        }
    }

    let marker_index = messages.iter().rposition(Message::is_compaction_marker);
    match (from_compaction, marker_index) {
        (true, Some(idx)) => Ok(messages.split_off(idx)),
        (false, Some(_)) => {
            debug!(
                path = %path.display(),
                "compaction marker observed but filtering disabled"
            );
            Ok(messages)
        }
        (_, None) => Ok(messages),
    }
}

/// Count messages on disk (header excluded).
pub fn count_messages(path: &Path) -> usize {
    load_messages(path, false).map(|m| m.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_header_written_once() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("abc.jsonl");

        write_header(&path, "abc", "/work").unwrap();
        write_header(&path, "abc", "/work").unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 1);
        let header: Value = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
        assert_eq!(header["type"], "session");
        assert_eq!(header["version"], 2);
        assert_eq!(header["id"], "abc");
        assert_eq!(header["cwd"], "/work");
    }

    #[test]
    fn test_append_is_append_only() {
        // Property 5: appending never rewrites existing lines and the
        // count is monotonic.
        let temp = tempdir().unwrap();
        let path = temp.path().join("abc.jsonl");
        write_header(&path, "abc", "/work").unwrap();

        append_message(&path, &Message::text_only(Role::User, "hello")).unwrap();
        let snapshot = std::fs::read_to_string(&path).unwrap();
        let count_before = count_messages(&path);

        append_message(&path, &Message::text_only(Role::Assistant, "hi")).unwrap();
        let grown = std::fs::read_to_string(&path).unwrap();

        assert!(grown.starts_with(&snapshot), "existing bytes must be untouched");
        assert!(count_messages(&path) > count_before);
    }

    #[test]
    fn test_load_round_trip() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("s.jsonl");
        write_header(&path, "s", "/work").unwrap();
        append_message(&path, &Message::text_only(Role::User, "hello")).unwrap();
        append_message(&path, &Message::text_only(Role::Assistant, "hi")).unwrap();

        let messages = load_messages(&path, true).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].text(), "hello");
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].text(), "hi");
        assert!(messages[1].timestamp.is_some());
    }

    #[test]
    fn test_compaction_filtering() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("s.jsonl");
        write_header(&path, "s", "/work").unwrap();
        append_message(&path, &Message::text_only(Role::User, "old question")).unwrap();
        append_message(&path, &Message::text_only(Role::Assistant, "old answer")).unwrap();
        append_compaction(&path, "They discussed old things.").unwrap();
        append_message(&path, &Message::text_only(Role::User, "new question")).unwrap();

        let filtered = load_messages(&path, true).unwrap();
        assert_eq!(filtered.len(), 2);
        assert!(filtered[0].is_compaction_marker());
        assert!(filtered[0].text().contains("They discussed old things."));
        assert_eq!(filtered[1].text(), "new question");

        let unfiltered = load_messages(&path, false).unwrap();
        assert_eq!(unfiltered.len(), 4);
    }

    #[test]
    fn test_latest_marker_wins() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("s.jsonl");
        write_header(&path, "s", "/work").unwrap();
        append_compaction(&path, "first summary").unwrap();
        append_message(&path, &Message::text_only(Role::User, "middle")).unwrap();
        append_compaction(&path, "second summary").unwrap();
        append_message(&path, &Message::text_only(Role::User, "tail")).unwrap();

        let filtered = load_messages(&path, true).unwrap();
        assert_eq!(filtered.len(), 2);
        assert!(filtered[0].text().contains("second summary"));
    }

    #[test]
    fn test_corrupt_lines_tolerated() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("s.jsonl");
        write_header(&path, "s", "/work").unwrap();
        append_message(&path, &Message::text_only(Role::User, "kept")).unwrap();
        {
            use std::io::Write;
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(file, "{{ broken json").unwrap();
        }
        append_message(&path, &Message::text_only(Role::Assistant, "also kept")).unwrap();

        let messages = load_messages(&path, true).unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let temp = tempdir().unwrap();
        let messages = load_messages(&temp.path().join("absent.jsonl"), true).unwrap();
        assert!(messages.is_empty());
    }

    #[test]
    fn test_forward_compatible_extra_fields() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("s.jsonl");
        std::fs::write(
            &path,
            concat!(
                "{\"type\":\"session\",\"version\":3,\"id\":\"s\",\"timestamp\":\"t\",\"cwd\":\"/\",\"future\":1}\n",
                "{\"role\":\"user\",\"content\":[{\"type\":\"text\",\"text\":\"hi\"}],\"newField\":true}\n",
            ),
        )
        .unwrap();

        let messages = load_messages(&path, true).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text(), "hi");
    }
}
