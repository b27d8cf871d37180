//! Notification sinks for task outcomes. Console and file are owned
//! here; messaging channels are external collaborators and arrive as
//! pre-registered callbacks if at all.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::info;

use crate::store::{RunRecord, Task};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sink {
    Console,
    File(PathBuf),
    None,
}

impl Sink {
    /// Parse a task's `notification_sink` field: `console`, `none`, or
    /// `file:<path>`. Unknown values fall back to console so outcomes are
    /// never silently lost.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "none" => Self::None,
            "console" | "" => Self::Console,
            other => match other.strip_prefix("file:") {
                Some(path) if !path.is_empty() => Self::File(PathBuf::from(path)),
                _ => Self::Console,
            },
        }
    }

    pub fn notify(&self, task: &Task, record: &RunRecord) -> Result<()> {
        let line = render(task, record);
        match self {
            Self::None => Ok(()),
            Self::Console => {
                // stdout is protocol; notifications ride the log stream.
                info!(task = %task.name, success = record.success, "{line}");
                Ok(())
            }
            Self::File(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("failed to create sink dir: {}", parent.display())
                    })?;
                }
                let mut file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("failed to open sink file: {}", path.display()))?;
                writeln!(file, "{line}").context("failed to append notification")
            }
        }
    }
}

fn render(task: &Task, record: &RunRecord) -> String {
    let status = if record.success { "ok" } else { "failed" };
    let detail = record
        .result
        .as_deref()
        .or(record.error.as_deref())
        .unwrap_or("(no detail)");
    format!(
        "[{}] task '{}' {status}: {detail}",
        Utc::now().to_rfc3339(),
        task.name
    )
}
