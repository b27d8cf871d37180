//! The task store: `tasks` and `task_runs` in a sqlite file.
//!
//! Invariant maintained on every write: `next_run` is non-null exactly
//! when the task has a schedule and is active.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::cron::{next_run_after, normalize_schedule};

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    schedule TEXT,
    prompt TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'active',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    last_run INTEGER,
    next_run INTEGER,
    run_count INTEGER NOT NULL DEFAULT 0,
    last_result TEXT,
    last_error TEXT,
    notification_sink TEXT NOT NULL DEFAULT 'console'
);

CREATE INDEX IF NOT EXISTS idx_tasks_due ON tasks(status, next_run);

CREATE TABLE IF NOT EXISTS task_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id INTEGER NOT NULL,
    started_at INTEGER NOT NULL,
    finished_at INTEGER,
    status TEXT NOT NULL,
    result TEXT,
    error TEXT,
    tokens_used INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_task_runs_task ON task_runs(task_id);
";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Active,
    Paused,
    Completed,
}

impl TaskStatus {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
        }
    }

    fn from_db_str(s: &str) -> Self {
        match s {
            "paused" => Self::Paused,
            "completed" => Self::Completed,
            _ => Self::Active,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub schedule: Option<String>,
    pub prompt: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub last_result: Option<String>,
    pub last_error: Option<String>,
    pub notification_sink: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskRun {
    pub id: i64,
    pub task_id: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: String,
    pub result: Option<String>,
    pub error: Option<String>,
    pub tokens_used: u64,
}

/// Outcome handed back by the task runner.
#[derive(Debug, Clone, Default)]
pub struct RunRecord {
    pub success: bool,
    pub result: Option<String>,
    pub error: Option<String>,
    pub tokens_used: u64,
}

pub struct TaskStore {
    conn: Connection,
}

impl TaskStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create task store dir: {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open task store: {}", path.display()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().context("failed to open in-memory task store")?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to apply task store pragmas")?;
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to initialize task store schema")?;
        Ok(Self { conn })
    }

    /// Create a task. The schedule is validated up front; `next_run` is
    /// computed from local time when the task is active and scheduled.
    pub fn create(
        &self,
        name: &str,
        description: &str,
        schedule: Option<&str>,
        prompt: &str,
        notification_sink: &str,
    ) -> Result<Task> {
        let schedule = match schedule {
            Some(expr) => Some(normalize_schedule(expr).map_err(|msg| anyhow::anyhow!(msg))?),
            None => None,
        };
        let now = Utc::now();
        let next_run = schedule
            .as_deref()
            .and_then(|expr| next_run_after(expr, &Local::now()))
            .map(|dt| dt.with_timezone(&Utc));

        self.conn
            .execute(
                "INSERT INTO tasks
                     (name, description, schedule, prompt, status, created_at, updated_at,
                      next_run, notification_sink)
                 VALUES (?1, ?2, ?3, ?4, 'active', ?5, ?6, ?7, ?8)",
                params![
                    name,
                    description,
                    schedule,
                    prompt,
                    now.timestamp(),
                    now.timestamp(),
                    next_run.map(|dt| dt.timestamp()),
                    notification_sink,
                ],
            )
            .context("failed to insert task")?;

        let id = self.conn.last_insert_rowid();
        self.get(id)?
            .ok_or_else(|| anyhow::anyhow!("task {id} vanished after insert"))
    }

    pub fn get(&self, id: i64) -> Result<Option<Task>> {
        self.conn
            .query_row(
                "SELECT id, name, description, schedule, prompt, status, created_at,
                        updated_at, last_run, next_run, run_count, last_result, last_error,
                        notification_sink
                 FROM tasks WHERE id = ?1",
                params![id],
                row_to_task,
            )
            .optional()
            .context("failed to query task")
    }

    pub fn list(&self) -> Result<Vec<Task>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, name, description, schedule, prompt, status, created_at,
                        updated_at, last_run, next_run, run_count, last_result, last_error,
                        notification_sink
                 FROM tasks ORDER BY id",
            )
            .context("failed to prepare task list")?;
        let rows = stmt
            .query_map([], row_to_task)
            .context("failed to list tasks")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read task rows")
    }

    /// Active tasks with `next_run <= now`, soonest first.
    pub fn due(&self, now: DateTime<Utc>) -> Result<Vec<Task>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, name, description, schedule, prompt, status, created_at,
                        updated_at, last_run, next_run, run_count, last_result, last_error,
                        notification_sink
                 FROM tasks
                 WHERE status = 'active' AND next_run IS NOT NULL AND next_run <= ?1
                 ORDER BY next_run ASC",
            )
            .context("failed to prepare due query")?;
        let rows = stmt
            .query_map(params![now.timestamp()], row_to_task)
            .context("failed to query due tasks")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read due tasks")
    }

    /// Change status, recomputing `next_run` to keep the invariant.
    pub fn set_status(&self, id: i64, status: TaskStatus) -> Result<()> {
        let task = self
            .get(id)?
            .ok_or_else(|| anyhow::anyhow!("task {id} not found"))?;
        let next_run = match (status, task.schedule.as_deref()) {
            (TaskStatus::Active, Some(expr)) => next_run_after(expr, &Local::now())
                .map(|dt| dt.with_timezone(&Utc).timestamp()),
            _ => None,
        };
        self.conn
            .execute(
                "UPDATE tasks SET status = ?1, next_run = ?2, updated_at = ?3 WHERE id = ?4",
                params![status.as_str(), next_run, Utc::now().timestamp(), id],
            )
            .context("failed to update task status")?;
        Ok(())
    }

    pub fn delete(&self, id: i64) -> Result<bool> {
        self.conn
            .execute("DELETE FROM task_runs WHERE task_id = ?1", params![id])
            .context("failed to delete task runs")?;
        let rows = self
            .conn
            .execute("DELETE FROM tasks WHERE id = ?1", params![id])
            .context("failed to delete task")?;
        Ok(rows > 0)
    }

    /// Append a run row and fold its outcome back into the task: bump
    /// `run_count`, set `last_run`/`last_result`/`last_error`, recompute
    /// `next_run` from the schedule.
    pub fn record_run(
        &self,
        task: &Task,
        record: &RunRecord,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Result<()> {
        let status = if record.success { "success" } else { "failure" };
        self.conn
            .execute(
                "INSERT INTO task_runs
                     (task_id, started_at, finished_at, status, result, error, tokens_used)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    task.id,
                    started_at.timestamp(),
                    finished_at.timestamp(),
                    status,
                    record.result,
                    record.error,
                    record.tokens_used as i64,
                ],
            )
            .context("failed to insert task run")?;

        let next_run = task
            .schedule
            .as_deref()
            .and_then(|expr| next_run_after(expr, &Local::now()))
            .map(|dt| dt.with_timezone(&Utc).timestamp());

        self.conn
            .execute(
                "UPDATE tasks SET
                     last_run = ?1,
                     next_run = ?2,
                     run_count = run_count + 1,
                     last_result = ?3,
                     last_error = ?4,
                     updated_at = ?5
                 WHERE id = ?6",
                params![
                    finished_at.timestamp(),
                    next_run,
                    record.result,
                    record.error,
                    Utc::now().timestamp(),
                    task.id,
                ],
            )
            .context("failed to fold run into task")?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn conn_for_tests(&self) -> &Connection {
        &self.conn
    }

    pub fn runs(&self, task_id: i64) -> Result<Vec<TaskRun>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, task_id, started_at, finished_at, status, result, error, tokens_used
                 FROM task_runs WHERE task_id = ?1 ORDER BY id",
            )
            .context("failed to prepare runs query")?;
        let rows = stmt
            .query_map(params![task_id], |row| {
                Ok(TaskRun {
                    id: row.get(0)?,
                    task_id: row.get(1)?,
                    started_at: epoch(row.get(2)?),
                    finished_at: row.get::<_, Option<i64>>(3)?.map(epoch),
                    status: row.get(4)?,
                    result: row.get(5)?,
                    error: row.get(6)?,
                    tokens_used: row.get::<_, i64>(7)? as u64,
                })
            })
            .context("failed to query runs")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read run rows")
    }
}

fn epoch(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        schedule: row.get(3)?,
        prompt: row.get(4)?,
        status: TaskStatus::from_db_str(&row.get::<_, String>(5)?),
        created_at: epoch(row.get(6)?),
        updated_at: epoch(row.get(7)?),
        last_run: row.get::<_, Option<i64>>(8)?.map(epoch),
        next_run: row.get::<_, Option<i64>>(9)?.map(epoch),
        run_count: row.get::<_, i64>(10)? as u64,
        last_result: row.get(11)?,
        last_error: row.get(12)?,
        notification_sink: row.get(13)?,
    })
}
