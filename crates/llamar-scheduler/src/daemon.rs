//! The scheduler daemon: a step function that executes due tasks through
//! an injected runner, and an interval loop that keeps calling it.

use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use crate::notify::Sink;
use crate::store::{RunRecord, Task, TaskStore};

/// Executes one task (normally: hand the prompt to the LLM loop). The
/// runner is injected so the scheduler stays testable without a model.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run_task(&self, task: &Task) -> RunRecord;
}

/// One scheduler pass: run every due task, record its run, recompute its
/// `next_run`, and route the outcome to its sink. Returns how many tasks
/// ran.
pub async fn step(store: &Mutex<TaskStore>, runner: &dyn TaskRunner) -> Result<usize> {
    let due = {
        let store = store.lock().expect("task store lock poisoned");
        store.due(Utc::now())?
    };

    let mut executed = 0;
    for task in due {
        let started_at = Utc::now();
        info!(task = %task.name, id = task.id, "running scheduled task");
        let record = runner.run_task(&task).await;
        let finished_at = Utc::now();

        {
            let store = store.lock().expect("task store lock poisoned");
            store.record_run(&task, &record, started_at, finished_at)?;
        }

        if let Err(error) = Sink::parse(&task.notification_sink).notify(&task, &record) {
            warn!(task = %task.name, %error, "notification sink failed");
        }
        executed += 1;
    }
    Ok(executed)
}

/// Call `step` every `interval` until Ctrl-C.
pub async fn run_daemon(
    store: &Mutex<TaskStore>,
    runner: &dyn TaskRunner,
    interval: Duration,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("scheduler daemon interrupted");
                return Ok(());
            }
            _ = tokio::time::sleep(interval) => {
                if let Err(error) = step(store, runner).await {
                    warn!(%error, "scheduler step failed");
                }
            }
        }
    }
}
