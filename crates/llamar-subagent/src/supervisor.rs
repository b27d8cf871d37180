//! The subagent supervisor: spawn policy, the live in-memory registry,
//! MCP queries against children, and expiry reaping.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use llamar_config::Config;
use llamar_core::AppError;
use llamar_session::SessionStore;

use crate::client::McpClient;

const SPAWN_READY_ATTEMPTS: u32 = 50;
const SPAWN_READY_DELAY: Duration = Duration::from_millis(100);

/// Public view of one live subagent.
#[derive(Debug, Clone, Serialize)]
pub struct SubagentRecord {
    pub id: String,
    pub session_key: String,
    pub port: u16,
    pub task: String,
    pub started_at: DateTime<Utc>,
    pub timeout_minutes: u64,
}

impl SubagentRecord {
    fn expired(&self, now: DateTime<Utc>) -> bool {
        let age = now - self.started_at;
        age.num_minutes() >= self.timeout_minutes as i64
    }
}

struct LiveSubagent {
    record: SubagentRecord,
    child: Option<Child>,
}

/// Builds the child command for a given port and working directory. The
/// default factory re-executes this server binary; tests substitute their
/// own.
pub type CommandFactory = dyn Fn(u16, &Path) -> Command + Send + Sync;

pub struct Supervisor {
    config: Arc<Config>,
    sessions: Arc<SessionStore>,
    cwd: PathBuf,
    /// True when this server is itself a subagent (gates `allow_nested`).
    is_subagent: bool,
    command_factory: Box<CommandFactory>,
    live: Mutex<HashMap<String, LiveSubagent>>,
}

impl Supervisor {
    pub fn new(
        config: Arc<Config>,
        sessions: Arc<SessionStore>,
        cwd: PathBuf,
        is_subagent: bool,
    ) -> Self {
        Self {
            config,
            sessions,
            cwd,
            is_subagent,
            command_factory: Box::new(default_command),
            live: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_command_factory(mut self, factory: Box<CommandFactory>) -> Self {
        self.command_factory = factory;
        self
    }

    /// Spawn a child tool server for `task`. Policy first, then port
    /// probe, then process start and readiness wait.
    ///
    /// The `live` lock is only held for the bookkeeping at either end;
    /// the process spawn and the readiness poll run unlocked so queries,
    /// kills, and the cleanup sweep on other subagents are never starved
    /// behind a slow start.
    pub async fn spawn(&self, task: &str) -> Result<SubagentRecord> {
        let policy = &self.config.subagents;
        if !policy.enabled {
            return Err(AppError::SubagentsDisabled.into());
        }
        if self.is_subagent && !policy.allow_nested {
            return Err(AppError::NestedSubagent.into());
        }

        let port = {
            let live = self.live.lock().await;
            let active = live.len() as u32;
            if active >= policy.max_concurrent {
                return Err(AppError::SubagentLimit(active).into());
            }
            let used_ports: Vec<u16> = live.values().map(|agent| agent.record.port).collect();
            probe_free_port(policy.base_port, &used_ports).context("no free port for subagent")?
        };

        let id = Uuid::new_v4().simple().to_string();
        let session_key = format!("agent:main:subagent:{id}");

        // Session record travels starting -> running -> completed.
        let mut session = self.sessions.new_session_with_key(
            &self.config.provider,
            &self.config.model,
            &self.cwd.to_string_lossy(),
            Some(session_key.clone()),
        )?;
        session.status = Some("starting".to_string());
        self.sessions.save(&session)?;

        let mut command = (self.command_factory)(port, &self.cwd);
        let mut child = command
            .kill_on_drop(true)
            .spawn()
            .context("failed to spawn subagent process")?;

        if let Err(error) = wait_until_ready(port).await {
            session.status = Some("completed".to_string());
            let _ = self.sessions.save(&session);
            return Err(error);
        }

        session.status = Some("running".to_string());
        self.sessions.save(&session)?;

        let record = SubagentRecord {
            id: id.clone(),
            session_key: session_key.clone(),
            port,
            task: task.to_string(),
            started_at: Utc::now(),
            timeout_minutes: policy.timeout_minutes,
        };

        // Re-acquire briefly to insert. The lock was released across the
        // spawn, so the policy is re-checked before the record lands.
        {
            let mut live = self.live.lock().await;
            let active = live.len() as u32;
            if active >= policy.max_concurrent {
                let _ = child.start_kill();
                self.mark_completed(&session_key);
                return Err(AppError::SubagentLimit(active).into());
            }
            if live.values().any(|agent| agent.record.port == port) {
                let _ = child.start_kill();
                self.mark_completed(&session_key);
                anyhow::bail!("port {port} was claimed by a concurrent spawn");
            }
            live.insert(
                id.clone(),
                LiveSubagent {
                    record: record.clone(),
                    child: Some(child),
                },
            );
        }
        info!(%id, port, task, "subagent started");
        Ok(record)
    }

    /// Ask a child a question through its `chat` tool. Expired subagents
    /// are reaped eagerly on the way in.
    pub async fn query(&self, id: &str, message: &str) -> Result<String> {
        self.reap_expired().await;

        let port = {
            let live = self.live.lock().await;
            let agent = live
                .get(id)
                .ok_or_else(|| anyhow::anyhow!("Subagent '{id}' not found"))?;
            agent.record.port
        };

        let mut client = McpClient::connect(port).await?;
        client.initialize().await?;
        client
            .call_tool("chat", serde_json::json!({"message": message}))
            .await
    }

    /// Stop a child and drop its record.
    pub async fn kill(&self, id: &str) -> Result<bool> {
        let mut live = self.live.lock().await;
        let Some(mut agent) = live.remove(id) else {
            return Ok(false);
        };
        if let Some(child) = agent.child.as_mut() {
            if let Err(error) = child.kill().await {
                warn!(id, %error, "failed to kill subagent process");
            }
        }
        self.mark_completed(&agent.record.session_key);
        info!(id, "subagent stopped");
        Ok(true)
    }

    /// Remove every record past its timeout. Returns the reaped ids.
    pub async fn reap_expired(&self) -> Vec<String> {
        let now = Utc::now();
        let mut live = self.live.lock().await;
        let expired: Vec<String> = live
            .iter()
            .filter(|(_, agent)| agent.record.expired(now))
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            if let Some(mut agent) = live.remove(id) {
                if let Some(child) = agent.child.as_mut() {
                    let _ = child.start_kill();
                }
                self.mark_completed(&agent.record.session_key);
                warn!(%id, "subagent expired and was reaped");
            }
        }
        expired
    }

    /// Lazy cleanup sweep, hosted on its own worker by the server.
    pub async fn sweep_loop(&self, interval: Duration) {
        loop {
            tokio::time::sleep(interval).await;
            self.reap_expired().await;
        }
    }

    pub async fn list(&self) -> Vec<SubagentRecord> {
        let live = self.live.lock().await;
        let mut records: Vec<SubagentRecord> =
            live.values().map(|agent| agent.record.clone()).collect();
        records.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        records
    }

    pub async fn active_count(&self) -> usize {
        self.live.lock().await.len()
    }

    fn mark_completed(&self, session_key: &str) {
        match self.sessions.load(session_key, false) {
            Ok(mut session) => {
                session.status = Some("completed".to_string());
                if let Err(error) = self.sessions.save(&session) {
                    warn!(session_key, %error, "failed to mark subagent session completed");
                }
            }
            Err(error) => warn!(session_key, %error, "failed to load subagent session"),
        }
    }

    #[cfg(test)]
    pub(crate) async fn insert_for_tests(&self, record: SubagentRecord) {
        self.live.lock().await.insert(
            record.id.clone(),
            LiveSubagent {
                record,
                child: None,
            },
        );
    }
}

fn default_command(port: u16, cwd: &Path) -> Command {
    let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("llamar"));
    let mut command = Command::new(exe);
    command
        .arg(port.to_string())
        .arg(cwd)
        .arg("--subagent")
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());
    command
}

/// Find a bindable port at or above `base`, skipping ports already held
/// by live records.
fn probe_free_port(base: u16, used: &[u16]) -> Option<u16> {
    for port in base..base.checked_add(100)? {
        if used.contains(&port) {
            continue;
        }
        if std::net::TcpListener::bind(("127.0.0.1", port)).is_ok() {
            return Some(port);
        }
    }
    None
}

/// Poll until the child accepts connections.
async fn wait_until_ready(port: u16) -> Result<()> {
    for _ in 0..SPAWN_READY_ATTEMPTS {
        if tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            return Ok(());
        }
        tokio::time::sleep(SPAWN_READY_DELAY).await;
    }
    anyhow::bail!("subagent on port {port} never became ready")
}
