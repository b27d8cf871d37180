//! The llamar tool server binary.
//!
//! With no port argument the server speaks MCP over stdio; with a port it
//! binds a TCP listener. Either way the wiring is the same: resolve
//! config, build the skill registry (built-ins, user skills, subagent
//! skills), mint this run's session, then pump requests.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use tracing::{info, warn};

use llamar_config::{paths, Config};
use llamar_core::logging::init_logging;
use llamar_limits::RateLimiter;
use llamar_memory::{ChunkIndex, MemoryStore};
use llamar_rpc::{socket, stdio, RpcHandler};
use llamar_scheduler::{run_daemon, RunRecord, Task, TaskRunner, TaskStore};
use llamar_session::SessionStore;
use llamar_skills::skill_file::register_skill_files;
use llamar_skills::tools::register_builtins;
use llamar_skills::{ChatBackend, MemoryResources, NoopChat, SkillContext, SkillRegistry};
use llamar_subagent::{register_subagent_skills, Supervisor};

const SCHEDULER_INTERVAL: Duration = Duration::from_secs(60);
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Parser)]
#[command(name = "llamar", version, about = "llamar MCP tool server")]
struct Args {
    /// TCP port to listen on; stdio transport when omitted
    port: Option<u16>,

    /// Working directory for tool execution (defaults to the current one)
    cwd: Option<PathBuf>,

    /// Agent identity under ~/.llamar/agents
    #[arg(long, default_value = "main")]
    agent_id: String,

    /// Mark this process as a subagent (gates nested spawning)
    #[arg(long)]
    subagent: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let cwd = match args.cwd {
        Some(cwd) => cwd,
        None => std::env::current_dir().context("failed to resolve working directory")?,
    };
    let config = Arc::new(Config::resolve(&cwd));

    let sessions = Arc::new(SessionStore::new(paths::sessions_dir(&args.agent_id)));
    let session = sessions
        .new_session(&config.provider, &config.model, &cwd.to_string_lossy())
        .context("failed to mint server session")?;
    info!(session_key = %session.session_key, "server session created");

    let memory = Arc::new(MemoryResources::new(
        MemoryStore::new(
            paths::global_memory_path(),
            paths::project_memory_path(&cwd),
            paths::memory_dir(),
        ),
        ChunkIndex::open(&paths::memory_dir().join(format!("{}.sqlite", args.agent_id)))
            .context("failed to open chunk index")?,
    ));

    // The LLM client itself is external; the chat seam here wraps whatever
    // backend is wired (a no-op by default) with the rate limiter.
    let chat: Arc<dyn ChatBackend> = Arc::new(RateLimitedChat {
        inner: Arc::new(NoopChat),
        limiter: Mutex::new(RateLimiter::new()),
        config: config.clone(),
    });

    let mut ctx = SkillContext::bare(config.clone(), cwd.clone())
        .with_session(&session.session_id, sessions.clone())
        .with_memory(memory);
    ctx = ctx.with_chat(chat.clone());
    ctx.agent_id = args.agent_id.clone();

    let supervisor = Arc::new(Supervisor::new(
        config.clone(),
        sessions.clone(),
        cwd.clone(),
        args.subagent,
    ));

    let mut registry = SkillRegistry::new();
    register_builtins(&mut registry).context("failed to register built-in skills")?;
    register_subagent_skills(&mut registry, supervisor.clone())
        .context("failed to register subagent skills")?;
    register_skill_files(&mut registry, &paths::skills_dir());
    let registry = Arc::new(registry);
    info!(skills = registry.names().len(), "skill registry built");

    spawn_scheduler(chat);
    {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.sweep_loop(SWEEP_INTERVAL).await });
    }

    let handler = Arc::new(RpcHandler::new(registry, ctx));
    match args.port {
        Some(port) => {
            let listener = socket::bind(port).await?;
            socket::serve(listener, handler).await
        }
        None => stdio::serve(handler).await,
    }
}

/// Scheduler wiring: due tasks hand their prompt to the chat seam.
fn spawn_scheduler(chat: Arc<dyn ChatBackend>) {
    let store = match TaskStore::open(&paths::workspace_dir().join("tasks.sqlite")) {
        Ok(store) => store,
        Err(error) => {
            warn!(%error, "task store unavailable; scheduler disabled");
            return;
        }
    };
    let store = Mutex::new(store);
    let runner = ChatTaskRunner { chat };
    tokio::spawn(async move {
        if let Err(error) = run_daemon(&store, &runner, SCHEDULER_INTERVAL).await {
            warn!(%error, "scheduler daemon exited");
        }
    });
}

/// Consults the per-provider windows before every LLM call and records
/// usage afterwards.
struct RateLimitedChat {
    inner: Arc<dyn ChatBackend>,
    limiter: Mutex<RateLimiter>,
    config: Arc<Config>,
}

impl RateLimitedChat {
    /// Rough pre-call token estimate; real usage comes back from the
    /// provider and is tracked by the embedding client.
    fn estimate_tokens(message: &str) -> u64 {
        (message.len() as u64 / 4).max(1)
    }
}

#[async_trait]
impl ChatBackend for RateLimitedChat {
    async fn chat(&self, message: &str) -> std::result::Result<String, String> {
        let provider = self.config.provider.as_str();
        let limits = self.config.rate_limits.get(provider);
        let est_tokens = Self::estimate_tokens(message);

        let verdict = {
            let mut limiter = self.limiter.lock().expect("rate limiter lock poisoned");
            limiter.check(provider, est_tokens, limits)
        };
        if !verdict.ok {
            return Err(verdict
                .message
                .unwrap_or_else(|| "Rate limit exceeded".to_string()));
        }
        if let Some(warning) = verdict.warning {
            warn!(provider, %warning, "token budget warning");
        }

        let reply = self.inner.chat(message).await?;
        {
            let mut limiter = self.limiter.lock().expect("rate limiter lock poisoned");
            limiter.track(provider, est_tokens, 1);
        }
        Ok(reply)
    }
}

struct ChatTaskRunner {
    chat: Arc<dyn ChatBackend>,
}

#[async_trait]
impl TaskRunner for ChatTaskRunner {
    async fn run_task(&self, task: &Task) -> RunRecord {
        match self.chat.chat(&task.prompt).await {
            Ok(result) => RunRecord {
                success: true,
                result: Some(result),
                error: None,
                tokens_used: 0,
            },
            Err(error) => RunRecord {
                success: false,
                result: None,
                error: Some(error),
                tokens_used: 0,
            },
        }
    }
}
