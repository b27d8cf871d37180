//! The per-call execution context handed to every skill handler, and the
//! chat seam through which the (external) LLM client is reached.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use llamar_config::Config;
use llamar_memory::{ChunkIndex, MemoryStore};
use llamar_session::SessionStore;

/// Seam to the LLM client, which is an external collaborator. The server
/// itself wires a no-op; embedders (and subagent parents) provide a real
/// one.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(&self, message: &str) -> Result<String, String>;
}

/// Default backend for servers running without an LLM client.
pub struct NoopChat;

#[async_trait]
impl ChatBackend for NoopChat {
    async fn chat(&self, message: &str) -> Result<String, String> {
        let _ = message;
        Ok("No LLM client is wired to this server".to_string())
    }
}

/// Shared memory stores. The chunk index is a single-writer store: every
/// access serializes through this mutex.
pub struct MemoryResources {
    pub store: MemoryStore,
    pub index: Mutex<ChunkIndex>,
}

impl MemoryResources {
    pub fn new(store: MemoryStore, index: ChunkIndex) -> Self {
        Self {
            store,
            index: Mutex::new(index),
        }
    }
}

/// Everything a tool body may touch. Cloning is cheap; the JSON-RPC
/// handler clones the base context per call to stamp `approved_by` and
/// the turn counter.
#[derive(Clone)]
pub struct SkillContext {
    pub config: Arc<Config>,
    pub cwd: PathBuf,
    pub agent_id: String,
    pub session_id: Option<String>,
    pub turn: Option<u32>,
    /// Identity recorded in the trace when an `ask` gate approved the call.
    pub approved_by: Option<String>,
    pub sessions: Option<Arc<SessionStore>>,
    pub memory: Option<Arc<MemoryResources>>,
    pub chat: Arc<dyn ChatBackend>,
}

impl SkillContext {
    /// Minimal context for embedding and tests: config + cwd, no session,
    /// no memory, no-op chat.
    pub fn bare(config: Arc<Config>, cwd: PathBuf) -> Self {
        Self {
            config,
            cwd,
            agent_id: "main".to_string(),
            session_id: None,
            turn: None,
            approved_by: None,
            sessions: None,
            memory: None,
            chat: Arc::new(NoopChat),
        }
    }

    pub fn with_session(mut self, session_id: &str, sessions: Arc<SessionStore>) -> Self {
        self.session_id = Some(session_id.to_string());
        self.sessions = Some(sessions);
        self
    }

    pub fn with_memory(mut self, memory: Arc<MemoryResources>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_chat(mut self, chat: Arc<dyn ChatBackend>) -> Self {
        self.chat = chat;
        self
    }
}
