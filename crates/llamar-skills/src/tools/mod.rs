//! Built-in tool bodies. Every handler returns the Ok/Error envelope;
//! shell-like tools surface child failures as Ok text beginning with
//! `"Error:"` so the model sees them as conversation, not protocol.

pub mod chat;
pub mod fs;
pub mod git;
pub mod memory;
pub mod script;
pub mod shell;

use anyhow::Result;

use crate::registry::SkillRegistry;

/// Register the built-in tool set. Called once at startup, before user
/// skill files are mounted.
pub fn register_builtins(registry: &mut SkillRegistry) -> Result<()> {
    registry.register(fs::read_file_skill())?;
    registry.register(fs::write_file_skill())?;
    registry.register(fs::list_files_skill())?;
    registry.register(fs::grep_files_skill())?;
    registry.register(shell::bash_skill())?;
    registry.register(script::run_r_skill())?;
    registry.register(git::git_status_skill())?;
    registry.register(git::git_diff_skill())?;
    registry.register(git::git_log_skill())?;
    registry.register(memory::memory_store_skill())?;
    registry.register(memory::memory_search_skill())?;
    registry.register(memory::memory_index_skill())?;
    registry.register(memory::memory_query_skill())?;
    registry.register(chat::chat_skill())?;
    Ok(())
}
