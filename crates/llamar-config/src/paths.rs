//! Filesystem layout under `~/.llamar` and `<cwd>/.llamar`.

use std::path::{Path, PathBuf};

pub const APP_DIR_NAME: &str = ".llamar";

fn home_dir() -> PathBuf {
    if let Some(base_dirs) = directories::BaseDirs::new() {
        return base_dirs.home_dir().to_path_buf();
    }
    std::env::temp_dir()
}

/// `~/.llamar`
pub fn llamar_home() -> PathBuf {
    home_dir().join(APP_DIR_NAME)
}

/// `~/.llamar/config.json`
pub fn global_config_path() -> PathBuf {
    llamar_home().join("config.json")
}

/// `<cwd>/.llamar/config.json`
pub fn project_config_path(cwd: &Path) -> PathBuf {
    cwd.join(APP_DIR_NAME).join("config.json")
}

/// `~/.llamar/workspace`
pub fn workspace_dir() -> PathBuf {
    llamar_home().join("workspace")
}

/// `~/.llamar/workspace/memory`
pub fn memory_dir() -> PathBuf {
    workspace_dir().join("memory")
}

/// `~/.llamar/agents/<agent_id>/sessions`
pub fn sessions_dir(agent_id: &str) -> PathBuf {
    llamar_home().join("agents").join(agent_id).join("sessions")
}

/// `~/.llamar/skills`
pub fn skills_dir() -> PathBuf {
    llamar_home().join("skills")
}

/// `<cwd>/.llamar/MEMORY.md`
pub fn project_memory_path(cwd: &Path) -> PathBuf {
    cwd.join(APP_DIR_NAME).join("MEMORY.md")
}

/// `~/.llamar/workspace/MEMORY.md`
pub fn global_memory_path() -> PathBuf {
    workspace_dir().join("MEMORY.md")
}
