//! User skill files: `~/.llamar/skills/<name>/SKILL.md`.
//!
//! Front matter is optional and YAML-ish: `---` delimited lines with
//! `name`, `description`, and `metadata` (JSON on the same line). Body
//! text may reference `{baseDir}`, substituted with the skill directory
//! at load time. Files without front matter take their name from the
//! enclosing directory or the file stem.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use llamar_core::ToolResult;

use crate::context::SkillContext;
use crate::registry::{Skill, SkillHandler, SkillRegistry};
use crate::spec::SkillSpec;

#[derive(Debug, Clone)]
pub struct LoadedSkill {
    pub name: String,
    pub description: String,
    pub metadata: Option<Value>,
    pub body: String,
}

/// Parse one SKILL.md file.
pub fn load_skill_file(path: &Path) -> Result<LoadedSkill> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read skill file: {}", path.display()))?;

    let base_dir = path
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    let fallback_name = derive_name(path);

    let (front, body) = split_front_matter(&raw);
    let body = body.replace("{baseDir}", &base_dir);

    let mut name = fallback_name;
    let mut description = String::new();
    let mut metadata = None;

    if let Some(front) = front {
        for line in front.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "name" if !value.is_empty() => name = value.to_string(),
                "description" => description = value.to_string(),
                "metadata" => match serde_json::from_str(value) {
                    Ok(parsed) => metadata = Some(parsed),
                    Err(error) => {
                        warn!(path = %path.display(), %error, "skill metadata is not valid JSON");
                    }
                },
                _ => {}
            }
        }
    }

    if description.is_empty() {
        description = format!("User skill '{name}'");
    }

    Ok(LoadedSkill {
        name,
        description,
        metadata,
        body: body.trim().to_string(),
    })
}

/// The enclosing directory name for `<name>/SKILL.md`, else the file stem.
fn derive_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "skill".to_string());
    if stem.eq_ignore_ascii_case("skill")
        && let Some(dir_name) = path.parent().and_then(|p| p.file_name())
    {
        return dir_name.to_string_lossy().into_owned();
    }
    stem
}

fn split_front_matter(raw: &str) -> (Option<&str>, &str) {
    let trimmed = raw.trim_start_matches(['\u{feff}']);
    let Some(rest) = trimmed.strip_prefix("---") else {
        return (None, raw);
    };
    let Some(rest) = rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n")) else {
        return (None, raw);
    };
    match rest.find("\n---") {
        Some(end) => {
            let front = &rest[..end];
            let body = rest[end + 4..].trim_start_matches(['-']).trim_start();
            (Some(front), body)
        }
        None => (None, raw),
    }
}

/// Scan a skills directory and register every loadable skill as a
/// prompt-text tool. Unreadable files are logged and skipped; a bad user
/// skill never blocks startup.
pub fn register_skill_files(registry: &mut SkillRegistry, skills_dir: &Path) {
    let Ok(entries) = std::fs::read_dir(skills_dir) else {
        return;
    };

    for entry in entries.flatten() {
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        let file = dir.join("SKILL.md");
        if !file.is_file() {
            continue;
        }
        match load_skill_file(&file) {
            Ok(loaded) => {
                let skill = Skill::new(
                    SkillSpec::new(&loaded.name, &loaded.description, vec![]),
                    Arc::new(PromptSkill { body: loaded.body }),
                );
                if let Err(error) = registry.register(skill) {
                    warn!(path = %file.display(), %error, "skipping user skill");
                }
            }
            Err(error) => {
                warn!(path = %file.display(), %error, "failed to load user skill");
            }
        }
    }
}

/// A skill whose invocation returns its (substituted) body text.
struct PromptSkill {
    body: String,
}

#[async_trait]
impl SkillHandler for PromptSkill {
    async fn call(&self, _args: &Value, _ctx: &SkillContext) -> anyhow::Result<ToolResult> {
        Ok(ToolResult::ok(self.body.clone()))
    }
}
