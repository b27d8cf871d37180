//! The merged configuration structure and its resolver.
//!
//! Two files participate: `~/.llamar/config.json` (global) and
//! `<cwd>/.llamar/config.json` (project). Each file that parses cleanly
//! contributes a JSON object; the two are shallow-merged with project
//! precedence, then defaults fill any missing key. Malformed JSON is
//! replaced with an empty object after a warning; resolution never aborts
//! startup.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMode {
    Allow,
    Ask,
    Deny,
}

impl Default for ApprovalMode {
    fn default() -> Self {
        Self::Ask
    }
}

impl std::fmt::Display for ApprovalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Allow => "allow",
            Self::Ask => "ask",
            Self::Deny => "deny",
        };
        f.write_str(s)
    }
}

/// Windowed caps for one provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_per_hour: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_minute: Option<u64>,
}

/// Child-process policy for subagents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubagentConfig {
    #[serde(default = "default_subagents_enabled")]
    pub enabled: bool,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u64,
    #[serde(default)]
    pub allow_nested: bool,
    #[serde(default)]
    pub default_tools: Vec<String>,
    #[serde(default = "default_base_port")]
    pub base_port: u16,
}

fn default_subagents_enabled() -> bool {
    true
}
fn default_max_concurrent() -> u32 {
    3
}
fn default_timeout_minutes() -> u64 {
    30
}
fn default_base_port() -> u16 {
    8700
}

impl Default for SubagentConfig {
    fn default() -> Self {
        Self {
            enabled: default_subagents_enabled(),
            max_concurrent: default_max_concurrent(),
            timeout_minutes: default_timeout_minutes(),
            allow_nested: false,
            default_tools: Vec::new(),
            base_port: default_base_port(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,

    /// Ordered list of filenames looked up in the project root for context.
    #[serde(default = "default_context_files")]
    pub context_files: Vec<String>,

    /// Default gate for tools listed in `dangerous_tools`.
    #[serde(default)]
    pub approval_mode: ApprovalMode,

    #[serde(default = "default_dangerous_tools")]
    pub dangerous_tools: Vec<String>,

    /// Per-tool override of the default gate.
    #[serde(default)]
    pub permissions: HashMap<String, ApprovalMode>,

    /// If non-empty, filesystem access must lie under one entry.
    #[serde(default)]
    pub allowed_paths: Vec<String>,

    /// Always-forbidden prefixes; precedence over `allowed_paths`.
    #[serde(default)]
    pub denied_paths: Vec<String>,

    /// Default per-call timeout in seconds.
    #[serde(default = "default_skill_timeout")]
    pub skill_timeout: u64,

    /// When true, skills are validated but not executed.
    #[serde(default)]
    pub dry_run: bool,

    /// Per-provider windowed caps, keyed by provider name.
    #[serde(default)]
    pub rate_limits: BTreeMap<String, RateLimitConfig>,

    #[serde(default)]
    pub subagents: SubagentConfig,

    #[serde(default = "default_context_warn_pct")]
    pub context_warn_pct: u8,
    #[serde(default = "default_context_high_pct")]
    pub context_high_pct: u8,
    #[serde(default = "default_context_crit_pct")]
    pub context_crit_pct: u8,
    #[serde(default = "default_context_compact_pct")]
    pub context_compact_pct: u8,
}

fn default_provider() -> String {
    "anthropic".to_string()
}
fn default_model() -> String {
    "claude-sonnet-4-5".to_string()
}
fn default_context_files() -> Vec<String> {
    vec!["LLAMAR.md".to_string(), "README.md".to_string()]
}
fn default_dangerous_tools() -> Vec<String> {
    vec!["bash".to_string(), "write_file".to_string()]
}
fn default_skill_timeout() -> u64 {
    60
}
fn default_context_warn_pct() -> u8 {
    60
}
fn default_context_high_pct() -> u8 {
    75
}
fn default_context_crit_pct() -> u8 {
    90
}
fn default_context_compact_pct() -> u8 {
    85
}

impl Default for Config {
    fn default() -> Self {
        // An empty object deserializes into the full default set.
        serde_json::from_value(Value::Object(serde_json::Map::new()))
            .expect("defaults must deserialize")
    }
}

impl Config {
    /// Resolve from the standard locations for `cwd`.
    pub fn resolve(cwd: &Path) -> Self {
        Self::resolve_from(&crate::paths::global_config_path(), &crate::paths::project_config_path(cwd))
    }

    /// Resolve from explicit file paths. Pure: same file contents, same result.
    pub fn resolve_from(global_path: &Path, project_path: &Path) -> Self {
        let global = read_config_object(global_path);
        let project = read_config_object(project_path);
        let merged = shallow_merge(global, project);
        match serde_json::from_value(Value::Object(merged)) {
            Ok(config) => config,
            Err(error) => {
                warn!(%error, "merged config did not match the schema; using defaults");
                Self::default()
            }
        }
    }

    /// Re-read both files; callers swap their `Arc<Config>` with the result.
    pub fn reload(cwd: &Path) -> Self {
        Self::resolve(cwd)
    }

    /// Explicit per-tool permission, if configured.
    pub fn permission_override(&self, tool: &str) -> Option<ApprovalMode> {
        self.permissions.get(tool).copied()
    }

    pub fn is_dangerous(&self, tool: &str) -> bool {
        self.dangerous_tools.iter().any(|name| name == tool)
    }
}

/// Read one config file into a JSON object. Missing files and malformed
/// JSON both contribute an empty object; only the latter is worth a warning.
fn read_config_object(path: &Path) -> serde_json::Map<String, Value> {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return serde_json::Map::new();
    };

    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            warn!(path = %path.display(), "config root is not a JSON object; ignoring");
            serde_json::Map::new()
        }
        Err(error) => {
            warn!(path = %path.display(), %error, "malformed config JSON; ignoring");
            serde_json::Map::new()
        }
    }
}

/// Shallow merge: project wins per top-level key.
fn shallow_merge(
    global: serde_json::Map<String, Value>,
    project: serde_json::Map<String, Value>,
) -> serde_json::Map<String, Value> {
    let mut merged = global;
    for (key, value) in project {
        merged.insert(key, value);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_defaults_when_no_files() {
        let temp = tempdir().unwrap();
        let config = Config::resolve_from(
            &temp.path().join("missing-global.json"),
            &temp.path().join("missing-project.json"),
        );
        assert_eq!(config.approval_mode, ApprovalMode::Ask);
        assert_eq!(config.skill_timeout, 60);
        assert!(!config.dry_run);
        assert!(config.subagents.enabled);
        assert_eq!(config.subagents.max_concurrent, 3);
    }

    #[test]
    fn test_project_wins_per_key() {
        let temp = tempdir().unwrap();
        let global = temp.path().join("global/config.json");
        let project = temp.path().join("project/config.json");
        write(&global, r#"{"provider":"anthropic","skill_timeout":10}"#);
        write(&project, r#"{"skill_timeout":120}"#);

        let config = Config::resolve_from(&global, &project);
        assert_eq!(config.provider, "anthropic");
        assert_eq!(config.skill_timeout, 120);
    }

    #[test]
    fn test_shallow_merge_replaces_whole_nested_value() {
        let temp = tempdir().unwrap();
        let global = temp.path().join("g.json");
        let project = temp.path().join("p.json");
        write(
            &global,
            r#"{"permissions":{"bash":"deny","write_file":"ask"}}"#,
        );
        write(&project, r#"{"permissions":{"bash":"allow"}}"#);

        let config = Config::resolve_from(&global, &project);
        assert_eq!(config.permission_override("bash"), Some(ApprovalMode::Allow));
        // Shallow merge: the global write_file entry is gone with its object.
        assert_eq!(config.permission_override("write_file"), None);
    }

    #[test]
    fn test_malformed_global_ignored() {
        let temp = tempdir().unwrap();
        let global = temp.path().join("g.json");
        let project = temp.path().join("p.json");
        write(&global, "{ not json at all");
        write(&project, r#"{"dry_run":true}"#);

        let config = Config::resolve_from(&global, &project);
        assert!(config.dry_run);
        assert_eq!(config.provider, "anthropic");
    }

    #[test]
    fn test_non_object_root_ignored() {
        let temp = tempdir().unwrap();
        let global = temp.path().join("g.json");
        write(&global, r#"["a","b"]"#);

        let config = Config::resolve_from(&global, &temp.path().join("missing.json"));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_rate_limits_parse() {
        let temp = tempdir().unwrap();
        let project = temp.path().join("p.json");
        write(
            &project,
            r#"{"rate_limits":{"anthropic":{"tokens_per_hour":100000,"requests_per_minute":50}}}"#,
        );

        let config = Config::resolve_from(&temp.path().join("missing.json"), &project);
        let limits = config.rate_limits.get("anthropic").unwrap();
        assert_eq!(limits.tokens_per_hour, Some(100_000));
        assert_eq!(limits.requests_per_minute, Some(50));
    }

    #[test]
    fn test_resolution_is_pure() {
        let temp = tempdir().unwrap();
        let global = temp.path().join("g.json");
        write(&global, r#"{"model":"claude-sonnet-4-5","dangerous_tools":["bash"]}"#);
        let missing = temp.path().join("missing.json");

        let first = Config::resolve_from(&global, &missing);
        let second = Config::resolve_from(&global, &missing);
        assert_eq!(first, second);
    }

    #[test]
    fn test_is_dangerous_uses_configured_list() {
        let temp = tempdir().unwrap();
        let project = temp.path().join("p.json");
        write(&project, r#"{"dangerous_tools":["run_r"]}"#);

        let config = Config::resolve_from(&temp.path().join("missing.json"), &project);
        assert!(config.is_dangerous("run_r"));
        assert!(!config.is_dangerous("bash"));
    }
}
