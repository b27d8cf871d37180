//! Filesystem tools: read, write, list, grep. All of them run their
//! target through the path sandbox before touching disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use glob::Pattern;
use serde_json::Value;
use walkdir::WalkDir;

use llamar_core::ToolResult;
use llamar_sandbox::paths::{normalize, validate_path};

use crate::context::SkillContext;
use crate::registry::{Skill, SkillHandler};
use crate::spec::{ParamSpec, ParamType, SkillSpec};

const GREP_MATCH_CAP: usize = 500;

fn checked_path(raw: &str, ctx: &SkillContext, op: &str) -> Result<PathBuf, ToolResult> {
    let check = validate_path(raw, &ctx.config, &ctx.cwd, op);
    if !check.ok {
        return Err(ToolResult::error(check.message));
    }
    Ok(normalize(raw, &ctx.cwd))
}

// ── read_file ────────────────────────────────────────────────────────

pub fn read_file_skill() -> Skill {
    Skill::new(
        SkillSpec::new(
            "read_file",
            "Read a text file, optionally limited to the first N lines",
            vec![
                ParamSpec::new("path", ParamType::String, "Path to the file", true),
                ParamSpec::new("lines", ParamType::Integer, "Return only the first N lines", false),
            ],
        ),
        Arc::new(ReadFile),
    )
}

struct ReadFile;

#[async_trait]
impl SkillHandler for ReadFile {
    async fn call(&self, args: &Value, ctx: &SkillContext) -> anyhow::Result<ToolResult> {
        let raw = args.get("path").and_then(Value::as_str).unwrap_or_default();
        let path = match checked_path(raw, ctx, "read") {
            Ok(path) => path,
            Err(refusal) => return Ok(refusal),
        };

        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(_) => return Ok(ToolResult::error(format!("File not found: {}", path.display()))),
        };

        let limit = args.get("lines").and_then(Value::as_u64);
        let text = match limit {
            Some(n) => contents
                .lines()
                .take(n as usize)
                .collect::<Vec<_>>()
                .join("\n"),
            None => contents,
        };
        Ok(ToolResult::ok(text))
    }
}

// ── write_file ───────────────────────────────────────────────────────

pub fn write_file_skill() -> Skill {
    Skill::new(
        SkillSpec::new(
            "write_file",
            "Replace a file's contents; reports the byte count written",
            vec![
                ParamSpec::new("path", ParamType::String, "Path to the file", true),
                ParamSpec::new("content", ParamType::String, "Full new contents", true),
            ],
        ),
        Arc::new(WriteFile),
    )
}

struct WriteFile;

#[async_trait]
impl SkillHandler for WriteFile {
    async fn call(&self, args: &Value, ctx: &SkillContext) -> anyhow::Result<ToolResult> {
        let raw = args.get("path").and_then(Value::as_str).unwrap_or_default();
        let content = args.get("content").and_then(Value::as_str).unwrap_or_default();
        let path = match checked_path(raw, ctx, "write") {
            Ok(path) => path,
            Err(refusal) => return Ok(refusal),
        };

        if let Some(parent) = path.parent() {
            if let Err(error) = tokio::fs::create_dir_all(parent).await {
                return Ok(ToolResult::error(format!(
                    "Cannot create {}: {error}",
                    parent.display()
                )));
            }
        }
        match tokio::fs::write(&path, content).await {
            Ok(()) => Ok(ToolResult::ok(format!(
                "Wrote {} bytes to {}",
                content.len(),
                path.display()
            ))),
            Err(error) => Ok(ToolResult::error(format!(
                "Cannot write {}: {error}",
                path.display()
            ))),
        }
    }
}

// ── list_files ───────────────────────────────────────────────────────

pub fn list_files_skill() -> Skill {
    Skill::new(
        SkillSpec::new(
            "list_files",
            "List files in a directory, optionally filtered by a glob pattern",
            vec![
                ParamSpec::new("path", ParamType::String, "Directory (defaults to the working directory)", false),
                ParamSpec::new("pattern", ParamType::String, "Glob filter on file names, e.g. *.R", false),
                ParamSpec::new("recursive", ParamType::Boolean, "Descend into subdirectories", false),
            ],
        ),
        Arc::new(ListFiles),
    )
}

struct ListFiles;

#[async_trait]
impl SkillHandler for ListFiles {
    async fn call(&self, args: &Value, ctx: &SkillContext) -> anyhow::Result<ToolResult> {
        let raw = args
            .get("path")
            .and_then(Value::as_str)
            .unwrap_or(".")
            .to_string();
        let dir = match checked_path(&raw, ctx, "list") {
            Ok(dir) => dir,
            Err(refusal) => return Ok(refusal),
        };

        let pattern = match args.get("pattern").and_then(Value::as_str) {
            Some(text) => match Pattern::new(text) {
                Ok(pattern) => Some(pattern),
                Err(error) => {
                    return Ok(ToolResult::error(format!("Invalid pattern '{text}': {error}")))
                }
            },
            None => None,
        };
        let recursive = args.get("recursive").and_then(Value::as_bool).unwrap_or(false);

        let names = collect_names(&dir, pattern.as_ref(), recursive);
        if names.is_empty() {
            return Ok(ToolResult::ok("No files found"));
        }
        Ok(ToolResult::ok(names.join("\n")))
    }
}

fn collect_names(dir: &Path, pattern: Option<&Pattern>, recursive: bool) -> Vec<String> {
    let depth = if recursive { usize::MAX } else { 1 };
    let mut names: Vec<String> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(depth)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            pattern.is_none_or(|p| p.matches(&entry.file_name().to_string_lossy()))
        })
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(dir)
                .ok()
                .map(|p| p.to_string_lossy().into_owned())
        })
        .collect();
    names.sort();
    names
}

// ── grep_files ───────────────────────────────────────────────────────

pub fn grep_files_skill() -> Skill {
    Skill::new(
        SkillSpec::new(
            "grep_files",
            "Search file contents with a regex; results as path:line: text",
            vec![
                ParamSpec::new("pattern", ParamType::String, "Regex to search for", true),
                ParamSpec::new("path", ParamType::String, "Directory to search (defaults to the working directory)", false),
                ParamSpec::new("file_pattern", ParamType::String, "Glob filter on file names (default *.R)", false),
            ],
        ),
        Arc::new(GrepFiles),
    )
}

struct GrepFiles;

#[async_trait]
impl SkillHandler for GrepFiles {
    async fn call(&self, args: &Value, ctx: &SkillContext) -> anyhow::Result<ToolResult> {
        let pattern_text = args.get("pattern").and_then(Value::as_str).unwrap_or_default();
        let regex = match regex::Regex::new(pattern_text) {
            Ok(regex) => regex,
            Err(error) => {
                return Ok(ToolResult::error(format!(
                    "Invalid regex '{pattern_text}': {error}"
                )))
            }
        };

        let raw = args
            .get("path")
            .and_then(Value::as_str)
            .unwrap_or(".")
            .to_string();
        let dir = match checked_path(&raw, ctx, "read") {
            Ok(dir) => dir,
            Err(refusal) => return Ok(refusal),
        };

        let file_pattern = args
            .get("file_pattern")
            .and_then(Value::as_str)
            .unwrap_or("*.R");
        let file_glob = match Pattern::new(file_pattern) {
            Ok(glob) => glob,
            Err(error) => {
                return Ok(ToolResult::error(format!(
                    "Invalid pattern '{file_pattern}': {error}"
                )))
            }
        };

        let mut hits = Vec::new();
        'files: for entry in WalkDir::new(&dir)
            .min_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| file_glob.matches(&entry.file_name().to_string_lossy()))
        {
            let Ok(contents) = std::fs::read_to_string(entry.path()) else {
                continue;
            };
            for (idx, line) in contents.lines().enumerate() {
                if regex.is_match(line) {
                    hits.push(format!("{}:{}: {}", entry.path().display(), idx + 1, line));
                    if hits.len() >= GREP_MATCH_CAP {
                        hits.push(format!("... (capped at {GREP_MATCH_CAP} matches)"));
                        break 'files;
                    }
                }
            }
        }

        if hits.is_empty() {
            return Ok(ToolResult::ok("No matches found"));
        }
        Ok(ToolResult::ok(hits.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;
    use tempfile::tempdir;

    use llamar_config::Config;

    fn ctx_at(cwd: PathBuf) -> SkillContext {
        SkillContext::bare(Arc::new(Config::default()), cwd)
    }

    fn ctx_with_denied(cwd: PathBuf, denied: &str) -> SkillContext {
        let config = Config {
            denied_paths: vec![denied.to_string()],
            ..Config::default()
        };
        SkillContext::bare(Arc::new(config), cwd)
    }

    #[tokio::test]
    async fn test_read_file_whole_and_limited() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("data.txt");
        std::fs::write(&file, "one\ntwo\nthree\n").unwrap();
        let ctx = ctx_at(temp.path().to_path_buf());

        let skill = read_file_skill();
        let whole = skill
            .handler
            .call(&json!({"path": "data.txt"}), &ctx)
            .await
            .unwrap();
        assert!(!whole.is_error);
        assert!(whole.text().contains("three"));

        let limited = skill
            .handler
            .call(&json!({"path": "data.txt", "lines": 2}), &ctx)
            .await
            .unwrap();
        assert_eq!(limited.text(), "one\ntwo");
    }

    #[tokio::test]
    async fn test_read_missing_file_is_error_envelope() {
        let temp = tempdir().unwrap();
        let ctx = ctx_at(temp.path().to_path_buf());
        let result = read_file_skill()
            .handler
            .call(&json!({"path": "absent.txt"}), &ctx)
            .await
            .unwrap();
        assert!(result.is_error);
        assert!(result.text().contains("File not found"));
    }

    #[tokio::test]
    async fn test_read_denied_path_never_opened() {
        // Scenario S4: a denied prefix yields a restricted-area Error.
        let temp = tempdir().unwrap();
        let secret = temp.path().join("secret");
        std::fs::create_dir_all(&secret).unwrap();
        std::fs::write(secret.join("token.txt"), "hunter2").unwrap();
        let ctx = ctx_with_denied(temp.path().to_path_buf(), &secret.to_string_lossy());

        let result = read_file_skill()
            .handler
            .call(&json!({"path": "secret/token.txt"}), &ctx)
            .await
            .unwrap();
        assert!(result.is_error);
        assert!(result.text().contains("restricted"));
        assert!(!result.text().contains("hunter2"));
    }

    #[tokio::test]
    async fn test_write_file_reports_bytes() {
        let temp = tempdir().unwrap();
        let ctx = ctx_at(temp.path().to_path_buf());

        let result = write_file_skill()
            .handler
            .call(&json!({"path": "out/report.md", "content": "hello"}), &ctx)
            .await
            .unwrap();
        assert!(!result.is_error);
        assert!(result.text().contains("Wrote 5 bytes"));
        assert_eq!(
            std::fs::read_to_string(temp.path().join("out/report.md")).unwrap(),
            "hello"
        );
    }

    #[tokio::test]
    async fn test_write_replaces_contents() {
        let temp = tempdir().unwrap();
        let ctx = ctx_at(temp.path().to_path_buf());
        std::fs::write(temp.path().join("f.txt"), "old old old").unwrap();

        write_file_skill()
            .handler
            .call(&json!({"path": "f.txt", "content": "new"}), &ctx)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(temp.path().join("f.txt")).unwrap(), "new");
    }

    #[tokio::test]
    async fn test_list_files_flat_pattern_and_empty() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("a.R"), "").unwrap();
        std::fs::write(temp.path().join("b.txt"), "").unwrap();
        std::fs::create_dir_all(temp.path().join("sub")).unwrap();
        std::fs::write(temp.path().join("sub/c.R"), "").unwrap();
        let ctx = ctx_at(temp.path().to_path_buf());
        let skill = list_files_skill();

        let flat = skill
            .handler
            .call(&json!({"pattern": "*.R"}), &ctx)
            .await
            .unwrap();
        assert_eq!(flat.text(), "a.R");

        let recursive = skill
            .handler
            .call(&json!({"pattern": "*.R", "recursive": true}), &ctx)
            .await
            .unwrap();
        assert_eq!(recursive.text(), "a.R\nsub/c.R");

        let none = skill
            .handler
            .call(&json!({"pattern": "*.py"}), &ctx)
            .await
            .unwrap();
        assert_eq!(none.text(), "No files found");
    }

    #[tokio::test]
    async fn test_grep_files_path_line_format() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("model.R"), "fit <- glm(y ~ x)\nplot(fit)\n").unwrap();
        std::fs::write(temp.path().join("notes.txt"), "glm mentioned here\n").unwrap();
        let ctx = ctx_at(temp.path().to_path_buf());

        let result = grep_files_skill()
            .handler
            .call(&json!({"pattern": "glm"}), &ctx)
            .await
            .unwrap();
        let text = result.text();
        assert!(text.contains("model.R:1: fit <- glm(y ~ x)"));
        // default file_pattern is *.R, so the .txt file is not searched
        assert!(!text.contains("notes.txt"));
    }

    #[tokio::test]
    async fn test_grep_no_matches() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("x.R"), "nothing here\n").unwrap();
        let ctx = ctx_at(temp.path().to_path_buf());

        let result = grep_files_skill()
            .handler
            .call(&json!({"pattern": "unfindable_token_xyz"}), &ctx)
            .await
            .unwrap();
        assert_eq!(result.text(), "No matches found");
    }

    #[tokio::test]
    async fn test_grep_bad_regex() {
        let temp = tempdir().unwrap();
        let ctx = ctx_at(temp.path().to_path_buf());
        let result = grep_files_skill()
            .handler
            .call(&json!({"pattern": "("}), &ctx)
            .await
            .unwrap();
        assert!(result.is_error);
        assert!(result.text().contains("Invalid regex"));
    }
}
