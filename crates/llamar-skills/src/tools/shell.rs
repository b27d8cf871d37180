//! The bash tool. Child processes are spawned with `kill_on_drop`: when
//! the runner-level timeout aborts the handler task, the in-flight
//! `output()` future is dropped and the child is reaped with it. The
//! tool's own `timeout` parameter bounds the command independently.
//!
//! Failure convention: a command that runs and fails (non-zero exit,
//! internal timeout) comes back as Ok text beginning with `"Error:"`;
//! only the safety screen refuses with an Error envelope.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use llamar_core::ToolResult;
use llamar_sandbox::validate_command;

use crate::context::SkillContext;
use crate::registry::{Skill, SkillHandler};
use crate::spec::{ParamSpec, ParamType, SkillSpec};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub fn bash_skill() -> Skill {
    Skill::new(
        SkillSpec::new(
            "bash",
            "Run a shell command in the working directory",
            vec![
                ParamSpec::new("command", ParamType::String, "Command to run", true),
                ParamSpec::new(
                    "timeout",
                    ParamType::Integer,
                    "Seconds before the command is killed (default 30)",
                    false,
                ),
            ],
        ),
        Arc::new(Bash),
    )
}

struct Bash;

#[async_trait]
impl SkillHandler for Bash {
    async fn call(&self, args: &Value, ctx: &SkillContext) -> anyhow::Result<ToolResult> {
        let command = args.get("command").and_then(Value::as_str).unwrap_or_default();
        if let Err(refusal) = validate_command(command) {
            return Ok(ToolResult::error(refusal));
        }

        let timeout_secs = args
            .get("timeout")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        Ok(run_shell(command, &ctx.cwd, timeout_secs).await)
    }
}

pub(crate) async fn run_shell(
    command: &str,
    cwd: &std::path::Path,
    timeout_secs: u64,
) -> ToolResult {
    let child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(Duration::from_secs(timeout_secs), child).await {
        Ok(Ok(output)) => output,
        Ok(Err(error)) => return ToolResult::ok(format!("Error: failed to start shell: {error}")),
        Err(_) => {
            return ToolResult::ok(format!(
                "Error: command timed out after {timeout_secs} seconds"
            ))
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    if !output.status.success() {
        let code = output.status.code().unwrap_or(-1);
        let detail = if stderr.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            stderr.trim().to_string()
        };
        return ToolResult::ok(format!("Error: exit status {code}\n{detail}"));
    }

    let mut text = stdout.into_owned();
    if text.trim().is_empty() {
        text = if stderr.trim().is_empty() {
            "(no output)".to_string()
        } else {
            stderr.into_owned()
        };
    }
    ToolResult::ok(text)
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

    #[tokio::test]
    async fn test_stdout_captured() {
        let temp = tempdir().unwrap();
        let ctx = ctx_at(temp.path().to_path_buf());
        let result = bash_skill()
            .handler
            .call(&json!({"command": "echo hello from the shell"}), &ctx)
            .await
            .unwrap();
        assert!(!result.is_error);
        assert!(result.text().contains("hello from the shell"));
    }

    #[tokio::test]
    async fn test_runs_in_cwd() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("marker.txt"), "x").unwrap();
        let ctx = ctx_at(temp.path().to_path_buf());
        let result = bash_skill()
            .handler
            .call(&json!({"command": "ls"}), &ctx)
            .await
            .unwrap();
        assert!(result.text().contains("marker.txt"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_ok_with_error_text() {
        let temp = tempdir().unwrap();
        let ctx = ctx_at(temp.path().to_path_buf());
        let result = bash_skill()
            .handler
            .call(&json!({"command": "ls /definitely/not/a/dir"}), &ctx)
            .await
            .unwrap();
        assert!(!result.is_error, "shell failures are chat-visible, not protocol errors");
        assert!(result.text().starts_with("Error:"));
    }

    #[tokio::test]
    async fn test_internal_timeout() {
        let temp = tempdir().unwrap();
        let ctx = ctx_at(temp.path().to_path_buf());
        let result = bash_skill()
            .handler
            .call(&json!({"command": "sleep 5", "timeout": 1}), &ctx)
            .await
            .unwrap();
        assert!(!result.is_error);
        assert!(result.text().contains("timed out after 1 seconds"));
    }

    #[tokio::test]
    async fn test_dangerous_command_refused() {
        let temp = tempdir().unwrap();
        let ctx = ctx_at(temp.path().to_path_buf());
        let result = bash_skill()
            .handler
            .call(&json!({"command": "rm -rf /"}), &ctx)
            .await
            .unwrap();
        assert!(result.is_error, "the safety screen refuses outright");
        assert!(result.text().contains("safety screen"));
    }

    #[tokio::test]
    async fn test_empty_output_placeholder() {
        let temp = tempdir().unwrap();
        let ctx = ctx_at(temp.path().to_path_buf());
        let result = bash_skill()
            .handler
            .call(&json!({"command": "true"}), &ctx)
            .await
            .unwrap();
        assert_eq!(result.text(), "(no output)");
    }
}
