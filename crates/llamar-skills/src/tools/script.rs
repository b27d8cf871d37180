//! The R execution tool: write the code to a temp script, run `Rscript`,
//! capture stdout and stderr. Same failure convention as bash.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use llamar_core::ToolResult;

use crate::context::SkillContext;
use crate::registry::{Skill, SkillHandler};
use crate::spec::{ParamSpec, ParamType, SkillSpec};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub fn run_r_skill() -> Skill {
    Skill::new(
        SkillSpec::new(
            "run_r",
            "Execute R code with Rscript and return its output",
            vec![
                ParamSpec::new("code", ParamType::String, "R code to execute", true),
                ParamSpec::new(
                    "timeout",
                    ParamType::Integer,
                    "Seconds before execution is killed (default 30)",
                    false,
                ),
            ],
        ),
        Arc::new(RunR),
    )
}

struct RunR;

#[async_trait]
impl SkillHandler for RunR {
    async fn call(&self, args: &Value, ctx: &SkillContext) -> anyhow::Result<ToolResult> {
        let code = args.get("code").and_then(Value::as_str).unwrap_or_default();
        let timeout_secs = args
            .get("timeout")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        // Named temp file so Rscript sees a real path; autoprint of visible
        // top-level values matches interactive behavior.
        let script = match tempfile::Builder::new().suffix(".R").tempfile() {
            Ok(file) => file,
            Err(error) => {
                return Ok(ToolResult::ok(format!(
                    "Error: failed to stage R script: {error}"
                )))
            }
        };
        if let Err(error) = std::fs::write(script.path(), code) {
            return Ok(ToolResult::ok(format!(
                "Error: failed to stage R script: {error}"
            )));
        }

        let child = Command::new("Rscript")
            .arg(script.path())
            .current_dir(&ctx.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(Duration::from_secs(timeout_secs), child).await {
            Ok(Ok(output)) => output,
            Ok(Err(error)) => {
                return Ok(ToolResult::ok(format!(
                    "Error: failed to start Rscript (is R installed?): {error}"
                )))
            }
            Err(_) => {
                return Ok(ToolResult::ok(format!(
                    "Error: R execution timed out after {timeout_secs} seconds"
                )))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            return Ok(ToolResult::ok(format!(
                "Error: Rscript exit status {code}\n{}",
                stderr.trim()
            )));
        }

        let mut text = stdout.into_owned();
        if !stderr.trim().is_empty() {
            // R routes messages and warnings to stderr; keep them visible.
            text.push_str("\n--- messages ---\n");
            text.push_str(stderr.trim());
        }
        if text.trim().is_empty() {
            text = "(no output)".to_string();
        }
        Ok(ToolResult::ok(text))
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

    fn r_available() -> bool {
        std::process::Command::new("Rscript")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok()
    }

    #[tokio::test]
    async fn test_arithmetic_autoprints() {
        if !r_available() {
            eprintln!("Rscript not installed; skipping");
            return;
        }
        let temp = tempdir().unwrap();
        let ctx = ctx_at(temp.path().to_path_buf());
        let result = run_r_skill()
            .handler
            .call(&json!({"code": "2+2"}), &ctx)
            .await
            .unwrap();
        assert!(!result.is_error);
        assert!(result.text().contains('4'), "got: {}", result.text());
    }

    #[tokio::test]
    async fn test_syntax_error_surfaced_as_text() {
        if !r_available() {
            eprintln!("Rscript not installed; skipping");
            return;
        }
        let temp = tempdir().unwrap();
        let ctx = ctx_at(temp.path().to_path_buf());
        let result = run_r_skill()
            .handler
            .call(&json!({"code": "this is not R ((("}), &ctx)
            .await
            .unwrap();
        assert!(!result.is_error);
        assert!(result.text().starts_with("Error:"));
    }

    #[tokio::test]
    async fn test_print_output_captured() {
        if !r_available() {
            eprintln!("Rscript not installed; skipping");
            return;
        }
        let temp = tempdir().unwrap();
        let ctx = ctx_at(temp.path().to_path_buf());
        let result = run_r_skill()
            .handler
            .call(&json!({"code": "x <- c(1, 2, 3)\nprint(sum(x))"}), &ctx)
            .await
            .unwrap();
        assert!(!result.is_error);
        assert!(result.text().contains('6'));
    }
}
