//! Thin wrappers over the git CLI in a target repository.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use llamar_core::ToolResult;
use llamar_sandbox::paths::{normalize, validate_path};

use crate::context::SkillContext;
use crate::registry::{Skill, SkillHandler};
use crate::spec::{ParamSpec, ParamType, SkillSpec};
use crate::tools::shell::run_shell;

const GIT_TIMEOUT_SECS: u64 = 30;

fn repo_param() -> ParamSpec {
    ParamSpec::new(
        "path",
        ParamType::String,
        "Repository directory (defaults to the working directory)",
        false,
    )
}

async fn run_git(args: &Value, ctx: &SkillContext, subcommand: &str) -> ToolResult {
    let raw = args
        .get("path")
        .and_then(Value::as_str)
        .unwrap_or(".")
        .to_string();
    let check = validate_path(&raw, &ctx.config, &ctx.cwd, "read");
    if !check.ok {
        return ToolResult::error(check.message);
    }
    let repo = normalize(&raw, &ctx.cwd);
    run_shell(&format!("git {subcommand}"), &repo, GIT_TIMEOUT_SECS).await
}

pub fn git_status_skill() -> Skill {
    Skill::new(
        SkillSpec::new(
            "git_status",
            "Show the working tree status of a repository",
            vec![repo_param()],
        ),
        Arc::new(GitStatus),
    )
}

struct GitStatus;

#[async_trait]
impl SkillHandler for GitStatus {
    async fn call(&self, args: &Value, ctx: &SkillContext) -> anyhow::Result<ToolResult> {
        Ok(run_git(args, ctx, "status --short --branch").await)
    }
}

pub fn git_diff_skill() -> Skill {
    Skill::new(
        SkillSpec::new(
            "git_diff",
            "Show unstaged changes in a repository",
            vec![repo_param()],
        ),
        Arc::new(GitDiff),
    )
}

struct GitDiff;

#[async_trait]
impl SkillHandler for GitDiff {
    async fn call(&self, args: &Value, ctx: &SkillContext) -> anyhow::Result<ToolResult> {
        Ok(run_git(args, ctx, "diff").await)
    }
}

pub fn git_log_skill() -> Skill {
    Skill::new(
        SkillSpec::new(
            "git_log",
            "Show recent commits, one line each",
            vec![
                repo_param(),
                ParamSpec::new("count", ParamType::Integer, "How many commits (default 20)", false),
            ],
        ),
        Arc::new(GitLog),
    )
}

struct GitLog;

#[async_trait]
impl SkillHandler for GitLog {
    async fn call(&self, args: &Value, ctx: &SkillContext) -> anyhow::Result<ToolResult> {
        let count = args.get("count").and_then(Value::as_u64).unwrap_or(20);
        Ok(run_git(args, ctx, &format!("log --oneline -n {count}")).await)
    }
}
