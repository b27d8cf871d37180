//! The skill runner: required/type validation, dry-run previews, execution
//! under a wall-clock timeout with panic containment, and best-effort
//! tracing.
//!
//! Timeouts are first-class outcomes here, never unwound exceptions: the
//! handler task is aborted and the caller receives an Error envelope.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::debug;

use llamar_core::{AppError, ToolResult};
use llamar_session::TraceEntry;

use crate::context::SkillContext;
use crate::registry::Skill;

/// Execute `skill` with `args` under `timeout`. Always returns an
/// envelope; internal errors, panics, and expiry are all folded in.
pub async fn run(
    skill: Arc<Skill>,
    args: Value,
    ctx: SkillContext,
    timeout: Duration,
    dry_run: bool,
) -> ToolResult {
    let started = Instant::now();
    let result = run_inner(&skill, &args, &ctx, timeout, dry_run).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    if !dry_run {
        write_trace(&skill, &args, &ctx, &result, elapsed_ms);
    }
    result
}

async fn run_inner(
    skill: &Arc<Skill>,
    args: &Value,
    ctx: &SkillContext,
    timeout: Duration,
    dry_run: bool,
) -> ToolResult {
    if let Err(error) = validate_required(skill, args) {
        return error.into();
    }
    if let Err(error) = validate_types(skill, args) {
        return error.into();
    }
    if dry_run {
        return ToolResult::ok(dry_run_preview(skill, args));
    }

    execute(skill, args, ctx, timeout).await
}

fn validate_required(skill: &Skill, args: &Value) -> Result<(), AppError> {
    let missing: Vec<&str> = skill
        .spec
        .required_names()
        .into_iter()
        .filter(|name| args.get(name).is_none_or(Value::is_null))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(AppError::MissingParams(missing.join(", ")))
    }
}

/// Each supplied arg must satisfy its declared type and enum. Unknown
/// params pass through untouched for forward compatibility.
fn validate_types(skill: &Skill, args: &Value) -> Result<(), AppError> {
    let Some(map) = args.as_object() else {
        return Ok(());
    };

    for param in &skill.spec.params {
        let Some(value) = map.get(&param.name) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        if !param.param_type.admits(value) {
            return Err(AppError::InvalidParam {
                name: param.name.clone(),
                reason: format!("expected {}", param.param_type.as_str()),
            });
        }
        if let Some(allowed) = &param.enum_values
            && !allowed.contains(value)
        {
            let rendered: Vec<String> = allowed.iter().map(Value::to_string).collect();
            return Err(AppError::InvalidParam {
                name: param.name.clone(),
                reason: format!("must be one of {}", rendered.join(", ")),
            });
        }
    }
    Ok(())
}

fn dry_run_preview(skill: &Skill, args: &Value) -> String {
    let mut preview = format!("[DRY RUN] Would execute: {}", skill.spec.name);

    match skill.spec.name.as_str() {
        "write_file" => {
            let bytes = args
                .get("content")
                .and_then(Value::as_str)
                .map(|c| c.len())
                .unwrap_or(0);
            let path = args.get("path").and_then(Value::as_str).unwrap_or("?");
            preview.push_str(&format!("\nWould write {bytes} bytes to {path}"));
        }
        "bash" => {
            let command = args.get("command").and_then(Value::as_str).unwrap_or("?");
            preview.push_str(&format!("\nCommand: {command}"));
        }
        "run_r" => {
            let lines = args
                .get("code")
                .and_then(Value::as_str)
                .map(|c| c.lines().count())
                .unwrap_or(0);
            preview.push_str(&format!("\nWould run {lines} line(s) of R"));
        }
        _ => {}
    }

    preview.push_str("\nArguments:");
    match args.as_object() {
        Some(map) if !map.is_empty() => {
            for (key, value) in map {
                let rendered = match value {
                    Value::String(text) => llamar_core::truncate::truncate_arg(text),
                    other => llamar_core::truncate::truncate_arg(&other.to_string()),
                };
                preview.push_str(&format!("\n  {key}: {rendered}"));
            }
        }
        _ => preview.push_str("\n  (none)"),
    }
    preview
}

async fn execute(
    skill: &Arc<Skill>,
    args: &Value,
    ctx: &SkillContext,
    timeout: Duration,
) -> ToolResult {
    let handler = skill.handler.clone();
    let task_args = args.clone();
    let task_ctx = ctx.clone();
    let skill_name = skill.spec.name.clone();

    // Spawned so a panicking handler is contained as a JoinError instead
    // of unwinding through the transport loop.
    let handle = tokio::spawn(async move { handler.call(&task_args, &task_ctx).await });
    let abort_handle = handle.abort_handle();

    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(Ok(result))) => result,
        Ok(Ok(Err(error))) => AppError::SkillFailed {
            skill: skill_name,
            cause: format!("{error:#}"),
        }
        .into(),
        Ok(Err(join_error)) => {
            let cause = if join_error.is_panic() {
                match join_error.into_panic().downcast::<String>() {
                    Ok(message) => *message,
                    Err(payload) => match payload.downcast::<&'static str>() {
                        Ok(message) => (*message).to_string(),
                        Err(_) => "handler panicked".to_string(),
                    },
                }
            } else {
                "handler was cancelled".to_string()
            };
            AppError::SkillFailed {
                skill: skill_name,
                cause,
            }
            .into()
        }
        Err(_elapsed) => {
            // Dropping the JoinHandle leaves the task running; abort it so
            // the handler is actually interrupted (and its kill_on_drop
            // children reaped) when the caller gets the timeout Error.
            abort_handle.abort();
            AppError::SkillTimeout(timeout.as_secs()).into()
        }
    }
}

/// Best-effort trace append; failures are logged and swallowed so they
/// never change the returned value.
fn write_trace(
    skill: &Skill,
    args: &Value,
    ctx: &SkillContext,
    result: &ToolResult,
    elapsed_ms: u64,
) {
    let (Some(session_id), Some(sessions)) = (&ctx.session_id, &ctx.sessions) else {
        return;
    };

    let entry = TraceEntry::new(
        &skill.spec.name,
        args,
        &result.text(),
        !result.is_error,
        elapsed_ms,
        ctx.approved_by.clone(),
        ctx.turn,
    );
    if let Err(error) = sessions.trace_add(session_id, &entry) {
        debug!(%error, %session_id, tool = %skill.spec.name, "trace append failed");
    }
}
