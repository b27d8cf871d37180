//! Per-tool permission resolution.
//!
//! The engine only decides; interactive confirmation belongs to whoever
//! embeds the server (the CLI, normally). Servers running without a user
//! register no approver, and `ask` degenerates to `deny`.

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use llamar_config::{ApprovalMode, Config};
use llamar_core::AppError;

/// External approval callback for tools resolved to `ask`.
#[async_trait]
pub trait Approver: Send + Sync {
    /// Returns the approver identity (recorded in the trace as
    /// `approved_by`) when the call is approved, `None` when refused.
    async fn approve(&self, tool: &str, args: &Value) -> Option<String>;
}

/// Resolve the gate for `tool`:
/// explicit per-tool override, else the default gate for dangerous tools,
/// else allow.
pub fn resolve(tool: &str, config: &Config) -> ApprovalMode {
    if let Some(mode) = config.permission_override(tool) {
        return mode;
    }
    if config.is_dangerous(tool) {
        return config.approval_mode;
    }
    ApprovalMode::Allow
}

/// Apply the resolved gate before a call.
///
/// Returns the `approved_by` identity for `ask` approvals (`None` for plain
/// `allow`), or `PermissionDenied` without side effects.
pub async fn authorize(
    tool: &str,
    args: &Value,
    config: &Config,
    approver: Option<&dyn Approver>,
) -> Result<Option<String>, AppError> {
    match resolve(tool, config) {
        ApprovalMode::Allow => Ok(None),
        ApprovalMode::Deny => Err(AppError::PermissionDenied(tool.to_string())),
        ApprovalMode::Ask => match approver {
            Some(approver) => match approver.approve(tool, args).await {
                Some(approved_by) => Ok(Some(approved_by)),
                None => Err(AppError::PermissionDenied(tool.to_string())),
            },
            None => {
                warn!(tool, "ask-gated tool with no approver registered; denying");
                Err(AppError::PermissionDenied(tool.to_string()))
            }
        },
    }
}
