//! JSON-RPC method dispatch.
//!
//! Contract: one response per request, none per notification, none for
//! malformed JSON (logged and discarded). The response `id` mirrors the
//! request `id`, including null. Tool failures ride inside the `result`
//! envelope; `-32601` is the only transport-level error a client sees.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, warn};

use llamar_core::ToolResult;
use llamar_sandbox::permission::{authorize, Approver};
use llamar_skills::{runner, SkillContext, SkillRegistry};

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "llamar";

pub struct RpcHandler {
    registry: Arc<SkillRegistry>,
    base_ctx: SkillContext,
    allowed_tools: Option<HashSet<String>>,
    approver: Option<Arc<dyn Approver>>,
    turn: AtomicU32,
}

impl RpcHandler {
    pub fn new(registry: Arc<SkillRegistry>, base_ctx: SkillContext) -> Self {
        Self {
            registry,
            base_ctx,
            allowed_tools: None,
            approver: None,
            turn: AtomicU32::new(0),
        }
    }

    /// Restrict `tools/list` and `tools/call` to a subset of the registry.
    pub fn with_allowed_tools(mut self, allowed: HashSet<String>) -> Self {
        self.allowed_tools = Some(allowed);
        self
    }

    pub fn with_approver(mut self, approver: Arc<dyn Approver>) -> Self {
        self.approver = Some(approver);
        self
    }

    /// Handle one wire line. `None` means emit nothing (notification or
    /// malformed input).
    pub async fn handle_line(&self, line: &str) -> Option<String> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }

        let request: Value = match serde_json::from_str(trimmed) {
            Ok(request) => request,
            Err(error) => {
                warn!(%error, "discarding malformed JSON-RPC input");
                return None;
            }
        };

        let is_notification = request.get("id").is_none();
        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let method = request
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let params = request.get("params").cloned().unwrap_or(Value::Null);

        let response = self.dispatch(&method, params).await;

        if is_notification {
            if response.is_some() {
                debug!(%method, "dropping response to notification");
            }
            return None;
        }

        let body = match response {
            Some(result) => jsonrpc_result(id, result),
            None => jsonrpc_error(id, -32601, format!("Method not found: {method}")),
        };
        Some(body.to_string())
    }

    /// `Some(result)` for handled methods, `None` for unknown ones.
    async fn dispatch(&self, method: &str, params: Value) -> Option<Value> {
        match method {
            "initialize" => Some(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {"tools": {}},
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": env!("CARGO_PKG_VERSION"),
                },
            })),
            "notifications/initialized" => Some(Value::Null),
            "tools/list" => Some(json!({
                "tools": self.registry.tool_definitions(self.allowed_tools.as_ref()),
            })),
            "tools/call" => Some(self.tools_call(params).await),
            _ => None,
        }
    }

    async fn tools_call(&self, params: Value) -> Value {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let args = params
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| json!({}));

        if let Some(allowed) = &self.allowed_tools
            && !allowed.contains(&name)
        {
            return ToolResult::error(format!("Unknown tool '{name}'")).to_value();
        }
        let Some(skill) = self.registry.get(&name) else {
            return ToolResult::error(format!("Unknown tool '{name}'")).to_value();
        };

        let approved_by = match authorize(
            &name,
            &args,
            &self.base_ctx.config,
            self.approver.as_deref(),
        )
        .await
        {
            Ok(approved_by) => approved_by,
            Err(error) => return ToolResult::from(error).to_value(),
        };

        let mut ctx = self.base_ctx.clone();
        ctx.approved_by = approved_by;
        ctx.turn = Some(self.turn.fetch_add(1, Ordering::Relaxed));

        let timeout = Duration::from_secs(ctx.config.skill_timeout.max(1));
        let dry_run = ctx.config.dry_run;
        runner::run(skill, args, ctx, timeout, dry_run).await.to_value()
    }
}

fn jsonrpc_result(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
}

fn jsonrpc_error(id: Value, code: i64, message: String) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": message,
        }
    })
}
