//! The chat tool: the one skill that reaches the LLM seam. Subagent
//! parents query their children through it.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use llamar_core::ToolResult;

use crate::context::SkillContext;
use crate::registry::{Skill, SkillHandler};
use crate::spec::{ParamSpec, ParamType, SkillSpec};

pub fn chat_skill() -> Skill {
    Skill::new(
        SkillSpec::new(
            "chat",
            "Send a message to this agent and get its reply",
            vec![ParamSpec::new("message", ParamType::String, "The message", true)],
        ),
        Arc::new(Chat),
    )
}

struct Chat;

#[async_trait]
impl SkillHandler for Chat {
    async fn call(&self, args: &Value, ctx: &SkillContext) -> anyhow::Result<ToolResult> {
        let message = args.get("message").and_then(Value::as_str).unwrap_or_default();
        match ctx.chat.chat(message).await {
            Ok(reply) => Ok(ToolResult::ok(reply)),
            Err(error) => Ok(ToolResult::error(format!("Chat failed: {error}"))),
        }
    }
}
