//! Subagent skills: spawn, query, kill, list. These are how the model
//! delegates work to child servers.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use llamar_core::ToolResult;
use llamar_skills::{ParamSpec, ParamType, Skill, SkillContext, SkillHandler, SkillSpec};

use crate::supervisor::Supervisor;

pub fn subagent_spawn_skill(supervisor: Arc<Supervisor>) -> Skill {
    Skill::new(
        SkillSpec::new(
            "subagent_spawn",
            "Start a child agent server for a delegated task",
            vec![ParamSpec::new("task", ParamType::String, "What the child is for", true)],
        ),
        Arc::new(SpawnTool { supervisor }),
    )
}

struct SpawnTool {
    supervisor: Arc<Supervisor>,
}

#[async_trait]
impl SkillHandler for SpawnTool {
    async fn call(&self, args: &Value, _ctx: &SkillContext) -> anyhow::Result<ToolResult> {
        let task = args.get("task").and_then(Value::as_str).unwrap_or_default();
        match self.supervisor.spawn(task).await {
            Ok(record) => Ok(ToolResult::ok(format!(
                "Subagent {} started on port {} for: {}",
                record.id, record.port, record.task
            ))),
            Err(error) => Ok(ToolResult::error(format!("{error:#}"))),
        }
    }
}

pub fn subagent_query_skill(supervisor: Arc<Supervisor>) -> Skill {
    Skill::new(
        SkillSpec::new(
            "subagent_query",
            "Send a message to a running subagent and return its reply",
            vec![
                ParamSpec::new("id", ParamType::String, "Subagent id", true),
                ParamSpec::new("message", ParamType::String, "Message for the child", true),
            ],
        ),
        Arc::new(QueryTool { supervisor }),
    )
}

struct QueryTool {
    supervisor: Arc<Supervisor>,
}

#[async_trait]
impl SkillHandler for QueryTool {
    async fn call(&self, args: &Value, _ctx: &SkillContext) -> anyhow::Result<ToolResult> {
        let id = args.get("id").and_then(Value::as_str).unwrap_or_default();
        let message = args.get("message").and_then(Value::as_str).unwrap_or_default();
        match self.supervisor.query(id, message).await {
            Ok(reply) => Ok(ToolResult::ok(reply)),
            Err(error) => Ok(ToolResult::error(format!("{error:#}"))),
        }
    }
}

pub fn subagent_kill_skill(supervisor: Arc<Supervisor>) -> Skill {
    Skill::new(
        SkillSpec::new(
            "subagent_kill",
            "Stop a running subagent",
            vec![ParamSpec::new("id", ParamType::String, "Subagent id", true)],
        ),
        Arc::new(KillTool { supervisor }),
    )
}

struct KillTool {
    supervisor: Arc<Supervisor>,
}

#[async_trait]
impl SkillHandler for KillTool {
    async fn call(&self, args: &Value, _ctx: &SkillContext) -> anyhow::Result<ToolResult> {
        let id = args.get("id").and_then(Value::as_str).unwrap_or_default();
        match self.supervisor.kill(id).await {
            Ok(true) => Ok(ToolResult::ok(format!("Subagent {id} stopped"))),
            Ok(false) => Ok(ToolResult::error(format!("Subagent '{id}' not found"))),
            Err(error) => Ok(ToolResult::error(format!("{error:#}"))),
        }
    }
}

pub fn subagent_list_skill(supervisor: Arc<Supervisor>) -> Skill {
    Skill::new(
        SkillSpec::new("subagent_list", "List running subagents", vec![]),
        Arc::new(ListTool { supervisor }),
    )
}

struct ListTool {
    supervisor: Arc<Supervisor>,
}

#[async_trait]
impl SkillHandler for ListTool {
    async fn call(&self, _args: &Value, _ctx: &SkillContext) -> anyhow::Result<ToolResult> {
        let records = self.supervisor.list().await;
        if records.is_empty() {
            return Ok(ToolResult::ok("No subagents running"));
        }
        let rendered: Vec<String> = records
            .iter()
            .map(|record| {
                format!(
                    "{} port={} started={} task={}",
                    record.id,
                    record.port,
                    record.started_at.to_rfc3339(),
                    record.task
                )
            })
            .collect();
        Ok(ToolResult::ok(rendered.join("\n")))
    }
}

/// Register the subagent skill set against one supervisor.
pub fn register_subagent_skills(
    registry: &mut llamar_skills::SkillRegistry,
    supervisor: Arc<Supervisor>,
) -> anyhow::Result<()> {
    registry.register(subagent_spawn_skill(supervisor.clone()))?;
    registry.register(subagent_query_skill(supervisor.clone()))?;
    registry.register(subagent_kill_skill(supervisor.clone()))?;
    registry.register(subagent_list_skill(supervisor))?;
    Ok(())
}
