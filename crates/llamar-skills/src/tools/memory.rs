//! Memory tools: the Markdown face (`memory_store`, `memory_search`) and
//! the index face (`memory_index`, `memory_query`).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Local;
use serde_json::Value;

use llamar_core::ToolResult;
use llamar_memory::MemoryScope;
use llamar_sandbox::paths::{normalize, validate_path};

use crate::context::SkillContext;
use crate::registry::{Skill, SkillHandler};
use crate::spec::{ParamSpec, ParamType, SkillSpec};

fn parse_scope(args: &Value) -> MemoryScope {
    match args.get("scope").and_then(Value::as_str) {
        Some("global") => MemoryScope::Global,
        _ => MemoryScope::Project,
    }
}

fn scope_param() -> ParamSpec {
    ParamSpec::new(
        "scope",
        ParamType::String,
        "Where the memory lives (default project)",
        false,
    )
    .with_enum(&["project", "global"])
}

// ── memory_store ─────────────────────────────────────────────────────

pub fn memory_store_skill() -> Skill {
    Skill::new(
        SkillSpec::new(
            "memory_store",
            "Remember a fact in MEMORY.md; hashtags in the fact become tags",
            vec![
                ParamSpec::new("fact", ParamType::String, "The fact to remember", true),
                scope_param(),
                ParamSpec::new(
                    "category",
                    ParamType::String,
                    "Section heading (auto-detected when omitted)",
                    false,
                ),
                ParamSpec::new("tags", ParamType::Array, "Extra tags", false),
            ],
        ),
        Arc::new(MemoryStoreTool),
    )
}

struct MemoryStoreTool;

#[async_trait]
impl SkillHandler for MemoryStoreTool {
    async fn call(&self, args: &Value, ctx: &SkillContext) -> anyhow::Result<ToolResult> {
        let Some(memory) = &ctx.memory else {
            return Ok(ToolResult::error("Memory store is not available"));
        };
        let fact = args.get("fact").and_then(Value::as_str).unwrap_or_default();
        if fact.trim().is_empty() {
            return Ok(ToolResult::error("Fact is empty"));
        }
        let scope = parse_scope(args);
        let category = args.get("category").and_then(Value::as_str);
        let tags: Vec<String> = args
            .get("tags")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        match memory.store.store(fact, &tags, category, scope, Local::now()) {
            Ok(entry) => Ok(ToolResult::ok(format!("Stored ({scope}): {entry}"))),
            Err(error) => Ok(ToolResult::error(format!("Failed to store memory: {error:#}"))),
        }
    }
}

// ── memory_search ────────────────────────────────────────────────────

pub fn memory_search_skill() -> Skill {
    Skill::new(
        SkillSpec::new(
            "memory_search",
            "Search MEMORY.md entries case-insensitively",
            vec![
                ParamSpec::new("query", ParamType::String, "Text to look for", true),
                scope_param(),
            ],
        ),
        Arc::new(MemorySearchTool),
    )
}

struct MemorySearchTool;

#[async_trait]
impl SkillHandler for MemorySearchTool {
    async fn call(&self, args: &Value, ctx: &SkillContext) -> anyhow::Result<ToolResult> {
        let Some(memory) = &ctx.memory else {
            return Ok(ToolResult::error("Memory store is not available"));
        };
        let query = args.get("query").and_then(Value::as_str).unwrap_or_default();
        let scope = args
            .get("scope")
            .and_then(Value::as_str)
            .map(|_| parse_scope(args));

        let hits = match memory.store.search(query, scope) {
            Ok(hits) => hits,
            Err(error) => {
                return Ok(ToolResult::error(format!("Memory search failed: {error:#}")))
            }
        };
        if hits.is_empty() {
            return Ok(ToolResult::ok("No memories found"));
        }

        let rendered: Vec<String> = hits
            .iter()
            .map(|hit| {
                let tags = if hit.tags.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", hit.tags.join(", "))
                };
                format!(
                    "({}/{}) {} ({}){tags}",
                    hit.scope, hit.section, hit.text, hit.date
                )
            })
            .collect();
        Ok(ToolResult::ok(rendered.join("\n")))
    }
}

// ── memory_index ─────────────────────────────────────────────────────

pub fn memory_index_skill() -> Skill {
    Skill::new(
        SkillSpec::new(
            "memory_index",
            "Index a file into the full-text chunk database",
            vec![
                ParamSpec::new("path", ParamType::String, "File to index", true),
                ParamSpec::new(
                    "source",
                    ParamType::String,
                    "Source label stored with the chunks (default file)",
                    false,
                ),
            ],
        ),
        Arc::new(MemoryIndexTool),
    )
}

struct MemoryIndexTool;

#[async_trait]
impl SkillHandler for MemoryIndexTool {
    async fn call(&self, args: &Value, ctx: &SkillContext) -> anyhow::Result<ToolResult> {
        let Some(memory) = &ctx.memory else {
            return Ok(ToolResult::error("Memory index is not available"));
        };
        let raw = args.get("path").and_then(Value::as_str).unwrap_or_default();
        let check = validate_path(raw, &ctx.config, &ctx.cwd, "read");
        if !check.ok {
            return Ok(ToolResult::error(check.message));
        }
        let path = normalize(raw, &ctx.cwd);
        let source = args.get("source").and_then(Value::as_str).unwrap_or("file");

        let outcome = {
            let mut index = memory.index.lock().expect("chunk index lock poisoned");
            if source == "session" || path.extension().is_some_and(|ext| ext == "jsonl") {
                index.index_claude_session(&path)
            } else {
                index.index_file(&path, source)
            }
        };
        match outcome {
            Ok(0) => Ok(ToolResult::ok(format!("{} unchanged; 0 chunks", path.display()))),
            Ok(count) => Ok(ToolResult::ok(format!(
                "Indexed {} ({count} chunks)",
                path.display()
            ))),
            Err(error) => Ok(ToolResult::error(format!("Indexing failed: {error:#}"))),
        }
    }
}

// ── memory_query ─────────────────────────────────────────────────────

pub fn memory_query_skill() -> Skill {
    Skill::new(
        SkillSpec::new(
            "memory_query",
            "Full-text search over indexed chunks, ranked by relevance",
            vec![
                ParamSpec::new("query", ParamType::String, "Search terms", true),
                ParamSpec::new("limit", ParamType::Integer, "Max hits (default 10)", false),
                ParamSpec::new("source", ParamType::String, "Restrict to one source label", false),
            ],
        ),
        Arc::new(MemoryQueryTool),
    )
}

struct MemoryQueryTool;

#[async_trait]
impl SkillHandler for MemoryQueryTool {
    async fn call(&self, args: &Value, ctx: &SkillContext) -> anyhow::Result<ToolResult> {
        let Some(memory) = &ctx.memory else {
            return Ok(ToolResult::error("Memory index is not available"));
        };
        let query = args.get("query").and_then(Value::as_str).unwrap_or_default();
        let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(10) as usize;
        let source = args.get("source").and_then(Value::as_str);

        let hits = {
            let index = memory.index.lock().expect("chunk index lock poisoned");
            index.search_fts(query, limit, source)
        };
        match hits {
            Ok(hits) if hits.is_empty() => Ok(ToolResult::ok("No chunks matched")),
            Ok(hits) => {
                let rendered: Vec<String> = hits
                    .iter()
                    .map(|hit| format!("[{}] {}\n{}", hit.id, hit.path, hit.text))
                    .collect();
                Ok(ToolResult::ok(rendered.join("\n\n")))
            }
            Err(error) => Ok(ToolResult::error(format!("Query failed: {error:#}"))),
        }
    }
}
