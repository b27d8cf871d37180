//! The skill registry: built at startup from the built-ins plus any user
//! skill files, then read-only for the life of the process.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;

use llamar_core::ToolResult;

use crate::context::SkillContext;
use crate::spec::SkillSpec;

/// A tool body. Implementations return `Err` for internal failures; the
/// runner folds those into Error envelopes so nothing escapes to the
/// transport.
#[async_trait]
pub trait SkillHandler: Send + Sync {
    async fn call(&self, args: &Value, ctx: &SkillContext) -> anyhow::Result<ToolResult>;
}

/// A named, schema-described callable.
pub struct Skill {
    pub spec: SkillSpec,
    pub handler: Arc<dyn SkillHandler>,
}

impl Skill {
    pub fn new(spec: SkillSpec, handler: Arc<dyn SkillHandler>) -> Self {
        Self { spec, handler }
    }
}

#[derive(Default)]
pub struct SkillRegistry {
    skills: BTreeMap<String, Arc<Skill>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a skill. Duplicate skill names and duplicate param names
    /// are rejected at startup, not at call time. (The required-subset
    /// invariant holds by construction: `required` is a flag on declared
    /// params.)
    pub fn register(&mut self, skill: Skill) -> Result<()> {
        let name = skill.spec.name.clone();
        if name.trim().is_empty() {
            bail!("skill name must not be empty");
        }
        if self.skills.contains_key(&name) {
            bail!("skill '{name}' is already registered");
        }
        let mut declared: HashSet<&str> = HashSet::new();
        for param in &skill.spec.params {
            if !declared.insert(param.name.as_str()) {
                bail!("skill '{name}' declares param '{}' twice", param.name);
            }
        }
        self.skills.insert(name, Arc::new(skill));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Skill>> {
        self.skills.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.skills.keys().map(String::as_str).collect()
    }

    /// MCP tool definitions, optionally filtered by an allow-set.
    pub fn tool_definitions(&self, allowed: Option<&HashSet<String>>) -> Vec<Value> {
        self.skills
            .values()
            .filter(|skill| allowed.is_none_or(|set| set.contains(&skill.spec.name)))
            .map(|skill| skill.spec.tool_definition())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{ParamSpec, ParamType};

    struct Echo;

    #[async_trait]
    impl SkillHandler for Echo {
        async fn call(&self, args: &Value, _ctx: &SkillContext) -> anyhow::Result<ToolResult> {
            Ok(ToolResult::ok(args.to_string()))
        }
    }

    fn echo_skill(name: &str) -> Skill {
        Skill::new(
            SkillSpec::new(name, "echoes args", vec![]),
            Arc::new(Echo),
        )
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = SkillRegistry::new();
        registry.register(echo_skill("echo")).unwrap();
        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = SkillRegistry::new();
        registry.register(echo_skill("echo")).unwrap();
        assert!(registry.register(echo_skill("echo")).is_err());
    }

    #[test]
    fn test_duplicate_param_rejected() {
        let mut registry = SkillRegistry::new();
        let skill = Skill::new(
            SkillSpec::new(
                "bad",
                "broken spec",
                vec![
                    ParamSpec::new("path", ParamType::String, "first", true),
                    ParamSpec::new("path", ParamType::String, "second", false),
                ],
            ),
            Arc::new(Echo),
        );
        assert!(registry.register(skill).is_err());
    }

    #[test]
    fn test_tool_definitions_filtered() {
        let mut registry = SkillRegistry::new();
        registry.register(echo_skill("alpha")).unwrap();
        registry.register(echo_skill("beta")).unwrap();

        assert_eq!(registry.tool_definitions(None).len(), 2);

        let allowed: HashSet<String> = ["beta".to_string()].into_iter().collect();
        let filtered = registry.tool_definitions(Some(&allowed));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0]["name"], "beta");
    }

    #[test]
    fn test_names_sorted() {
        let mut registry = SkillRegistry::new();
        registry.register(echo_skill("zeta")).unwrap();
        registry.register(echo_skill("alpha")).unwrap();
        assert_eq!(registry.names(), vec!["alpha", "zeta"]);
    }
}
