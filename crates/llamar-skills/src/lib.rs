//! The skill layer: schema-described tool specs, the process-wide
//! registry, the validating/timeout-bounded runner, the SKILL.md loader,
//! and the built-in tool bodies.

pub mod context;
pub mod registry;
pub mod runner;
pub mod skill_file;
pub mod spec;
pub mod tools;

pub use context::{ChatBackend, MemoryResources, NoopChat, SkillContext};
pub use registry::{Skill, SkillHandler, SkillRegistry};
pub use runner::run;
pub use spec::{ParamSpec, ParamType, SkillSpec};
