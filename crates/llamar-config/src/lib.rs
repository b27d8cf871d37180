//! Configuration resolution: merge the user-global and project-local
//! `config.json`, then fill hard-coded defaults.

pub mod config;
pub mod paths;

pub use config::{ApprovalMode, Config, RateLimitConfig, SubagentConfig};
