//! Subagents: child tool servers on probed TCP ports, queried over MCP
//! and reaped on timeout.

pub mod client;
pub mod supervisor;
pub mod tools;

pub use client::McpClient;
pub use supervisor::{SubagentRecord, Supervisor};
pub use tools::register_subagent_skills;
