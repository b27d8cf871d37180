#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Missing required parameters: {0}")]
    MissingParams(String),

    #[error("Invalid value for parameter '{name}': {reason}")]
    InvalidParam { name: String, reason: String },

    #[error("Unknown tool '{0}'")]
    UnknownSkill(String),

    #[error("Permission denied for tool '{0}'")]
    PermissionDenied(String),

    #[error("Skill timed out after {0} seconds")]
    SkillTimeout(u64),

    #[error("Skill '{skill}' failed: {cause}")]
    SkillFailed { skill: String, cause: String },

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Path rejected: {0}")]
    PathRejected(String),

    #[error("Command rejected: {0}")]
    CommandRejected(String),

    #[error("Session '{0}' not found")]
    SessionNotFound(String),

    #[error("Subagent limit reached ({0} running)")]
    SubagentLimit(u32),

    #[error("Subagents are disabled")]
    SubagentsDisabled,

    #[error("Nested subagents are not allowed")]
    NestedSubagent,
}
