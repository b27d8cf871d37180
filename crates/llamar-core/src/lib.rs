//! Shared types for the llamar tool server: the Ok/Error tool envelope,
//! typed error kinds, logging setup, and truncation helpers.

pub mod envelope;
pub mod error;
pub mod logging;
pub mod truncate;

pub use envelope::{ContentBlock, ToolResult};
pub use error::AppError;
