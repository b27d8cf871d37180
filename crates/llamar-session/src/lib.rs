//! Session persistence: a `sessions.json` metadata store per agent, one
//! JSONL transcript per session, and one trace log of tool invocations.

pub mod store;
pub mod trace;
pub mod transcript;

pub use store::{Session, SessionStore, SessionSummary};
pub use trace::{format_trace, TraceEntry};
pub use transcript::{Message, Role, COMPACTION_PREFIX};
