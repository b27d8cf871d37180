//! Scheduled tasks: cron parsing, the relational task store, the due-task
//! step function, and the daemon loop that drives it.

pub mod cron;
pub mod daemon;
pub mod notify;
pub mod store;

pub use cron::{next_run_after, normalize_schedule};
pub use daemon::{run_daemon, step, TaskRunner};
pub use notify::Sink;
pub use store::{RunRecord, Task, TaskRun, TaskStatus, TaskStore};
