//! Script scheduler: startup, periodic with catch-up, and on-demand runs.

pub mod interval;
pub mod runner;
pub mod types;

pub use interval::parse_interval;
pub use runner::{LAST_INVOCATIONS_KEY, Scheduler};
pub use types::{RunReport, ScheduledScript, ScriptState, Trigger};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("invalid interval '{0}' (expected e.g. 30s, 15m, 2h, 1d, 1w)")]
    BadInterval(String),
}
