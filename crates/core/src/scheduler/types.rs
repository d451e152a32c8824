use std::fmt;

use chrono::{DateTime, Utc};

use crate::config::RepeatingScript;
use crate::scripting::ScriptingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Startup,
    Periodic,
    OnDemand,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Trigger::Startup => "startup",
            Trigger::Periodic => "periodic",
            Trigger::OnDemand => "on-demand",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScriptState {
    #[default]
    Idle,
    Running,
}

/// Outcome of one run.
#[derive(Debug)]
pub struct RunReport {
    pub script: String,
    pub trigger: Trigger,
    pub started: DateTime<Utc>,
    pub result: Result<(), ScriptingError>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// A repeating script and its bookkeeping.
#[derive(Debug, Clone)]
pub struct ScheduledScript {
    pub spec: RepeatingScript,
    pub state: ScriptState,
    /// Last successful run.
    pub last_run: Option<DateTime<Utc>>,
    /// Set after a failure; the script is due again at this time.
    pub retry_at: Option<DateTime<Utc>>,
}

impl ScheduledScript {
    pub fn new(spec: RepeatingScript, last_run: Option<DateTime<Utc>>) -> Self {
        Self { spec, state: ScriptState::Idle, last_run, retry_at: None }
    }

    /// Key under which the last run is persisted.
    pub fn key(&self) -> String {
        match &self.spec.function {
            Some(f) => format!("{}!{f}", self.spec.name),
            None => self.spec.name.clone(),
        }
    }

    /// When the script is next due. Never-run scripts are due immediately.
    pub fn next_due(&self) -> DateTime<Utc> {
        if let Some(retry) = self.retry_at {
            return retry;
        }
        match self.last_run {
            Some(last) => last.checked_add_signed(self.spec.every).unwrap_or(DateTime::<Utc>::MAX_UTC),
            None => DateTime::<Utc>::MIN_UTC,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_due() <= now
    }
}
