//! Serialized script runs for the startup, periodic and on-demand triggers.
//!
//! Every failure stops at this boundary: it is logged (and alerted when a UI
//! is attached) and never prevents the next run.

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use super::types::{RunReport, ScheduledScript, ScriptState, Trigger};
use crate::auth::Identity;
use crate::config::{RepeatingScript, ScriptEntry};
use crate::scripting::{ScriptHost, UiFacade};
use crate::store::RecordStore;

/// `misc` key holding last successful runs as RFC 3339 strings.
pub const LAST_INVOCATIONS_KEY: &str = "last_script_invocations";

/// Longest single sleep in [`Scheduler::run_forever`].
const MAX_SLEEP: StdDuration = StdDuration::from_secs(3600);

pub struct Scheduler {
    host: Arc<ScriptHost>,
    store: Arc<dyn RecordStore>,
    startup: Vec<ScriptEntry>,
    repeating: Vec<ScheduledScript>,
    started: bool,
}

impl Scheduler {
    pub fn new(
        host: Arc<ScriptHost>,
        store: Arc<dyn RecordStore>,
        startup: Vec<ScriptEntry>,
        repeating: Vec<RepeatingScript>,
    ) -> Self {
        let last_runs = load_last_runs(store.as_ref());
        let repeating = repeating
            .into_iter()
            .map(|spec| {
                let mut script = ScheduledScript::new(spec, None);
                script.last_run = last_runs.get(&script.key()).copied();
                script
            })
            .collect();
        Self { host, store, startup, repeating, started: false }
    }

    pub fn scripts(&self) -> &[ScheduledScript] {
        &self.repeating
    }

    /// Startup scripts, once per scheduler, then every due repeating script.
    pub fn run_startup(&mut self, now: DateTime<Utc>) -> Vec<RunReport> {
        let mut reports = Vec::new();
        if !self.started {
            self.started = true;
            for entry in &self.startup {
                reports.push(run_logged(
                    &self.host,
                    &entry.name,
                    entry.function.as_deref(),
                    Trigger::Startup,
                    now,
                ));
            }
        }
        reports.extend(self.run_due(now));
        reports
    }

    /// Run each due repeating script once. However many intervals were
    /// missed, a script runs at most once per call.
    pub fn run_due(&mut self, now: DateTime<Utc>) -> Vec<RunReport> {
        let mut reports = Vec::new();
        let mut succeeded = false;
        for script in self.repeating.iter_mut().filter(|s| s.is_due(now)) {
            script.state = ScriptState::Running;
            let report = run_logged(
                &self.host,
                &script.spec.name,
                script.spec.function.as_deref(),
                Trigger::Periodic,
                now,
            );
            script.state = ScriptState::Idle;

            if report.succeeded() {
                script.last_run = Some(now);
                script.retry_at = None;
                succeeded = true;
            } else {
                script.retry_at = now.checked_add_signed(script.spec.every);
            }
            reports.push(report);
        }
        if succeeded {
            self.save_last_runs();
        }
        reports
    }

    /// Earliest time any repeating script is due.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.repeating.iter().map(ScheduledScript::next_due).min()
    }

    /// Run a script chosen by a user. Failures are alerted through `ui`.
    pub fn run_on_demand(
        &self,
        name: &str,
        function: Option<&str>,
        invoker: Identity,
        ui: Rc<dyn UiFacade>,
    ) -> RunReport {
        let started = Utc::now();
        let result = self.host.run(name, function, invoker, Some(Rc::clone(&ui)));
        if let Err(e) = &result {
            error!(script = name, trigger = %Trigger::OnDemand, "script failed: {e}");
            ui.alert(&format!("{}: {e}", ui.get_name("script_failed")));
        }
        RunReport { script: name.to_string(), trigger: Trigger::OnDemand, started, result }
    }

    /// Run startup scripts, then sleep until each next due time. Returns
    /// when there is nothing repeating to wait for.
    pub fn run_forever(&mut self) {
        self.run_startup(Utc::now());
        while let Some(next) = self.next_due() {
            let wait = (next - Utc::now()).to_std().unwrap_or(StdDuration::ZERO).min(MAX_SLEEP);
            if !wait.is_zero() {
                std::thread::sleep(wait);
            }
            self.run_due(Utc::now());
        }
        info!("no repeating scripts configured; scheduler finished");
    }

    fn save_last_runs(&self) {
        let mut runs = match self.store.misc(LAST_INVOCATIONS_KEY) {
            Ok(Some(Value::Object(map))) => map,
            _ => Map::new(),
        };
        for script in &self.repeating {
            if let Some(last) = script.last_run {
                runs.insert(script.key(), Value::String(last.to_rfc3339()));
            }
        }
        if let Err(e) = self.store.set_misc(LAST_INVOCATIONS_KEY, &Value::Object(runs)) {
            warn!("could not persist script invocation times: {e}");
        }
    }
}

fn run_logged(
    host: &ScriptHost,
    name: &str,
    function: Option<&str>,
    trigger: Trigger,
    now: DateTime<Utc>,
) -> RunReport {
    let result = host.run(name, function, Identity::unprivileged_internal(), None);
    match &result {
        Ok(()) => info!(script = name, %trigger, "script finished"),
        Err(e) => error!(script = name, %trigger, "script failed: {e}"),
    }
    RunReport { script: name.to_string(), trigger, started: now, result }
}

fn load_last_runs(store: &dyn RecordStore) -> HashMap<String, DateTime<Utc>> {
    let map = match store.misc(LAST_INVOCATIONS_KEY) {
        Ok(Some(Value::Object(map))) => map,
        Ok(_) => return HashMap::new(),
        Err(e) => {
            warn!("could not read script invocation times: {e}");
            return HashMap::new();
        }
    };
    map.into_iter()
        .filter_map(|(key, value)| {
            let parsed = value
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc));
            if parsed.is_none() {
                warn!(script = %key, "ignoring unreadable last invocation {value}");
            }
            parsed.map(|t| (key, t))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::Namespaces;
    use crate::auth::{AuthPolicy, Authenticator};
    use crate::entities::{EntityKind, EntityRegistry};
    use crate::scripting::fetch::tests::MockTransport;
    use crate::scripting::ui::tests::RecordingUi;
    use crate::scripting::{Fetcher, SandboxConfig};
    use crate::store::{Database, RecordId};
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    const COUNTER: &str = r#"
        local s = buchschloss.get_storage()
        s.count = (s.count or 0) + 1
        buchschloss.set_storage(s)
    "#;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn setup() -> (Arc<dyn RecordStore>, Arc<ScriptHost>) {
        let store: Arc<dyn RecordStore> = Arc::new(Database::open_in_memory().unwrap());
        let policy = AuthPolicy::default();
        let host = ScriptHost::new(
            Arc::clone(&store),
            Namespaces::new(&EntityRegistry::builtin(), Arc::clone(&store), policy),
            Arc::new(Authenticator::new(Arc::clone(&store), policy)),
            Arc::new(Fetcher::new(None, MockTransport::new("text/plain", ""))),
            SandboxConfig::default(),
            HashMap::new(),
        );
        (store, Arc::new(host))
    }

    fn add_script(store: &dyn RecordStore, name: &str, code: &str) {
        let fields = json!({"name": name, "code": code, "permissions": ["STORE"]});
        store
            .insert(EntityKind::Script, Some(RecordId::from(name)), fields.as_object().unwrap())
            .unwrap();
    }

    fn count(store: &dyn RecordStore, name: &str) -> i64 {
        store
            .script_storage(name)
            .unwrap()
            .and_then(|v| v["count"].as_i64())
            .unwrap_or(0)
    }

    fn hourly(name: &str) -> RepeatingScript {
        RepeatingScript { name: name.into(), function: None, every: Duration::hours(1) }
    }

    fn scheduler(store: &Arc<dyn RecordStore>, host: &Arc<ScriptHost>) -> Scheduler {
        Scheduler::new(Arc::clone(host), Arc::clone(store), vec![], vec![hourly("tick")])
    }

    #[test]
    fn test_never_run_script_runs_at_startup() {
        let (store, host) = setup();
        add_script(store.as_ref(), "tick", COUNTER);
        let mut s = scheduler(&store, &host);

        let reports = s.run_startup(t0());
        assert_eq!(reports.len(), 1);
        assert!(reports[0].succeeded());
        assert_eq!(reports[0].trigger, Trigger::Periodic);
        assert_eq!(count(store.as_ref(), "tick"), 1);
        assert_eq!(s.next_due(), Some(t0() + Duration::hours(1)));
    }

    #[test]
    fn test_missed_intervals_run_once() {
        let (store, host) = setup();
        add_script(store.as_ref(), "tick", COUNTER);
        let mut s = scheduler(&store, &host);
        s.run_startup(t0());

        let later = t0() + Duration::hours(5);
        assert_eq!(s.run_due(later).len(), 1);
        assert!(s.run_due(later + Duration::minutes(1)).is_empty());
        assert_eq!(count(store.as_ref(), "tick"), 2);
        assert_eq!(s.scripts()[0].state, ScriptState::Idle);
    }

    #[test]
    fn test_last_run_survives_restart() {
        let (store, host) = setup();
        add_script(store.as_ref(), "tick", COUNTER);
        scheduler(&store, &host).run_startup(t0());

        let mut restarted = scheduler(&store, &host);
        assert_eq!(restarted.scripts()[0].last_run, Some(t0()));
        assert!(restarted.run_startup(t0() + Duration::minutes(30)).is_empty());
        assert_eq!(count(store.as_ref(), "tick"), 1);
    }

    #[test]
    fn test_restart_after_missed_intervals_runs_once() {
        let (store, host) = setup();
        add_script(store.as_ref(), "tick", COUNTER);
        scheduler(&store, &host).run_startup(t0());

        let restart = t0() + Duration::hours(4);
        let mut restarted = scheduler(&store, &host);
        assert_eq!(restarted.run_startup(restart).len(), 1);
        assert!(restarted.run_due(restart + Duration::minutes(1)).is_empty());
        assert_eq!(count(store.as_ref(), "tick"), 2);

        let persisted = store.misc(LAST_INVOCATIONS_KEY).unwrap().unwrap();
        assert_eq!(persisted["tick"], json!(restart.to_rfc3339()));
        assert_eq!(restarted.next_due(), Some(restart + Duration::hours(1)));
    }

    #[test]
    fn test_unreadable_last_run_is_ignored() {
        let (store, host) = setup();
        add_script(store.as_ref(), "tick", COUNTER);
        store.set_misc(LAST_INVOCATIONS_KEY, &json!({"tick": "yesterday"})).unwrap();

        let s = scheduler(&store, &host);
        assert_eq!(s.scripts()[0].last_run, None);
    }

    #[test]
    fn test_failure_retries_after_one_interval() {
        let (store, host) = setup();
        add_script(store.as_ref(), "tick", "error('boom')");
        let mut s = scheduler(&store, &host);

        let reports = s.run_due(t0());
        assert!(!reports[0].succeeded());
        assert!(s.run_due(t0() + Duration::minutes(30)).is_empty());
        assert_eq!(s.run_due(t0() + Duration::hours(1)).len(), 1);
        assert_eq!(s.scripts()[0].last_run, None);
    }

    #[test]
    fn test_failing_script_does_not_block_others() {
        let (store, host) = setup();
        add_script(store.as_ref(), "broken", "error('boom')");
        add_script(store.as_ref(), "tick", COUNTER);
        let mut s = Scheduler::new(
            Arc::clone(&host),
            Arc::clone(&store),
            vec![],
            vec![hourly("broken"), hourly("tick")],
        );

        let reports = s.run_due(t0());
        assert_eq!(reports.len(), 2);
        assert_eq!(count(store.as_ref(), "tick"), 1);
    }

    #[test]
    fn test_startup_scripts_run_once() {
        let (store, host) = setup();
        add_script(store.as_ref(), "boot", COUNTER);
        let startup = vec![ScriptEntry { name: "boot".into(), function: None }];
        let mut s = Scheduler::new(Arc::clone(&host), Arc::clone(&store), startup, vec![]);

        assert_eq!(s.run_startup(t0())[0].trigger, Trigger::Startup);
        assert!(s.run_startup(t0()).is_empty());
        assert_eq!(count(store.as_ref(), "boot"), 1);
        assert_eq!(s.next_due(), None);
    }

    #[test]
    fn test_on_demand_failure_is_alerted() {
        let (store, host) = setup();
        add_script(store.as_ref(), "broken", "error('boom')");
        let s = scheduler(&store, &host);
        let ui = Rc::new(RecordingUi::default());

        let report = s.run_on_demand("broken", None, Identity::guest(), ui.clone());
        assert!(!report.succeeded());
        assert_eq!(report.trigger, Trigger::OnDemand);
        assert_eq!(ui.alerts.borrow().len(), 1);
        assert!(ui.alerts.borrow()[0].starts_with("script_failed"));
    }
}
