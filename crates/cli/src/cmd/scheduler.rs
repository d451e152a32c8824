use chrono::Utc;
use tracing::info;

use super::open;
use crate::{SchedulerArgs, Session};

pub fn run(session: &Session, args: &SchedulerArgs) {
    let app = open(session, "scheduler");
    let mut scheduler = app.scheduler();

    if !args.once {
        info!(repeating = scheduler.scripts().len(), "scheduler started");
        scheduler.run_forever();
        return;
    }

    let reports = scheduler.run_startup(Utc::now());
    if reports.is_empty() {
        println!("nothing due");
    }
    for report in &reports {
        match &report.result {
            Ok(()) => println!("{} {}: ok", report.trigger, report.script),
            Err(e) => println!("{} {}: failed: {e}", report.trigger, report.script),
        }
    }
    if let Some(next) = scheduler.next_due() {
        println!("next due: {}", next.to_rfc3339());
    }
}
