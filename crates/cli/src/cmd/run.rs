use std::io::{self, IsTerminal};
use std::rc::Rc;

use buchschloss_core::auth::Caller;
use buchschloss_core::entities::EntityKind;
use buchschloss_core::store::Condition;
use dialoguer::FuzzySelect;
use dialoguer::theme::ColorfulTheme;

use super::{fail, identity, open};
use crate::ui::TerminalUi;
use crate::{RunArgs, Session};

pub fn run(session: &Session, args: RunArgs) {
    let app = open(session, "run");
    let (identity, _) = identity(&app, session, "run");

    let script = match args.script {
        Some(name) => name,
        None => pick_script(&app, Caller::new(identity.clone())),
    };

    let ui = Rc::new(TerminalUi::new(app.config()));
    let report = app.scheduler().run_on_demand(&script, args.function.as_deref(), identity, ui);
    if let Err(e) = report.result {
        fail("run", e);
    }
}

fn pick_script(app: &buchschloss_core::app::App, caller: Caller) -> String {
    if !io::stdin().is_terminal() {
        fail("run", "no script given");
    }
    let scripts = app
        .namespaces()
        .get(EntityKind::Script)
        .search(&caller, &Condition::All)
        .unwrap_or_else(|e| fail("run", e));
    let names: Vec<String> = scripts.iter().map(|r| r.id.to_string()).collect();
    if names.is_empty() {
        fail("run", "no scripts stored");
    }

    let chosen = FuzzySelect::with_theme(&ColorfulTheme::default())
        .with_prompt("Script")
        .items(&names)
        .interact_opt()
        .unwrap_or_else(|e| fail("run", e));
    match chosen {
        Some(i) => names[i].clone(),
        None => fail("run", "cancelled"),
    }
}
