//! Interactive Lua session.

use std::io::{self, BufRead, IsTerminal, Write};
use std::rc::Rc;

use buchschloss_core::scripting::UiFacade;

use super::{fail, identity, open};
use crate::Session;
use crate::ui::TerminalUi;

pub fn run(session: &Session) {
    let app = open(session, "lua");
    let (identity, _) = identity(&app, session, "lua");
    let ui: Rc<dyn UiFacade> = Rc::new(TerminalUi::new(app.config()));
    let env = app.host().interactive(identity.clone(), Some(ui)).unwrap_or_else(|e| fail("lua", e));

    let interactive = io::stdin().is_terminal();
    if interactive {
        eprintln!("buchschloss Lua as {identity}; 'exit' to leave");
    }

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        if interactive {
            eprint!("lua> ");
            let _ = io::stderr().flush();
        }
        let Some(Ok(line)) = lines.next() else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "exit" | "quit" => break,
            _ => {}
        }
        match env.eval(line) {
            Ok(Some(value)) => println!("{value}"),
            Ok(None) => {}
            Err(e) => eprintln!("error: {e}"),
        }
    }
}
