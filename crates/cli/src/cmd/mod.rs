pub mod doctor;
pub mod init;
pub mod lua;
pub mod member;
pub mod run;
pub mod scheduler;
pub mod script;

use buchschloss_core::app::App;
use buchschloss_core::auth::{Caller, Identity};
use buchschloss_core::config::ConfigLoader;

use crate::Session;
use crate::ui::prompt_password;

/// Print `FAIL bsl <command>` and the error, then exit 1.
pub fn fail(command: &str, err: impl std::fmt::Display) -> ! {
    eprintln!("FAIL bsl {command}");
    eprintln!("{err}");
    std::process::exit(1);
}

/// Load configuration, start logging and open the database.
pub fn open(session: &Session, command: &str) -> App {
    let cfg = match ConfigLoader::load(session.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => fail(command, format!("Error loading config: {e}")),
    };
    crate::logging::init(&cfg);
    match App::open(cfg) {
        Ok(app) => app,
        Err(e) => fail(command, format!("Error opening database: {e}")),
    }
}

/// The session password, prompting when a user is given without one.
pub fn password(session: &Session, command: &str) -> Option<String> {
    let user = session.user.as_deref()?;
    match &session.password {
        Some(pw) => Some(pw.clone()),
        None => match prompt_password(&format!("Password for {user}")) {
            Ok(pw) => Some(pw),
            Err(e) => fail(command, e),
        },
    }
}

/// Log in as the session user, or a guest.
pub fn identity(app: &App, session: &Session, command: &str) -> (Identity, Option<String>) {
    let password = password(session, command);
    match app.identity(session.user.as_deref(), password.as_deref().unwrap_or_default()) {
        Ok(identity) => (identity, password),
        Err(e) => fail(command, e),
    }
}

/// A caller with a fresh credential, for sensitive operations.
pub fn caller(app: &App, session: &Session, command: &str) -> Caller {
    let (identity, password) = identity(app, session, command);
    match app.caller(identity, password.as_deref()) {
        Ok(caller) => caller,
        Err(e) => fail(command, e),
    }
}
