use buchschloss_core::app::DEFAULT_LIBRARY;

use super::{fail, open};
use crate::ui::prompt_password;
use crate::{InitArgs, Session};

pub fn run(session: &Session, args: &InitArgs) {
    let app = open(session, "init");
    let password = match &session.password {
        Some(pw) => pw.clone(),
        None => prompt_password(&format!("Password for {}", args.admin)).unwrap_or_else(|e| fail("init", e)),
    };

    match app.bootstrap(&args.admin, &password) {
        Ok(true) => {
            println!("OK   bsl init");
            println!("database: {}", app.config().database_path.display());
            println!("library: {DEFAULT_LIBRARY}");
            println!("member: {} (level {})", args.admin, app.config().scale().max);
        }
        Ok(false) => {
            println!("OK   bsl init");
            println!("members already exist; nothing to do");
        }
        Err(e) => fail("init", e),
    }
}
