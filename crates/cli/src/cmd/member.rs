use buchschloss_core::entities::EntityKind;
use serde_json::{Map, Value};

use super::{caller, fail, open};
use crate::ui::prompt_password;
use crate::{MemberAddArgs, Session};

pub fn add(session: &Session, args: MemberAddArgs) {
    let app = open(session, "member add");
    let caller = caller(&app, session, "member add");
    let new_password = match args.new_password {
        Some(pw) => pw,
        None => prompt_password(&format!("Password for {}", args.name))
            .unwrap_or_else(|e| fail("member add", e)),
    };

    let mut fields = Map::new();
    fields.insert("name".into(), Value::String(args.name.clone()));
    fields.insert("level".into(), Value::from(args.level));
    fields.insert("password".into(), Value::String(new_password));

    match app.namespaces().get(EntityKind::Member).create(&caller, fields) {
        Ok(id) => println!("created Member[{id}] at level {}", app.config().level_name(args.level)),
        Err(e) => fail("member add", e),
    }
}
