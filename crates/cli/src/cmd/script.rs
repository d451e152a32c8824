//! Script management commands.

use buchschloss_core::auth::Caller;
use buchschloss_core::entities::EntityKind;
use buchschloss_core::store::{Condition, Record, RecordId};
use serde_json::{Map, Value};
use tabled::{Table, Tabled, settings::Style};

use super::{caller, fail, identity, open};
use crate::{ScriptAddArgs, Session};

/// Row for the script table.
#[derive(Tabled)]
struct ScriptRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Setlevel")]
    setlevel: String,
    #[tabled(rename = "Permissions")]
    permissions: String,
    #[tabled(rename = "Lines")]
    lines: usize,
}

impl From<&Record> for ScriptRow {
    fn from(record: &Record) -> Self {
        let permissions = match record.get("permissions") {
            Value::Array(items) => {
                items.iter().filter_map(Value::as_str).collect::<Vec<_>>().join(", ")
            }
            _ => String::new(),
        };
        Self {
            name: record.id.to_string(),
            setlevel: record.get("setlevel").as_u64().map_or_else(|| "-".into(), |l| l.to_string()),
            permissions,
            lines: record.get("code").as_str().map_or(0, |c| c.lines().count()),
        }
    }
}

pub fn add(session: &Session, args: ScriptAddArgs) {
    let app = open(session, "script add");
    let code = std::fs::read_to_string(&args.file).unwrap_or_else(|e| {
        fail("script add", format!("Error reading {}: {e}", args.file.display()))
    });
    let caller = caller(&app, session, "script add");

    let mut fields = Map::new();
    fields.insert("name".into(), Value::String(args.name.clone()));
    fields.insert("code".into(), Value::String(code));
    if !args.permissions.is_empty() {
        let permissions = args.permissions.iter().map(|p| Value::String(p.to_uppercase())).collect();
        fields.insert("permissions".into(), Value::Array(permissions));
    }
    if let Some(level) = args.setlevel {
        fields.insert("setlevel".into(), Value::from(level));
    }

    match app.namespaces().get(EntityKind::Script).create(&caller, fields) {
        Ok(id) => println!("created Script[{id}]"),
        Err(e) => fail("script add", e),
    }
}

pub fn list(session: &Session) {
    let app = open(session, "script list");
    let (identity, _) = identity(&app, session, "script list");
    let caller = Caller::new(identity);

    let scripts = match app.namespaces().get(EntityKind::Script).search(&caller, &Condition::All) {
        Ok(s) => s,
        Err(e) => fail("script list", e),
    };
    if scripts.is_empty() {
        println!("No scripts found.");
        println!("Add one with: bsl script add <name> <file.lua>");
        return;
    }

    let rows: Vec<ScriptRow> = scripts.iter().map(ScriptRow::from).collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

/// Print the storage document of a script the user may view.
pub fn storage(session: &Session, name: &str) {
    let app = open(session, "script storage");
    let (identity, _) = identity(&app, session, "script storage");
    let id = RecordId::from(name);
    if let Err(e) = app.namespaces().get(EntityKind::Script).view(&Caller::new(identity), &id) {
        fail("script storage", e);
    }

    match app.store().script_storage(name) {
        Ok(Some(data)) => match serde_json::to_string_pretty(&data) {
            Ok(s) => println!("{s}"),
            Err(e) => fail("script storage", e),
        },
        Ok(None) => println!("{{}}"),
        Err(e) => fail("script storage", e),
    }
}
