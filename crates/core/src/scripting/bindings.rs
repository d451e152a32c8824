//! Global tables injected into every script environment.

use mlua::{Function, Lua, Result as LuaResult, Table, Value as LuaValue, Variadic};
use serde_json::Value;
use tracing::debug;

use super::capabilities::Capability;
use super::convert::{json_to_lua, lua_to_json, map_to_lua, table_to_map};
use super::environment::context;
use super::fetch::{FetchedData, ResponseType};
use super::html::HtmlNode;
use super::record_bindings::LuaNamespace;
use super::types::raise;
use super::ui::{DataField, DataKind, format_message};
use crate::actions::ActionError;
use crate::auth::{Identity, IdentityKind, Level};

/// Register `buchschloss`: entity namespaces, login context, level check
/// and the persistent store.
///
/// ```lua
/// local book = buchschloss.Book[7]
/// if buchschloss.check_level(3) then return end
/// local data = buchschloss.get_storage()
/// ```
pub fn register_buchschloss_table(lua: &Lua) -> LuaResult<()> {
    let ctx = context(lua)?;
    let bs = lua.create_table()?;

    for ns in ctx.namespaces.iter() {
        bs.set(ns.kind().as_str(), LuaNamespace::new(std::sync::Arc::clone(ns)))?;
    }
    bs.set("login_context", create_login_context(lua)?)?;
    bs.set("check_level", create_check_level_fn(lua)?)?;
    bs.set("get_storage", create_get_storage_fn(lua)?)?;
    bs.set("set_storage", create_set_storage_fn(lua)?)?;

    lua.globals().set("buchschloss", bs)?;
    Ok(())
}

/// `buchschloss.login_context`: the identity the script runs as. Script
/// identities carry their `invoker` as a nested context.
fn create_login_context(lua: &Lua) -> LuaResult<Table> {
    let ctx = context(lua)?;
    identity_table(lua, ctx.caller.identity())
}

fn identity_table(lua: &Lua, identity: &Identity) -> LuaResult<Table> {
    let table = lua.create_table()?;
    table.set("type", identity.kind().as_str())?;
    table.set("name", identity.subject())?;
    table.set("level", identity.level())?;
    if identity.kind() == IdentityKind::Script {
        table.set("invoker", identity_table(lua, identity.invoker())?)?;
    }
    Ok(table)
}

/// `buchschloss.check_level(level, alert = true)`.
///
/// True when the invoker's level is below `level`. The invoker is used, not
/// the execution identity, so `setlevel` does not affect the answer.
fn create_check_level_fn(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|lua, (level, alert): (Level, Option<bool>)| {
        let ctx = context(lua)?;
        let insufficient = ctx.invoker.level() < level;
        if insufficient && alert.unwrap_or(true) {
            if let Some(ui) = &ctx.ui {
                let template = ui.get_name("must_be_{}");
                ui.alert(&format_message(&template, &[ui.get_level_name(level)]));
            }
        }
        Ok(insufficient)
    })
}

/// `buchschloss.get_storage()`: the script's document, `{}` if never set.
fn create_get_storage_fn(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|lua, ()| {
        let ctx = context(lua)?;
        ctx.caps.require(Capability::Store).map_err(raise)?;
        let stored = ctx.store.script_storage(&ctx.name).map_err(raise)?;
        match stored {
            Some(Value::Object(map)) => map_to_lua(lua, &map),
            Some(_) | None => lua.create_table(),
        }
    })
}

/// `buchschloss.set_storage(table)`: replace the whole document.
fn create_set_storage_fn(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|lua, data: Table| {
        let ctx = context(lua)?;
        ctx.caps.require(Capability::Store).map_err(raise)?;
        let map = table_to_map(data)?;
        ctx.store.set_script_storage(&ctx.name, &Value::Object(map)).map_err(raise)?;
        debug!(script = %ctx.name, "storage replaced");
        Ok(())
    })
}

/// Register `requests`.
///
/// ```lua
/// local data = requests.get("https://openlibrary.org/isbn/123.json", "json")
/// local page = requests.get("https://example.org/", "html")
/// local title = page:select_one("h1").text
/// ```
pub fn register_requests_table(lua: &Lua) -> LuaResult<()> {
    let requests = lua.create_table()?;
    requests.set("get", create_get_fn(lua)?)?;
    lua.globals().set("requests", requests)?;
    Ok(())
}

fn create_get_fn(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|lua, (url, ty): (String, Option<String>)| {
        let ctx = context(lua)?;
        if !ctx.caps.has(Capability::Requests) {
            return Err(raise(ActionError::RequestRejected(format!(
                "script '{}' does not hold {}",
                ctx.name,
                Capability::Requests
            ))));
        }
        let ty: ResponseType = ty.as_deref().unwrap_or("auto").parse().map_err(raise)?;
        match ctx.fetcher.get(&url, ty).map_err(raise)? {
            FetchedData::Json(value) => json_to_lua(lua, &value),
            FetchedData::Markup(markup) => lua.create_userdata(HtmlNode::parse(&markup)).map(LuaValue::UserData),
            FetchedData::Text(text) => lua.create_string(text).map(LuaValue::String),
        }
    })
}

/// Register `ui`. Keys are looked up as `script::<name>::<key>`.
pub fn register_ui_table(lua: &Lua) -> LuaResult<()> {
    let ui = lua.create_table()?;
    ui.set("alert", create_alert_fn(lua)?)?;
    ui.set("ask", create_ask_fn(lua)?)?;
    ui.set("display", create_display_fn(lua)?)?;
    ui.set("get_data", create_get_data_fn(lua)?)?;
    ui.set("get_name", create_get_name_fn(lua)?)?;
    ui.set("get_level", create_get_level_fn(lua)?)?;
    lua.globals().set("ui", ui)?;
    Ok(())
}

fn scoped_name(lua: &Lua, key: &str, args: Variadic<LuaValue>) -> LuaResult<String> {
    let ctx = context(lua)?;
    let ui = ctx.ui.as_ref().ok_or_else(|| mlua::Error::runtime("no UI attached"))?;
    let args = args.iter().map(LuaValue::to_string).collect::<LuaResult<Vec<_>>>()?;
    let template = ui.get_name(&format!("script::{}::{key}", ctx.name));
    Ok(format_message(&template, &args))
}

fn create_get_name_fn(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|lua, (key, args): (String, Variadic<LuaValue>)| {
        scoped_name(lua, &key, args)
    })
}

fn create_alert_fn(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|lua, (key, args): (String, Variadic<LuaValue>)| {
        let message = scoped_name(lua, &key, args)?;
        if let Some(ui) = &context(lua)?.ui {
            ui.alert(&message);
        }
        Ok(())
    })
}

fn create_ask_fn(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|lua, (key, args): (String, Variadic<LuaValue>)| {
        let question = scoped_name(lua, &key, args)?;
        Ok(context(lua)?.ui.as_ref().is_some_and(|ui| ui.ask(&question)))
    })
}

fn create_display_fn(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|lua, data: LuaValue| {
        let data = lua_to_json(data)?;
        if let Some(ui) = &context(lua)?.ui {
            ui.display(&data);
        }
        Ok(())
    })
}

/// `ui.get_data({isbn = "int", note = "str"})` returns a table or nil on
/// cancel.
fn create_get_data_fn(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|lua, spec: Table| {
        let ctx = context(lua)?;
        let Some(ui) = &ctx.ui else {
            return Ok(LuaValue::Nil);
        };
        let mut fields = Vec::new();
        for pair in spec.pairs::<String, String>() {
            let (key, kind) = pair?;
            let kind: DataKind = kind.parse().map_err(mlua::Error::runtime)?;
            let label = ui.get_name(&format!("script::{}::{key}", ctx.name));
            fields.push(DataField { key, label, kind });
        }
        fields.sort_by(|a, b| a.key.cmp(&b.key));
        match ui.get_data(&fields) {
            Some(data) => map_to_lua(lua, &data).map(LuaValue::Table),
            None => Ok(LuaValue::Nil),
        }
    })
}

fn create_get_level_fn(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|lua, level: Level| {
        let ctx = context(lua)?;
        Ok(ctx.ui.as_ref().map(|ui| ui.get_level_name(level)).unwrap_or_else(|| level.to_string()))
    })
}
