//! Entity namespaces and record proxies as Lua userdata.
//!
//! `buchschloss.Book` is a [`LuaNamespace`]. Indexing it with `new`, `view`
//! or `search` yields the operation; any other key is taken as an id and
//! yields an unpopulated [`LuaRecord`] without touching the store. Both
//! `ns.view(7)` and `ns:view(7)` work.
//!
//! Sensitive operations take the invoker's password as `current_password`
//! inside the argument table:
//!
//! ```lua
//! buchschloss.Member.new{name = "eve", level = 1, password = "pw",
//!                        current_password = "my password"}
//! ```

use std::sync::Arc;

use mlua::{
    Function, Lua, MetaMethod, MultiValue, Result as LuaResult, UserData, UserDataMethods,
    Value as LuaValue,
};
use serde_json::{Map, Value};

use super::convert::{json_to_lua, lua_to_json};
use super::environment::{ScriptContext, context};
use super::types::raise;
use crate::actions::{ActionError, ActionNamespace, LazyViewProxy};
use crate::auth::Caller;
use crate::entities::FieldType;
use crate::store::{Condition, RecordId};

const OPERATIONS: [&str; 3] = ["new", "view", "search"];

/// Argument key carrying a password for reauthentication.
const CURRENT_PASSWORD: &str = "current_password";

pub struct LuaNamespace {
    namespace: Arc<ActionNamespace>,
}

impl LuaNamespace {
    pub fn new(namespace: Arc<ActionNamespace>) -> Self {
        Self { namespace }
    }
}

impl UserData for LuaNamespace {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::Index, |lua, this, key: LuaValue| {
            if let LuaValue::String(s) = &key {
                let name = s.to_str()?.to_string();
                if OPERATIONS.contains(&name.as_str()) {
                    return create_operation_fn(lua, Arc::clone(&this.namespace), name)
                        .map(LuaValue::Function);
                }
            }
            let ctx = context(lua)?;
            let id = lua_to_id(&this.namespace, key)?;
            let proxy = LazyViewProxy::new(Arc::clone(&this.namespace), Arc::clone(&ctx.caller), id);
            lua.create_userdata(LuaRecord::new(proxy)).map(LuaValue::UserData)
        });
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            Ok(this.namespace.kind().to_string())
        });
    }
}

fn create_operation_fn(lua: &Lua, namespace: Arc<ActionNamespace>, op: String) -> LuaResult<Function> {
    lua.create_function(move |lua, args: MultiValue| {
        let ctx = context(lua)?;
        let mut args = args.into_iter().peekable();
        if matches!(args.peek(), Some(LuaValue::UserData(ud)) if ud.is::<LuaNamespace>()) {
            args.next();
        }
        let arg = args.next().unwrap_or(LuaValue::Nil);

        match op.as_str() {
            "new" => {
                let (fields, caller) = split_credentials(&ctx, object_arg(arg)?)?;
                let id = namespace.create(&caller, fields).map_err(raise)?;
                json_to_lua(lua, &id.to_json())
            }
            "view" => {
                let id = lua_to_id(&namespace, arg)?;
                let record = namespace.view(&ctx.caller, &id).map_err(raise)?;
                let proxy = LazyViewProxy::populated(Arc::clone(&namespace), Arc::clone(&ctx.caller), record);
                lua.create_userdata(LuaRecord::new(proxy)).map(LuaValue::UserData)
            }
            _ => {
                let condition = match lua_to_json(arg)? {
                    Value::Null => Condition::All,
                    value => Condition::from_json(&value).map_err(raise)?,
                };
                let records = namespace.search(&ctx.caller, &condition).map_err(raise)?;
                let results = lua.create_table()?;
                for (i, record) in records.into_iter().enumerate() {
                    let proxy = LazyViewProxy::populated(Arc::clone(&namespace), Arc::clone(&ctx.caller), record);
                    results.set(i + 1, LuaRecord::new(proxy))?;
                }
                Ok(LuaValue::Table(results))
            }
        }
    })
}

/// A record proxy. Field reads populate it once; `edit` and special actions
/// go straight to the namespace.
pub struct LuaRecord {
    proxy: LazyViewProxy,
}

impl LuaRecord {
    pub fn new(proxy: LazyViewProxy) -> Self {
        Self { proxy }
    }

    pub fn proxy(&self) -> &LazyViewProxy {
        &self.proxy
    }
}

impl UserData for LuaRecord {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::Index, |lua, this, key: String| {
            let proxy = &this.proxy;
            let descriptor = proxy.namespace().descriptor();
            if key == "edit" || descriptor.has_action(&key) {
                return create_record_fn(lua, proxy, key).map(LuaValue::Function);
            }

            let value = proxy.get(&key).map_err(raise)?;
            match (descriptor.field(&key).map(|f| f.ty), value) {
                (Some(FieldType::Ref(kind)), value) if !value.is_null() => {
                    reference(lua, kind, &value).map(LuaValue::UserData)
                }
                (Some(FieldType::RefList(kind)), Value::Array(items)) => {
                    let list = lua.create_table()?;
                    for (i, item) in items.iter().enumerate() {
                        list.set(i + 1, reference(lua, kind, item)?)?;
                    }
                    Ok(LuaValue::Table(list))
                }
                (_, value) => json_to_lua(lua, &value),
            }
        });
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            Ok(format!("{}[{}]", this.proxy.kind(), this.proxy.id()))
        });
        methods.add_meta_method(MetaMethod::Eq, |_, this, other: mlua::AnyUserData| {
            Ok(other.borrow::<LuaRecord>().is_ok_and(|o| {
                o.proxy.kind() == this.proxy.kind() && o.proxy.id() == this.proxy.id()
            }))
        });
    }
}

/// An unpopulated proxy for a referenced record, viewed as the same caller.
fn reference(lua: &Lua, kind: crate::entities::EntityKind, value: &Value) -> LuaResult<mlua::AnyUserData> {
    let ctx = context(lua)?;
    let id = RecordId::from_json(value)
        .ok_or_else(|| raise(ActionError::StorageStateInconsistent(format!("bad {kind} reference {value}"))))?;
    let proxy = LazyViewProxy::new(Arc::clone(ctx.namespaces.get(kind)), Arc::clone(&ctx.caller), id);
    lua.create_userdata(LuaRecord::new(proxy))
}

fn create_record_fn(lua: &Lua, proxy: &LazyViewProxy, name: String) -> LuaResult<Function> {
    let namespace = Arc::clone(proxy.namespace());
    let id = proxy.id().clone();
    lua.create_function(move |lua, args: MultiValue| {
        let ctx = context(lua)?;
        let mut args = args.into_iter().peekable();
        if matches!(args.peek(), Some(LuaValue::UserData(ud)) if ud.is::<LuaRecord>()) {
            args.next();
        }
        let (fields, caller) =
            split_credentials(&ctx, object_arg(args.next().unwrap_or(LuaValue::Nil))?)?;

        if name == "edit" {
            namespace.edit(&caller, &id, fields).map_err(raise)?;
            Ok(LuaValue::Nil)
        } else {
            let result = namespace.perform(&caller, &id, &name, fields).map_err(raise)?;
            json_to_lua(lua, &result)
        }
    })
}

/// A table argument as a field map; nil is an empty map.
fn object_arg(arg: LuaValue) -> LuaResult<Map<String, Value>> {
    match lua_to_json(arg)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(raise(ActionError::Validation(format!("expected a table of fields, got {other}")))),
    }
}

/// Take `current_password` out of `args`; when present, reauthenticate the
/// invoker and return a caller carrying the fresh credential.
fn split_credentials(
    ctx: &ScriptContext,
    mut args: Map<String, Value>,
) -> LuaResult<(Map<String, Value>, Caller)> {
    let caller = (*ctx.caller).clone();
    match args.remove(CURRENT_PASSWORD) {
        None => Ok((args, caller)),
        Some(Value::String(password)) => {
            let credential = ctx
                .authenticator
                .reauthenticate(caller.identity(), &password)
                .map_err(|e| raise(ActionError::from(e)))?;
            Ok((args, caller.with_credential(credential)))
        }
        Some(_) => Err(raise(ActionError::Validation(format!("{CURRENT_PASSWORD} must be a string")))),
    }
}

/// Interpret a Lua key as an id of `namespace`'s entity.
fn lua_to_id(namespace: &ActionNamespace, key: LuaValue) -> LuaResult<RecordId> {
    let textual = namespace.descriptor().id_policy.is_textual();
    let invalid = |shown: String| {
        raise(ActionError::Validation(format!("'{shown}' is not a {} id", namespace.kind())))
    };
    match key {
        LuaValue::Integer(i) if textual => Ok(RecordId::Text(i.to_string())),
        LuaValue::Integer(i) => Ok(RecordId::Int(i)),
        LuaValue::Number(n) if n.fract() == 0.0 && !textual => Ok(RecordId::Int(n as i64)),
        LuaValue::String(s) => {
            let s = s.to_str()?.to_string();
            if textual {
                Ok(RecordId::Text(s))
            } else {
                s.parse().map(RecordId::Int).map_err(|_| invalid(s))
            }
        }
        LuaValue::UserData(ud) => match ud.borrow::<LuaRecord>() {
            Ok(record) if record.proxy.kind() == namespace.kind() => Ok(record.proxy.id().clone()),
            _ => Err(invalid("userdata".into())),
        },
        other => Err(invalid(other.type_name().to_string())),
    }
}
