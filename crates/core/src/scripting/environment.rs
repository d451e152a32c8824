//! One sandboxed environment per script activation.
//!
//! The injected globals are the whole contract between a script and the
//! host:
//!
//! - `buchschloss` - one namespace per entity type plus `login_context`,
//!   `check_level`, `get_storage` and `set_storage`
//! - `requests` - `requests.get(url, type?)`
//! - `ui` - only when a UI is attached to the run
//! - `config` - the script's configuration table

use std::rc::Rc;
use std::sync::Arc;

use mlua::{Lua, Result as LuaResult};
use serde_json::{Map, Value};

use super::bindings::{register_buchschloss_table, register_requests_table, register_ui_table};
use super::capabilities::CapabilitySet;
use super::convert::map_to_lua;
use super::engine::LuaEngine;
use super::fetch::Fetcher;
use super::types::{SandboxConfig, ScriptingError};
use super::ui::UiFacade;
use crate::actions::Namespaces;
use crate::auth::{Authenticator, Caller, Identity};
use crate::store::RecordStore;

/// Everything the bindings of one activation need. Built fresh per run and
/// never shared between runs.
pub struct ScriptContext {
    pub name: String,
    pub caps: CapabilitySet,
    /// Identity all namespace calls are made with.
    pub caller: Arc<Caller>,
    /// Who triggered the run; `check_level` and reauthentication use it.
    pub invoker: Identity,
    pub namespaces: Namespaces,
    pub store: Arc<dyn RecordStore>,
    pub authenticator: Arc<Authenticator>,
    pub fetcher: Arc<Fetcher>,
    pub ui: Option<Rc<dyn UiFacade>>,
}

/// The context of the Lua state a binding runs in.
pub(crate) fn context(lua: &Lua) -> LuaResult<Rc<ScriptContext>> {
    lua.app_data_ref::<Rc<ScriptContext>>()
        .map(|ctx| Rc::clone(&ctx))
        .ok_or_else(|| mlua::Error::runtime("script context not available"))
}

pub struct ScriptEnvironment {
    engine: LuaEngine,
    name: String,
}

impl ScriptEnvironment {
    pub fn new(
        sandbox: &SandboxConfig,
        ctx: ScriptContext,
        config: &Map<String, Value>,
    ) -> Result<Self, ScriptingError> {
        let engine = LuaEngine::new(sandbox)?;
        let lua = engine.lua();
        let name = ctx.name.clone();
        let has_ui = ctx.ui.is_some();

        lua.set_app_data(Rc::new(ctx));
        register_buchschloss_table(lua)?;
        register_requests_table(lua)?;
        if has_ui {
            register_ui_table(lua)?;
        }
        lua.globals().set("config", map_to_lua(lua, config)?)?;

        Ok(Self { engine, name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the script body.
    pub fn exec(&self, code: &str) -> Result<(), ScriptingError> {
        self.engine.exec(&self.name, code)
    }

    /// Call a global function defined by the script body.
    pub fn call(&self, function: &str) -> Result<(), ScriptingError> {
        self.engine.call_global(&self.name, function)
    }

    /// Evaluate a snippet and render its value (REPL use).
    pub fn eval(&self, snippet: &str) -> Result<Option<String>, ScriptingError> {
        self.engine.eval(snippet)
    }

    pub fn lua(&self) -> &Lua {
        self.engine.lua()
    }
}
