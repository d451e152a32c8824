//! Lua scripting engine with sandboxing.
//!
//! Only the `table`, `string`, `utf8` and `math` libraries are loaded and
//! every global that could load code, touch the filesystem or the process
//! is removed. Bindings are added on top by [`super::environment`].

use mlua::{Lua, Result as LuaResult, StdLib, Value};

use super::types::{SandboxConfig, ScriptingError};

/// A sandboxed Lua execution environment.
pub struct LuaEngine {
    lua: Lua,
}

impl LuaEngine {
    /// Create a new Lua engine with the given sandbox configuration.
    pub fn new(config: &SandboxConfig) -> Result<Self, ScriptingError> {
        // Base functions (print, type, tostring, pcall, ...) are always present.
        let libs = StdLib::TABLE | StdLib::STRING | StdLib::UTF8 | StdLib::MATH;

        let lua = Lua::new_with(libs, mlua::LuaOptions::default())?;

        if config.memory_limit > 0 {
            lua.set_memory_limit(config.memory_limit)?;
        }

        Self::apply_sandbox(&lua)?;

        Ok(Self { lua })
    }

    /// Create a new engine with default restrictive sandbox.
    pub fn sandboxed() -> Result<Self, ScriptingError> {
        Self::new(&SandboxConfig::restricted())
    }

    /// Run a chunk for its side effects. `name` shows up in Lua tracebacks.
    pub fn exec(&self, name: &str, code: &str) -> Result<(), ScriptingError> {
        self.lua.load(code).set_name(name).exec()?;
        Ok(())
    }

    /// Execute a Lua snippet and render its result.
    ///
    /// Returns `None` if the script returns nil or no value.
    pub fn eval(&self, script: &str) -> Result<Option<String>, ScriptingError> {
        let value: Value = self.lua.load(script).eval()?;

        match value {
            Value::Nil => Ok(None),
            Value::String(s) => Ok(Some(s.to_str()?.to_string())),
            Value::Integer(i) => Ok(Some(i.to_string())),
            Value::Number(n) => Ok(Some(n.to_string())),
            Value::Boolean(b) => Ok(Some(b.to_string())),
            other => Ok(Some(other.to_string()?)),
        }
    }

    /// Call a global function with no arguments.
    pub fn call_global(&self, script: &str, function: &str) -> Result<(), ScriptingError> {
        match self.lua.globals().get::<Value>(function)? {
            Value::Function(f) => {
                f.call::<()>(())?;
                Ok(())
            }
            _ => Err(ScriptingError::FunctionNotFound {
                script: script.to_string(),
                function: function.to_string(),
            }),
        }
    }

    /// Get a reference to the underlying Lua state.
    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// Apply sandbox restrictions by removing dangerous globals.
    fn apply_sandbox(lua: &Lua) -> LuaResult<()> {
        let globals = lua.globals();

        for name in [
            "dofile",
            "loadfile",
            "load",
            "require",
            "package",
            "io",
            "os",
            "debug",
            "collectgarbage",
        ] {
            globals.set(name, Value::Nil)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("io")]
    #[case("os")]
    #[case("require")]
    #[case("load")]
    #[case("dofile")]
    #[case("debug")]
    #[case("collectgarbage")]
    fn test_sandbox_removes(#[case] global: &str) {
        let engine = LuaEngine::sandboxed().unwrap();
        let result = engine.eval(global).unwrap();
        assert!(result.is_none(), "{global} should be nil in sandbox");
    }

    #[test]
    fn test_pure_lua_string() {
        let engine = LuaEngine::sandboxed().unwrap();
        let result = engine.eval(r#"string.upper("hello")"#).unwrap();
        assert_eq!(result.as_deref(), Some("HELLO"));
    }

    #[test]
    fn test_pure_lua_table() {
        let engine = LuaEngine::sandboxed().unwrap();
        let result = engine.eval(r#"local t = {1, 2, 3}; return #t"#).unwrap();
        assert_eq!(result.as_deref(), Some("3"));
    }

    #[test]
    fn test_pure_lua_math_functions() {
        let engine = LuaEngine::sandboxed().unwrap();
        let result = engine.eval(r#"math.floor(3.7)"#).unwrap();
        assert_eq!(result.as_deref(), Some("3"));
    }

    #[test]
    fn test_eval_returns_none_for_no_return() {
        let engine = LuaEngine::sandboxed().unwrap();
        assert!(engine.eval(r#"local x = 1"#).unwrap().is_none());
    }

    #[test]
    fn test_runtime_error() {
        let engine = LuaEngine::sandboxed().unwrap();
        let err = engine.exec("broken", r#"error("boom")"#).unwrap_err();
        assert!(matches!(err, ScriptingError::Runtime(_)));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_call_global() {
        let engine = LuaEngine::sandboxed().unwrap();
        engine.exec("s", "ran = false; function go() ran = true end").unwrap();
        engine.call_global("s", "go").unwrap();
        assert_eq!(engine.eval("ran").unwrap().as_deref(), Some("true"));
        assert!(matches!(
            engine.call_global("s", "missing"),
            Err(ScriptingError::FunctionNotFound { .. })
        ));
    }

    #[test]
    fn test_memory_limit() {
        let engine = LuaEngine::new(&SandboxConfig { memory_limit: 256 * 1024 }).unwrap();
        let result = engine.exec("hog", "local t = {} for i = 1, 1e7 do t[i] = i end");
        assert!(result.is_err());
    }
}
