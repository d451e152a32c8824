//! Conversion between Lua values and JSON documents.

use mlua::{Lua, Result as LuaResult, Table, Value as LuaValue};
use serde_json::{Map, Number, Value};

use super::record_bindings::LuaRecord;

const MAX_DEPTH: usize = 64;

/// Largest float that still converts to an exact integer.
const EXACT_INT_LIMIT: f64 = 9_007_199_254_740_992.0;

pub fn json_to_lua(lua: &Lua, value: &Value) -> LuaResult<LuaValue> {
    match value {
        Value::Null => Ok(LuaValue::Nil),
        Value::Bool(b) => Ok(LuaValue::Boolean(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(LuaValue::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(LuaValue::Number(f))
            } else {
                Ok(LuaValue::Nil)
            }
        }
        Value::String(s) => Ok(LuaValue::String(lua.create_string(s)?)),
        Value::Array(items) => {
            let table = lua.create_table()?;
            for (i, item) in items.iter().enumerate() {
                table.set(i + 1, json_to_lua(lua, item)?)?;
            }
            Ok(LuaValue::Table(table))
        }
        Value::Object(map) => Ok(LuaValue::Table(map_to_lua(lua, map)?)),
    }
}

pub fn map_to_lua(lua: &Lua, map: &Map<String, Value>) -> LuaResult<Table> {
    let table = lua.create_table()?;
    for (k, v) in map {
        table.set(k.as_str(), json_to_lua(lua, v)?)?;
    }
    Ok(table)
}

/// Convert a Lua value into JSON.
///
/// Sequences become arrays, any other table (including an empty one)
/// becomes an object. Record proxies convert to their id.
pub fn lua_to_json(value: LuaValue) -> LuaResult<Value> {
    to_json(value, 0)
}

/// Like [`lua_to_json`] but the result must be an object.
pub fn table_to_map(table: Table) -> LuaResult<Map<String, Value>> {
    match to_json(LuaValue::Table(table), 0)? {
        Value::Object(map) => Ok(map),
        Value::Array(_) => Err(mlua::Error::runtime("expected a table with string keys, got a list")),
        _ => Ok(Map::new()),
    }
}

fn to_json(value: LuaValue, depth: usize) -> LuaResult<Value> {
    if depth > MAX_DEPTH {
        return Err(mlua::Error::runtime("table nesting too deep (cyclic table?)"));
    }
    match value {
        LuaValue::Nil => Ok(Value::Null),
        LuaValue::Boolean(b) => Ok(Value::Bool(b)),
        LuaValue::Integer(i) => Ok(Value::from(i)),
        LuaValue::Number(n) => {
            if n.fract() == 0.0 && n.abs() < EXACT_INT_LIMIT {
                Ok(Value::from(n as i64))
            } else {
                Number::from_f64(n)
                    .map(Value::Number)
                    .ok_or_else(|| mlua::Error::runtime(format!("cannot store number {n}")))
            }
        }
        LuaValue::String(s) => Ok(Value::String(s.to_str()?.to_string())),
        LuaValue::Table(t) => table_to_json(t, depth),
        LuaValue::UserData(ud) => match ud.borrow::<LuaRecord>() {
            Ok(record) => Ok(record.proxy().id().to_json()),
            Err(_) => Err(mlua::Error::runtime("cannot convert userdata to data")),
        },
        other => Err(mlua::Error::runtime(format!(
            "cannot convert a {} to data",
            other.type_name()
        ))),
    }
}

fn table_to_json(table: Table, depth: usize) -> LuaResult<Value> {
    let len = table.raw_len();
    let mut pairs = Vec::new();
    for pair in table.pairs::<LuaValue, LuaValue>() {
        pairs.push(pair?);
    }

    if len > 0 && pairs.len() == len {
        let mut items = Vec::with_capacity(len);
        for i in 1..=len {
            items.push(to_json(table.raw_get(i)?, depth + 1)?);
        }
        return Ok(Value::Array(items));
    }

    let mut map = Map::new();
    for (key, value) in pairs {
        let key = match key {
            LuaValue::String(s) => s.to_str()?.to_string(),
            LuaValue::Integer(i) => i.to_string(),
            other => {
                return Err(mlua::Error::runtime(format!(
                    "table keys must be strings, got a {}",
                    other.type_name()
                )));
            }
        };
        map.insert(key, to_json(value, depth + 1)?);
    }
    Ok(Value::Object(map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(lua: &Lua, code: &str) -> Value {
        lua_to_json(lua.load(code).eval().unwrap()).unwrap()
    }

    #[test]
    fn test_lua_shapes() {
        let lua = Lua::new();
        assert_eq!(eval(&lua, "{}"), json!({}));
        assert_eq!(eval(&lua, "{1, 2, 'x'}"), json!([1, 2, "x"]));
        assert_eq!(eval(&lua, "{a = {b = true}}"), json!({"a": {"b": true}}));
        assert_eq!(eval(&lua, "3.0"), json!(3));
        assert_eq!(eval(&lua, "2.5"), json!(2.5));
    }

    #[test]
    fn test_sparse_table_is_object() {
        let lua = Lua::new();
        assert_eq!(eval(&lua, "{[1] = 'a', [3] = 'c'}"), json!({"1": "a", "3": "c"}));
    }

    #[test]
    fn test_functions_rejected() {
        let lua = Lua::new();
        let value: LuaValue = lua.load("{f = function() end}").eval().unwrap();
        assert!(lua_to_json(value).is_err());
    }

    #[test]
    fn test_cycle_rejected() {
        let lua = Lua::new();
        let value: LuaValue = lua.load("local t = {} t.self = t return t").eval().unwrap();
        assert!(lua_to_json(value).is_err());
    }

    #[test]
    fn test_json_into_lua() {
        let lua = Lua::new();
        let doc = json!({"count": 2, "names": ["a", "b"], "nested": {"ok": true}});
        lua.globals().set("doc", json_to_lua(&lua, &doc).unwrap()).unwrap();
        let check: bool = lua
            .load("return doc.count == 2 and doc.names[2] == 'b' and doc.nested.ok")
            .eval()
            .unwrap();
        assert!(check);
    }
}
