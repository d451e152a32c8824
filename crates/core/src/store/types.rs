//! Record store types.

use std::fmt;

use rusqlite::ToSql;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use serde_json::{Map, Value};

use crate::entities::EntityKind;

/// Primary key of a record: an integer or a natural string key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl RecordId {
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(RecordId::Int),
            Value::String(s) => Some(RecordId::Text(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            RecordId::Int(i) => Value::from(*i),
            RecordId::Text(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(i) => write!(f, "{i}"),
            RecordId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        RecordId::Int(value)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        RecordId::Text(value.to_string())
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        RecordId::Text(value)
    }
}

impl ToSql for RecordId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            RecordId::Int(i) => Ok(ToSqlOutput::from(*i)),
            RecordId::Text(s) => Ok(ToSqlOutput::from(s.as_str())),
        }
    }
}

impl FromSql for RecordId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Integer(i) => Ok(RecordId::Int(i)),
            ValueRef::Text(bytes) => std::str::from_utf8(bytes)
                .map(|s| RecordId::Text(s.to_string()))
                .map_err(|e| FromSqlError::Other(Box::new(e))),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

/// A stored entity instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub entity: EntityKind,
    pub id: RecordId,
    pub fields: Map<String, Value>,
}

impl Record {
    /// Field value, with `id` resolving to the record id. Absent fields are
    /// `null`.
    pub fn get(&self, field: &str) -> Value {
        if field == "id" {
            return self.id.to_json();
        }
        self.fields.get(field).cloned().unwrap_or(Value::Null)
    }

    /// All fields plus `id`, as a JSON object.
    pub fn to_json(&self) -> Value {
        let mut map = self.fields.clone();
        map.insert("id".to_string(), self.id.to_json());
        Value::Object(map)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.entity, self.id)
    }
}
