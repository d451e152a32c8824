//! Search conditions.
//!
//! Conditions are small boolean trees, written as nested lists:
//!
//! - `[]` matches everything
//! - `[field, op, value]` with `op` one of `eq ne lt gt le ge contains`
//! - `[field, "exists"]`
//! - `[cond, "and" | "or", cond]`
//! - `["not", cond]`
//!
//! The store evaluates them; this module only parses and translates to SQL.

use std::fmt;
use std::str::FromStr;

use rusqlite::types::Value as SqlValue;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConditionError {
    #[error("malformed condition: {0}")]
    Malformed(String),

    #[error("unknown comparison '{0}'")]
    UnknownOperator(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    /// List membership or substring.
    Contains,
}

impl FromStr for CompareOp {
    type Err = ConditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "eq" => CompareOp::Eq,
            "ne" => CompareOp::Ne,
            "lt" => CompareOp::Lt,
            "gt" => CompareOp::Gt,
            "le" => CompareOp::Le,
            "ge" => CompareOp::Ge,
            "contains" => CompareOp::Contains,
            other => return Err(ConditionError::UnknownOperator(other.to_string())),
        })
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CompareOp::Eq => "eq",
            CompareOp::Ne => "ne",
            CompareOp::Lt => "lt",
            CompareOp::Gt => "gt",
            CompareOp::Le => "le",
            CompareOp::Ge => "ge",
            CompareOp::Contains => "contains",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    All,
    Compare { field: String, op: CompareOp, value: Value },
    Exists(String),
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    pub fn compare(field: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Condition::Compare { field: field.into(), op, value: value.into() }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Eq, value)
    }

    pub fn and(self, other: Condition) -> Self {
        Condition::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Condition) -> Self {
        Condition::Or(Box::new(self), Box::new(other))
    }

    pub fn negate(self) -> Self {
        Condition::Not(Box::new(self))
    }

    pub fn from_json(value: &Value) -> Result<Self, ConditionError> {
        let malformed = || ConditionError::Malformed(value.to_string());
        let items = match value {
            Value::Array(items) => items.as_slice(),
            Value::Object(map) if map.is_empty() => return Ok(Condition::All),
            _ => return Err(malformed()),
        };

        match items {
            [] => Ok(Condition::All),
            [Value::String(not), inner] if not == "not" => {
                Ok(Condition::from_json(inner)?.negate())
            }
            [Value::String(field), Value::String(op)] if op == "exists" => {
                Ok(Condition::Exists(field.clone()))
            }
            [left @ Value::Array(_), Value::String(op), right @ Value::Array(_)] => {
                let (left, right) = (Condition::from_json(left)?, Condition::from_json(right)?);
                match op.as_str() {
                    "and" => Ok(left.and(right)),
                    "or" => Ok(left.or(right)),
                    other => Err(ConditionError::UnknownOperator(other.to_string())),
                }
            }
            [Value::String(field), Value::String(op), operand] => match operand {
                Value::Array(_) | Value::Object(_) => Err(malformed()),
                _ => Ok(Condition::compare(field.clone(), op.parse()?, operand.clone())),
            },
            _ => Err(malformed()),
        }
    }

    /// Every field name the condition refers to.
    pub fn fields(&self) -> Vec<&str> {
        match self {
            Condition::All => Vec::new(),
            Condition::Compare { field, .. } | Condition::Exists(field) => vec![field.as_str()],
            Condition::And(a, b) | Condition::Or(a, b) => {
                let mut out = a.fields();
                out.extend(b.fields());
                out
            }
            Condition::Not(inner) => inner.fields(),
        }
    }

    /// Translate into a SQL expression over the `records` table, pushing
    /// bound values onto `params` and referring to them by position.
    pub(crate) fn to_sql(&self, params: &mut Vec<SqlValue>) -> String {
        match self {
            Condition::All => "1".to_string(),
            Condition::Exists(field) if field == "id" => "1".to_string(),
            Condition::Exists(field) => {
                let path = bind(params, SqlValue::Text(json_path(field)));
                format!(
                    "(json_type(fields_json, {path}) IS NOT NULL \
                     AND json_type(fields_json, {path}) != 'null')"
                )
            }
            Condition::Compare { field, op, value } => {
                let sql_op = match op {
                    CompareOp::Contains => return contains_sql(params, field, value),
                    CompareOp::Eq => "=",
                    CompareOp::Ne => "IS NOT",
                    CompareOp::Lt => "<",
                    CompareOp::Gt => ">",
                    CompareOp::Le => "<=",
                    CompareOp::Ge => ">=",
                };
                let column = column(params, field);
                if value.is_null() {
                    return match op {
                        CompareOp::Ne => format!("({column} IS NOT NULL)"),
                        _ => format!("({column} IS NULL)"),
                    };
                }
                let operand = bind(params, sql_value(value));
                format!("({column} {sql_op} {operand})")
            }
            Condition::And(a, b) => format!("({} AND {})", a.to_sql(params), b.to_sql(params)),
            Condition::Or(a, b) => format!("({} OR {})", a.to_sql(params), b.to_sql(params)),
            Condition::Not(inner) => format!("(NOT COALESCE({}, 0))", inner.to_sql(params)),
        }
    }
}

fn bind(params: &mut Vec<SqlValue>, value: SqlValue) -> String {
    params.push(value);
    format!("?{}", params.len())
}

fn contains_sql(params: &mut Vec<SqlValue>, field: &str, value: &Value) -> String {
    let needle = bind(params, sql_value(value));
    if field == "id" {
        return format!("(instr(id, {needle}) > 0)");
    }
    let path = bind(params, SqlValue::Text(json_path(field)));
    format!(
        "(CASE json_type(fields_json, {path}) \
         WHEN 'array' THEN EXISTS (SELECT 1 FROM json_each(records.fields_json, {path}) \
         WHERE json_each.value = {needle}) \
         ELSE instr(json_extract(fields_json, {path}), {needle}) > 0 END)"
    )
}

fn json_path(field: &str) -> String {
    format!("$.\"{field}\"")
}

fn column(params: &mut Vec<SqlValue>, field: &str) -> String {
    if field == "id" {
        return "id".to_string();
    }
    let path = bind(params, SqlValue::Text(json_path(field)));
    format!("json_extract(fields_json, {path})")
}

fn sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_compare() {
        let c = Condition::from_json(&json!(["title", "eq", "Dune"])).unwrap();
        assert_eq!(c, Condition::eq("title", "Dune"));
    }

    #[test]
    fn test_parse_nested() {
        let c = Condition::from_json(&json!([
            ["year", "gt", 1990],
            "and",
            ["not", ["series", "exists"]]
        ]))
        .unwrap();
        let expected = Condition::compare("year", CompareOp::Gt, 1990)
            .and(Condition::Exists("series".into()).negate());
        assert_eq!(c, expected);
        assert_eq!(c.fields(), vec!["year", "series"]);
    }

    #[test]
    fn test_parse_empty_matches_all() {
        assert_eq!(Condition::from_json(&json!([])).unwrap(), Condition::All);
        assert_eq!(Condition::from_json(&json!({})).unwrap(), Condition::All);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            Condition::from_json(&json!(["title", "like", "x"])),
            Err(ConditionError::UnknownOperator(_))
        ));
        assert!(matches!(
            Condition::from_json(&json!([["a", "eq", 1], "xor", ["b", "eq", 2]])),
            Err(ConditionError::UnknownOperator(_))
        ));
        assert!(matches!(
            Condition::from_json(&json!(["title", "eq", [1, 2]])),
            Err(ConditionError::Malformed(_))
        ));
        assert!(matches!(Condition::from_json(&json!("title")), Err(ConditionError::Malformed(_))));
    }

    #[test]
    fn test_sql_binds_positionally() {
        let mut params = vec![SqlValue::Text("Book".into())];
        let sql = Condition::eq("title", "Dune").to_sql(&mut params);
        assert_eq!(sql, "(json_extract(fields_json, ?2) = ?3)");
        assert_eq!(params.len(), 3);
    }
}
