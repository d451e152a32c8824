//! Field-level validation for `new` and `edit`.

use chrono::NaiveDate;
use serde_json::{Map, Value};
use thiserror::Error;

use super::descriptor::{EntityDescriptor, EntityKind, FieldDefault, FieldSpec, FieldType};
use crate::auth::LevelScale;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FieldError {
    #[error("{entity} has no field '{field}'")]
    UnknownField { entity: EntityKind, field: String },

    #[error("{entity} requires field '{field}'")]
    Missing { entity: EntityKind, field: &'static str },

    #[error("field '{field}' must be {expected}")]
    WrongType { field: &'static str, expected: &'static str },

    #[error("level {level} in field '{field}' exceeds the maximum level {max}")]
    LevelOutOfRange { field: &'static str, level: u64, max: u8 },

    #[error("fields '{first}' and '{second}' must be set together")]
    Companion { first: &'static str, second: &'static str },

    #[error("field '{0}' is the record key and cannot be edited")]
    KeyChange(&'static str),

    #[error("field '{0}' is write-only and cannot be edited directly")]
    SecretEdit(&'static str),
}

/// Outcome of validating a `new` request.
#[derive(Debug, Clone, PartialEq)]
pub struct Validated {
    /// Fields to persist, defaults filled in, secrets removed.
    pub fields: Map<String, Value>,
    /// Secret field values, to be hashed by the caller.
    pub secrets: Vec<(&'static str, String)>,
}

pub fn validate_new(
    desc: &EntityDescriptor,
    mut input: Map<String, Value>,
    scale: LevelScale,
) -> Result<Validated, FieldError> {
    reject_unknown(desc, &input)?;

    let mut fields = Map::new();
    let mut secrets = Vec::new();
    for spec in &desc.fields {
        let value = input.remove(spec.name).filter(|v| !v.is_null());
        let value = match (value, spec.default) {
            (Some(v), _) => v,
            (None, Some(default)) => default_value(default),
            (None, None) if spec.required => {
                return Err(FieldError::Missing { entity: desc.kind, field: spec.name });
            }
            (None, None) => continue,
        };
        check_value(spec, &value, scale)?;
        if spec.secret {
            if let Value::String(s) = value {
                secrets.push((spec.name, s));
            }
        } else {
            fields.insert(spec.name.to_string(), value);
        }
    }

    check_companions(desc, &fields)?;
    Ok(Validated { fields, secrets })
}

/// Validate `changes` against `current` and return the merged field set.
///
/// `null` removes an optional field.
pub fn validate_edit(
    desc: &EntityDescriptor,
    current: &Map<String, Value>,
    changes: Map<String, Value>,
    scale: LevelScale,
) -> Result<Map<String, Value>, FieldError> {
    reject_unknown(desc, &changes)?;

    let mut merged = current.clone();
    for (name, value) in changes {
        let Some(spec) = desc.field(&name) else { continue };
        if spec.secret {
            return Err(FieldError::SecretEdit(spec.name));
        }
        if desc.id_policy.key_field() == Some(spec.name) {
            if current.get(spec.name) == Some(&value) {
                continue;
            }
            return Err(FieldError::KeyChange(spec.name));
        }
        if value.is_null() {
            if spec.required {
                return Err(FieldError::Missing { entity: desc.kind, field: spec.name });
            }
            merged.remove(&name);
            continue;
        }
        check_value(spec, &value, scale)?;
        merged.insert(name, value);
    }

    check_companions(desc, &merged)?;
    Ok(merged)
}

/// Both-or-neither check over the descriptor's companion pairs.
pub fn check_companions(
    desc: &EntityDescriptor,
    fields: &Map<String, Value>,
) -> Result<(), FieldError> {
    let present = |name: &str| fields.get(name).is_some_and(|v| !v.is_null());
    for &(first, second) in &desc.companions {
        if present(first) != present(second) {
            return Err(FieldError::Companion { first, second });
        }
    }
    Ok(())
}

fn reject_unknown(desc: &EntityDescriptor, input: &Map<String, Value>) -> Result<(), FieldError> {
    match input.keys().find(|k| desc.field(k).is_none()) {
        Some(field) => Err(FieldError::UnknownField { entity: desc.kind, field: field.clone() }),
        None => Ok(()),
    }
}

fn default_value(default: FieldDefault) -> Value {
    match default {
        FieldDefault::Bool(b) => Value::Bool(b),
        FieldDefault::Int(i) => Value::from(i),
    }
}

fn check_value(spec: &FieldSpec, value: &Value, scale: LevelScale) -> Result<(), FieldError> {
    let wrong = |expected| Err(FieldError::WrongType { field: spec.name, expected });
    match spec.ty {
        FieldType::Integer if value.as_i64().is_none() => wrong("an integer"),
        FieldType::Text if !value.is_string() => wrong("text"),
        FieldType::Boolean if !value.is_boolean() => wrong("a boolean"),
        FieldType::Date => match value.as_str() {
            Some(s) if NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() => Ok(()),
            _ => wrong("a date (YYYY-MM-DD)"),
        },
        FieldType::TextList => match value.as_array() {
            Some(items) if items.iter().all(Value::is_string) => Ok(()),
            _ => wrong("a list of text"),
        },
        FieldType::Level => match value.as_u64() {
            Some(level) if level <= u64::from(scale.max) => Ok(()),
            Some(level) => {
                Err(FieldError::LevelOutOfRange { field: spec.name, level, max: scale.max })
            }
            None => wrong("a level"),
        },
        FieldType::Ref(kind) if !is_reference(kind, value) => wrong(reference_kind(kind)),
        FieldType::RefList(kind) => match value.as_array() {
            Some(items) if items.iter().all(|v| is_reference(kind, v)) => Ok(()),
            _ => wrong("a list of references"),
        },
        _ => Ok(()),
    }
}

fn is_reference(kind: EntityKind, value: &Value) -> bool {
    if kind.id_policy().is_textual() { value.is_string() } else { value.as_i64().is_some() }
}

fn reference_kind(kind: EntityKind) -> &'static str {
    if kind.id_policy().is_textual() { "a name reference" } else { "an id reference" }
}
