//! The UI facade scripts talk to when a run has a user attached.
//!
//! The core only calls these methods; the CLI provides a terminal
//! implementation.

use std::str::FromStr;

use serde_json::{Map, Value};

use crate::auth::Level;

/// Type of one requested input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    Text,
    Integer,
    Boolean,
    Password,
}

impl FromStr for DataKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "str" | "text" => Ok(DataKind::Text),
            "int" | "integer" => Ok(DataKind::Integer),
            "bool" | "boolean" => Ok(DataKind::Boolean),
            "password" => Ok(DataKind::Password),
            other => Err(format!("unknown input type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataField {
    pub key: String,
    /// Already resolved display label.
    pub label: String,
    pub kind: DataKind,
}

pub trait UiFacade {
    fn alert(&self, message: &str);

    fn ask(&self, question: &str) -> bool;

    fn display(&self, data: &Value);

    /// `None` means the user cancelled.
    fn get_data(&self, fields: &[DataField]) -> Option<Map<String, Value>>;

    /// Display name for an internal key, or the key itself.
    fn get_name(&self, key: &str) -> String;

    fn get_level_name(&self, level: Level) -> String;
}

/// Substitute `{}` placeholders in order; surplus arguments are ignored.
pub fn format_message(template: &str, args: &[String]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut args = args.iter();
    let mut rest = template;
    while let Some(pos) = rest.find("{}") {
        out.push_str(&rest[..pos]);
        match args.next() {
            Some(arg) => out.push_str(arg),
            None => out.push_str("{}"),
        }
        rest = &rest[pos + 2..];
    }
    out.push_str(rest);
    out
}
