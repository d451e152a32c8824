//! Terminal implementation of the UI facade scripts talk to.

use std::collections::HashMap;
use std::io::{self, IsTerminal};

use buchschloss_core::auth::Level;
use buchschloss_core::config::ResolvedConfig;
use buchschloss_core::scripting::{DataField, DataKind, UiFacade};
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input, Password};
use serde_json::{Map, Value};

pub struct TerminalUi {
    names: HashMap<String, String>,
    level_names: Vec<String>,
    interactive: bool,
}

impl TerminalUi {
    pub fn new(cfg: &ResolvedConfig) -> Self {
        Self {
            names: cfg.names.clone(),
            level_names: cfg.level_names.clone(),
            interactive: io::stdin().is_terminal(),
        }
    }

    fn read_field(&self, theme: &ColorfulTheme, field: &DataField) -> Result<Value, dialoguer::Error> {
        Ok(match field.kind {
            DataKind::Text => {
                Value::String(Input::<String>::with_theme(theme).with_prompt(&field.label).interact_text()?)
            }
            DataKind::Integer => {
                Value::from(Input::<i64>::with_theme(theme).with_prompt(&field.label).interact_text()?)
            }
            DataKind::Boolean => {
                Value::Bool(Confirm::with_theme(theme).with_prompt(&field.label).interact()?)
            }
            DataKind::Password => {
                Value::String(Password::with_theme(theme).with_prompt(&field.label).interact()?)
            }
        })
    }
}

impl UiFacade for TerminalUi {
    fn alert(&self, message: &str) {
        eprintln!("! {message}");
    }

    fn ask(&self, question: &str) -> bool {
        if !self.interactive {
            return false;
        }
        Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(question)
            .default(false)
            .interact()
            .unwrap_or(false)
    }

    fn display(&self, data: &Value) {
        match data {
            Value::String(s) => println!("{s}"),
            other => match serde_json::to_string_pretty(other) {
                Ok(s) => println!("{s}"),
                Err(_) => println!("{other}"),
            },
        }
    }

    fn get_data(&self, fields: &[DataField]) -> Option<Map<String, Value>> {
        if !self.interactive {
            return None;
        }
        let theme = ColorfulTheme::default();
        let mut data = Map::new();
        for field in fields {
            let value = self.read_field(&theme, field).ok()?;
            data.insert(field.key.clone(), value);
        }
        Some(data)
    }

    fn get_name(&self, key: &str) -> String {
        self.names.get(key).cloned().unwrap_or_else(|| key.to_string())
    }

    fn get_level_name(&self, level: Level) -> String {
        self.level_names
            .get(usize::from(level))
            .cloned()
            .unwrap_or_else(|| level.to_string())
    }
}

/// Prompt for a password, or fail when stdin is not a terminal.
pub fn prompt_password(prompt: &str) -> io::Result<String> {
    if !io::stdin().is_terminal() {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "no terminal to prompt for a password"));
    }
    Password::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .interact()
        .map_err(|dialoguer::Error::IO(e)| e)
}
