use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration as StdDuration;

use chrono::Duration;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::auth::{AuthPolicy, Level, LevelScale};
use crate::entities::{EntityRegistry, LevelTable};
use crate::scripting::SandboxConfig;

#[derive(Debug, Deserialize)]
pub struct ConfigFile {
    pub version: u32,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub levels: LevelsConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Level overrides keyed by entity name (`[entities.Book]`).
    #[serde(default)]
    pub entities: HashMap<String, LevelTable>,
    #[serde(default)]
    pub requests: RequestsConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub scripts: ScriptsConfig,
    /// Display names used by the UI facade, keyed by message key.
    #[serde(default)]
    pub names: HashMap<String, String>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct DatabaseConfig {
    /// Defaults to `$XDG_DATA_HOME/buchschloss/buchschloss.db`.
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LevelsConfig {
    #[serde(default = "default_max_level")]
    pub max: Level,
    /// Display name per level, indexed by level.
    #[serde(default)]
    pub names: Vec<String>,
}

impl Default for LevelsConfig {
    fn default() -> Self {
        Self { max: default_max_level(), names: Vec::new() }
    }
}

fn default_max_level() -> Level {
    LevelScale::default().max
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default = "default_reauth_window")]
    pub reauth_window_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { reauth_window_secs: default_reauth_window() }
    }
}

fn default_reauth_window() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct RequestsConfig {
    /// Allow-list pattern; a URL is fetched only if the pattern matches
    /// somewhere in it. No pattern rejects every request.
    #[serde(default)]
    pub url_pattern: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

impl Default for RequestsConfig {
    fn default() -> Self {
        Self { url_pattern: None, timeout_secs: default_request_timeout() }
    }
}

fn default_request_timeout() -> u64 {
    10
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ScriptsConfig {
    #[serde(default)]
    pub startup: Vec<ScriptEntry>,
    #[serde(default)]
    pub repeating: Vec<RepeatingEntry>,
    /// Per-script settings (`[scripts.lua.<name>]`).
    #[serde(default)]
    pub lua: HashMap<String, ScriptSettings>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ScriptEntry {
    pub name: String,
    /// Global function to call after the chunk has run.
    #[serde(default)]
    pub function: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RepeatingEntry {
    pub name: String,
    #[serde(default)]
    pub function: Option<String>,
    /// Interval such as `30s`, `15m`, `2h`, `1d` or `1w`.
    pub every: String,
}

/// Settings for one script. When present they take precedence over the
/// `permissions`/`setlevel` stored on the Script record.
#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
pub struct ScriptSettings {
    #[serde(default)]
    pub permissions: Option<Vec<String>>,
    #[serde(default)]
    pub setlevel: Option<Level>,
    /// Exposed to the script as the `config` global.
    #[serde(default)]
    pub config: Map<String, Value>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file_level: Option<String>,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), file_level: None, file: None }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// A repeating script with its parsed interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepeatingScript {
    pub name: String,
    pub function: Option<String>,
    pub every: Duration,
}

/// Everything the core needs, validated and with paths expanded.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub database_path: PathBuf,
    pub level_names: Vec<String>,
    pub auth: AuthPolicy,
    pub registry: EntityRegistry,
    pub url_pattern: Option<Regex>,
    pub request_timeout: StdDuration,
    pub sandbox: SandboxConfig,
    pub startup: Vec<ScriptEntry>,
    pub repeating: Vec<RepeatingScript>,
    pub script_settings: HashMap<String, ScriptSettings>,
    pub names: HashMap<String, String>,
    pub logging: LoggingConfig,
}

impl ResolvedConfig {
    pub fn scale(&self) -> LevelScale {
        self.auth.scale
    }

    /// Display name of a level, falling back to the number.
    pub fn level_name(&self, level: Level) -> String {
        self.level_names
            .get(usize::from(level))
            .cloned()
            .unwrap_or_else(|| level.to_string())
    }
}
