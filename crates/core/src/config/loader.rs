use crate::config::types::{ConfigFile, LoggingConfig, RepeatingScript, ResolvedConfig};
use shellexpand::full;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;
use std::{env, fs};

use chrono::Duration;
use dirs::{data_dir, home_dir};
use regex::Regex;
use thiserror::Error;

use crate::auth::{AuthPolicy, LevelScale};
use crate::entities::EntityRegistry;
use crate::scheduler::parse_interval;

/// Environment variable consulted when no `--config` is given.
pub const CONFIG_ENV: &str = "BUCHSCHLOSS_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found at {0}")]
    NotFound(String),

    #[error("failed to read config file {0}: {1}")]
    ReadError(String, #[source] std::io::Error),

    #[error("failed to parse TOML in {0}: {1}")]
    ParseError(String, #[source] toml::de::Error),

    #[error("version {0} is unsupported (expected 1)")]
    BadVersion(u32),

    #[error("home directory not available to expand '~'")]
    NoHome,

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from `config_path`, else `$BUCHSCHLOSS_CONFIG`, else the XDG
    /// default location.
    pub fn load(config_path: Option<&Path>) -> Result<ResolvedConfig, ConfigError> {
        let path = match config_path {
            Some(p) => p.to_path_buf(),
            None => match env::var(CONFIG_ENV) {
                Ok(p) if !p.is_empty() => expand_path(&p)?,
                _ => default_config_path(),
            },
        };

        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }

        let s = fs::read_to_string(&path)
            .map_err(|e| ConfigError::ReadError(path.display().to_string(), e))?;
        Self::from_toml(&s, &path.display().to_string())
    }

    /// Parse and resolve configuration text; `origin` names it in errors.
    pub fn from_toml(s: &str, origin: &str) -> Result<ResolvedConfig, ConfigError> {
        let cf: ConfigFile =
            toml::from_str(s).map_err(|e| ConfigError::ParseError(origin.to_string(), e))?;

        if cf.version != 1 {
            return Err(ConfigError::BadVersion(cf.version));
        }
        Self::resolve(cf)
    }

    fn resolve(cf: ConfigFile) -> Result<ResolvedConfig, ConfigError> {
        let scale = LevelScale { max: cf.levels.max };
        if cf.levels.names.len() > usize::from(scale.max) + 1 {
            return Err(ConfigError::Invalid(format!(
                "{} level names given for levels 0..={}",
                cf.levels.names.len(),
                scale.max
            )));
        }

        let registry = EntityRegistry::with_overrides(&cf.entities, scale)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let url_pattern = cf
            .requests
            .url_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| ConfigError::Invalid(format!("requests.url_pattern: {e}")))?;

        let repeating = cf
            .scripts
            .repeating
            .iter()
            .map(|entry| {
                let every = parse_interval(&entry.every).map_err(|e| {
                    ConfigError::Invalid(format!("scripts.repeating '{}': {e}", entry.name))
                })?;
                Ok(RepeatingScript {
                    name: entry.name.clone(),
                    function: entry.function.clone(),
                    every,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        for (name, settings) in &cf.scripts.lua {
            if let Some(level) = settings.setlevel.filter(|l| *l > scale.max) {
                return Err(ConfigError::Invalid(format!(
                    "scripts.lua.{name}.setlevel {level} exceeds maximum {}",
                    scale.max
                )));
            }
        }

        let database_path = match &cf.database.path {
            Some(p) => expand_path(p)?,
            None => default_database_path(),
        };

        let logging = match &cf.logging.file {
            Some(file) => LoggingConfig {
                level: cf.logging.level.clone(),
                file_level: cf.logging.file_level.clone(),
                file: Some(expand_path(&file.to_string_lossy())?),
            },
            None => cf.logging.clone(),
        };

        Ok(ResolvedConfig {
            database_path,
            level_names: cf.levels.names,
            auth: AuthPolicy {
                scale,
                reauth_window: Duration::seconds(
                    i64::try_from(cf.auth.reauth_window_secs).unwrap_or(i64::MAX),
                ),
            },
            registry,
            url_pattern,
            request_timeout: StdDuration::from_secs(cf.requests.timeout_secs),
            sandbox: cf.sandbox,
            startup: cf.scripts.startup,
            repeating,
            script_settings: cf.scripts.lua,
            names: cf.names,
            logging,
        })
    }
}

pub fn default_config_path() -> PathBuf {
    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        return Path::new(&xdg).join("buchschloss").join("config.toml");
    }
    let home = home_dir().unwrap_or_else(|| PathBuf::from("~"));
    home.join(".config").join("buchschloss").join("config.toml")
}

pub fn default_database_path() -> PathBuf {
    data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("buchschloss")
        .join("buchschloss.db")
}

fn expand_path(input: &str) -> Result<PathBuf, ConfigError> {
    let expanded = full(input).map_err(|_| ConfigError::NoHome)?;
    Ok(PathBuf::from(expanded.to_string()))
}
