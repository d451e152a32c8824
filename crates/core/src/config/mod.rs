//! TOML configuration: file types and the loader that resolves them.

pub mod loader;
pub mod types;

pub use loader::{CONFIG_ENV, ConfigError, ConfigLoader, default_config_path};
pub use types::{
    ConfigFile, LoggingConfig, RepeatingScript, ResolvedConfig, ScriptEntry, ScriptSettings,
};
