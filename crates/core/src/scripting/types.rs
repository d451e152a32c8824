//! Scripting types and error definitions.

use serde::Deserialize;
use thiserror::Error;

use crate::actions::ActionError;
use crate::store::StoreError;

/// Errors that can occur while preparing or running a script.
#[derive(Debug, Error)]
pub enum ScriptingError {
    /// A typed failure raised by an action namespace or a gated binding,
    /// recovered from inside the Lua error chain.
    #[error(transparent)]
    Action(#[from] ActionError),

    /// Any other failure raised during script execution.
    #[error("script error: {0}")]
    Runtime(mlua::Error),

    #[error("script '{0}' not found")]
    ScriptNotFound(String),

    #[error("script '{script}' defines no function '{function}'")]
    FunctionNotFound { script: String, function: String },

    #[error("script '{script}' is misconfigured: {reason}")]
    Config { script: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<mlua::Error> for ScriptingError {
    fn from(err: mlua::Error) -> Self {
        match action_error(&err) {
            Some(action) => ScriptingError::Action(action),
            None => ScriptingError::Runtime(err),
        }
    }
}

/// Find an [`ActionError`] raised by a binding anywhere in a Lua error chain.
pub fn action_error(err: &mlua::Error) -> Option<ActionError> {
    match err {
        mlua::Error::ExternalError(inner) => inner.downcast_ref::<ActionError>().cloned(),
        mlua::Error::CallbackError { cause, .. } => action_error(cause),
        mlua::Error::WithContext { cause, .. } => action_error(cause),
        _ => None,
    }
}

/// Raise an [`ActionError`] into Lua so it can be recovered later.
pub(crate) fn raise(err: impl Into<ActionError>) -> mlua::Error {
    mlua::Error::external(err.into())
}

/// Configuration for the Lua sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SandboxConfig {
    /// Maximum memory the Lua VM can allocate (in bytes). 0 = unlimited.
    #[serde(default = "default_memory_limit")]
    pub memory_limit: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self::restricted()
    }
}

impl SandboxConfig {
    /// A restrictive sandbox suitable for user scripts.
    pub fn restricted() -> Self {
        Self { memory_limit: default_memory_limit() }
    }
}

fn default_memory_limit() -> usize {
    10 * 1024 * 1024 // 10 MB
}
