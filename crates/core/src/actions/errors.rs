use thiserror::Error;

use crate::auth::AuthError;
use crate::entities::{EntityKind, FieldError};
use crate::store::{ConditionError, RecordId, StoreError};

/// Failures raised by action namespaces and capability-gated bindings.
///
/// Cloneable so it can cross the Lua boundary and be recovered intact.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ActionError {
    #[error("access to {operation} denied to {identity}")]
    PermissionDenied { identity: String, operation: String },

    #[error("{operation} requires reauthentication")]
    ReauthenticationRequired { operation: String },

    #[error("reauthentication window expired")]
    ReauthenticationWindowExpired,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("request rejected: {0}")]
    RequestRejected(String),

    #[error("capability {0} not granted")]
    CapabilityAbsent(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{entity}[{id}] not found")]
    NotFound { entity: EntityKind, id: RecordId },

    #[error("invalid condition: {0}")]
    InvalidCondition(String),

    #[error("inconsistent stored state: {0}")]
    StorageStateInconsistent(String),

    #[error("storage error: {0}")]
    Store(String),
}

impl ActionError {
    pub fn from_auth(err: AuthError, operation: &str) -> Self {
        match err {
            AuthError::InvalidCredentials => ActionError::InvalidCredentials,
            AuthError::ReauthenticationRequired => {
                ActionError::ReauthenticationRequired { operation: operation.to_string() }
            }
            AuthError::ReauthenticationWindowExpired => ActionError::ReauthenticationWindowExpired,
            AuthError::Hash(msg) => ActionError::Store(msg),
            AuthError::Store(e) => e.into(),
        }
    }
}

impl From<AuthError> for ActionError {
    fn from(err: AuthError) -> Self {
        ActionError::from_auth(err, "operation")
    }
}

impl From<StoreError> for ActionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate { .. } => ActionError::Validation(err.to_string()),
            other => ActionError::Store(other.to_string()),
        }
    }
}

impl From<FieldError> for ActionError {
    fn from(err: FieldError) -> Self {
        ActionError::Validation(err.to_string())
    }
}

impl From<ConditionError> for ActionError {
    fn from(err: ConditionError) -> Self {
        ActionError::InvalidCondition(err.to_string())
    }
}
