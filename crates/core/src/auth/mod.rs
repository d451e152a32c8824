//! Identity & level model: identities, authorization, login and
//! reauthentication.

pub mod identity;
pub mod login;
pub mod password;
pub mod reauth;

pub use identity::{Identity, IdentityKind, Level, LevelScale, authorize};
pub use login::Authenticator;
pub use password::{hash_password, verify_password};
pub use reauth::{AuthPolicy, Caller, FreshCredential, REAUTH_REQUIRED, requires_reauth};

use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("reauthentication required")]
    ReauthenticationRequired,

    #[error("reauthentication window expired")]
    ReauthenticationWindowExpired,

    #[error("{0}")]
    Hash(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
