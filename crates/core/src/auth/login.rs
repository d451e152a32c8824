//! Login and reauthentication against the credential table.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::info;

use super::AuthError;
use super::identity::{Identity, Level};
use super::password::verify_password;
use super::reauth::{AuthPolicy, FreshCredential};
use crate::entities::EntityKind;
use crate::store::{RecordId, RecordStore};

pub struct Authenticator {
    store: Arc<dyn RecordStore>,
    policy: AuthPolicy,
}

impl Authenticator {
    pub fn new(store: Arc<dyn RecordStore>, policy: AuthPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &AuthPolicy {
        &self.policy
    }

    /// Check `password` for member `name` and build their identity.
    ///
    /// The level is read from the member record at login time, so a level
    /// change takes effect on the next login.
    pub fn login(&self, name: &str, password: &str) -> Result<Identity, AuthError> {
        self.verify(name, password)?;
        let record = self
            .store
            .fetch(EntityKind::Member, &RecordId::from(name))?
            .ok_or(AuthError::InvalidCredentials)?;
        let level = record
            .fields
            .get("level")
            .and_then(Value::as_u64)
            .and_then(|l| Level::try_from(l).ok())
            .ok_or(AuthError::InvalidCredentials)?;
        info!(member = name, level, "logged in");
        Ok(Identity::authenticated(name, level))
    }

    /// Prove that the member behind `identity` knows their password right now.
    pub fn reauthenticate(
        &self,
        identity: &Identity,
        password: &str,
    ) -> Result<FreshCredential, AuthError> {
        let principal = identity.principal().ok_or(AuthError::ReauthenticationRequired)?;
        self.verify(principal, password)?;
        Ok(FreshCredential::new(principal, Utc::now()))
    }

    fn verify(&self, name: &str, password: &str) -> Result<(), AuthError> {
        let Some(hash) = self.store.credential(name)? else {
            info!(member = name, "login failed: unknown member");
            return Err(AuthError::InvalidCredentials);
        };
        if !verify_password(password, &hash)? {
            info!(member = name, "login failed: wrong password");
            return Err(AuthError::InvalidCredentials);
        }
        Ok(())
    }
}
