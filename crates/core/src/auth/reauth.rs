//! Reauthentication: fresh credentials and the table of sensitive operations.

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use super::AuthError;
use super::identity::{Identity, IdentityKind, LevelScale};
use crate::entities::{EntityKind, Operation};

/// Operations that need a freshly supplied password on top of the level
/// check.
pub const REAUTH_REQUIRED: &[(EntityKind, &str)] = &[
    (EntityKind::Member, "new"),
    (EntityKind::Member, "edit"),
    (EntityKind::Member, "change_password"),
    (EntityKind::Script, "new"),
    (EntityKind::Script, "edit"),
];

pub fn requires_reauth(kind: EntityKind, op: &Operation) -> bool {
    REAUTH_REQUIRED.iter().any(|(k, name)| *k == kind && *name == op.name())
}

/// Proof that `subject` supplied their password at `verified_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshCredential {
    subject: String,
    verified_at: DateTime<Utc>,
}

impl FreshCredential {
    pub(crate) fn new(subject: impl Into<String>, verified_at: DateTime<Utc>) -> Self {
        Self { subject: subject.into(), verified_at }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn verified_at(&self) -> DateTime<Utc> {
        self.verified_at
    }
}

/// Everything an action namespace needs to authorize one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    identity: Identity,
    credential: Option<FreshCredential>,
    auth_granted: bool,
}

impl Caller {
    pub fn new(identity: Identity) -> Self {
        Self { identity, credential: None, auth_granted: false }
    }

    pub fn with_credential(mut self, credential: FreshCredential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Scripts holding AUTH_GRANTED skip the reauthentication check.
    pub fn with_auth_granted(mut self, granted: bool) -> Self {
        self.auth_granted = granted;
        self
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn credential(&self) -> Option<&FreshCredential> {
        self.credential.as_ref()
    }

    pub fn auth_granted(&self) -> bool {
        self.auth_granted
    }
}

impl From<Identity> for Caller {
    fn from(identity: Identity) -> Self {
        Caller::new(identity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthPolicy {
    pub scale: LevelScale,
    pub reauth_window: Duration,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self { scale: LevelScale::default(), reauth_window: Duration::seconds(300) }
    }
}

impl AuthPolicy {
    /// Check that `caller` may perform an operation from [`REAUTH_REQUIRED`].
    pub fn check_reauth(&self, caller: &Caller, now: DateTime<Utc>) -> Result<(), AuthError> {
        let identity = caller.identity();
        if identity.origin().kind() == IdentityKind::PrivilegedInternal || caller.auth_granted() {
            return Ok(());
        }

        let (Some(principal), Some(credential)) = (identity.principal(), caller.credential())
        else {
            info!(identity = %identity, "reauthentication required");
            return Err(AuthError::ReauthenticationRequired);
        };
        if credential.subject() != principal {
            info!(identity = %identity, "credential belongs to another member");
            return Err(AuthError::ReauthenticationRequired);
        }
        if now - credential.verified_at() > self.reauth_window {
            return Err(AuthError::ReauthenticationWindowExpired);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> AuthPolicy {
        AuthPolicy::default()
    }

    #[test]
    fn test_table_lookup() {
        assert!(requires_reauth(EntityKind::Member, &Operation::Edit));
        assert!(requires_reauth(EntityKind::Script, &Operation::New));
        assert!(requires_reauth(EntityKind::Member, &Operation::Action("change_password".into())));
        assert!(!requires_reauth(EntityKind::Member, &Operation::View));
        assert!(!requires_reauth(EntityKind::Book, &Operation::Edit));
    }

    #[test]
    fn test_missing_credential() {
        let caller = Caller::new(Identity::authenticated("alice", 10));
        assert!(matches!(
            policy().check_reauth(&caller, Utc::now()),
            Err(AuthError::ReauthenticationRequired)
        ));
    }

    #[test]
    fn test_fresh_credential_passes() {
        let now = Utc::now();
        let caller = Caller::new(Identity::authenticated("alice", 10))
            .with_credential(FreshCredential::new("alice", now));
        assert!(policy().check_reauth(&caller, now).is_ok());
    }

    #[test]
    fn test_expired_credential() {
        let now = Utc::now();
        let caller = Caller::new(Identity::authenticated("alice", 10))
            .with_credential(FreshCredential::new("alice", now - Duration::seconds(301)));
        assert!(matches!(
            policy().check_reauth(&caller, now),
            Err(AuthError::ReauthenticationWindowExpired)
        ));
    }

    #[test]
    fn test_foreign_credential() {
        let now = Utc::now();
        let caller = Caller::new(Identity::authenticated("alice", 10))
            .with_credential(FreshCredential::new("bob", now));
        assert!(policy().check_reauth(&caller, now).is_err());
    }

    #[test]
    fn test_script_uses_invoker_credential() {
        let now = Utc::now();
        let script = Identity::script("s", Identity::authenticated("alice", 4), Some(9));
        let caller = Caller::new(script).with_credential(FreshCredential::new("alice", now));
        assert!(policy().check_reauth(&caller, now).is_ok());
    }

    #[test]
    fn test_internal_identities() {
        let now = Utc::now();
        let privileged = Caller::new(Identity::privileged_internal(LevelScale::default()));
        assert!(policy().check_reauth(&privileged, now).is_ok());

        let unprivileged = Caller::new(Identity::unprivileged_internal());
        assert!(policy().check_reauth(&unprivileged, now).is_err());
        assert!(policy().check_reauth(&Caller::new(Identity::guest()), now).is_err());
    }

    #[test]
    fn test_auth_granted_skips_check() {
        let script = Identity::script("s", Identity::unprivileged_internal(), Some(10));
        let caller = Caller::new(script).with_auth_granted(true);
        assert!(policy().check_reauth(&caller, Utc::now()).is_ok());
    }
}
