//! Identities and the level model.

use std::fmt;
use std::sync::Arc;

/// Privilege rank. Higher means broader privilege.
pub type Level = u8;

/// The configured level range `0..=max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelScale {
    pub max: Level,
}

impl Default for LevelScale {
    fn default() -> Self {
        Self { max: 10 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityKind {
    Authenticated,
    Guest,
    PrivilegedInternal,
    UnprivilegedInternal,
    Script,
}

impl IdentityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityKind::Authenticated => "MEMBER",
            IdentityKind::Guest => "GUEST",
            IdentityKind::PrivilegedInternal | IdentityKind::UnprivilegedInternal => "INTERNAL",
            IdentityKind::Script => "SCRIPT",
        }
    }
}

/// The actor on whose behalf an operation is authorized.
///
/// Immutable once built. Script identities carry the identity that invoked
/// the script run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    kind: IdentityKind,
    subject: Option<String>,
    level: Level,
    invoker: Option<Arc<Identity>>,
}

impl Identity {
    /// A member that passed `login`.
    pub fn authenticated(name: impl Into<String>, level: Level) -> Self {
        Self {
            kind: IdentityKind::Authenticated,
            subject: Some(name.into()),
            level,
            invoker: None,
        }
    }

    pub fn guest() -> Self {
        Self { kind: IdentityKind::Guest, subject: None, level: 0, invoker: None }
    }

    pub fn privileged_internal(scale: LevelScale) -> Self {
        Self {
            kind: IdentityKind::PrivilegedInternal,
            subject: None,
            level: scale.max,
            invoker: None,
        }
    }

    pub fn unprivileged_internal() -> Self {
        Self { kind: IdentityKind::UnprivilegedInternal, subject: None, level: 0, invoker: None }
    }

    /// Execution identity of a script run: `setlevel` when present,
    /// otherwise the invoker's level.
    pub fn script(name: impl Into<String>, invoker: Identity, setlevel: Option<Level>) -> Self {
        Self {
            kind: IdentityKind::Script,
            subject: Some(name.into()),
            level: setlevel.unwrap_or(invoker.level),
            invoker: Some(Arc::new(invoker)),
        }
    }

    pub fn kind(&self) -> IdentityKind {
        self.kind
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn level(&self) -> Level {
        self.level
    }

    /// The identity that invoked this one, or `self` for non-script identities.
    pub fn invoker(&self) -> &Identity {
        self.invoker.as_deref().unwrap_or(self)
    }

    /// The outermost identity in the invoker chain.
    pub fn origin(&self) -> &Identity {
        let mut current = self;
        while let Some(inv) = current.invoker.as_deref() {
            current = inv;
        }
        current
    }

    /// Member name a password must belong to when this identity
    /// reauthenticates.
    pub fn principal(&self) -> Option<&str> {
        let origin = self.origin();
        match origin.kind {
            IdentityKind::Authenticated => origin.subject(),
            _ => None,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.subject.as_deref().unwrap_or("?");
        match self.kind {
            IdentityKind::Authenticated => write!(f, "Member[{name}]({})", self.level),
            IdentityKind::Guest => f.write_str("Guest"),
            IdentityKind::PrivilegedInternal | IdentityKind::UnprivilegedInternal => {
                f.write_str("SYSTEM")
            }
            IdentityKind::Script => {
                write!(f, "Script[{name}]({})<-{}", self.level, self.invoker())
            }
        }
    }
}

/// `identity.level >= required`; `None` is always allowed.
pub fn authorize(identity: &Identity, required: Option<Level>) -> bool {
    required.is_none_or(|level| identity.level() >= level)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, Some(0), true)]
    #[case(0, Some(1), false)]
    #[case(3, Some(2), true)]
    #[case(3, Some(3), true)]
    #[case(3, Some(4), false)]
    #[case(0, None, true)]
    fn test_authorize(#[case] level: Level, #[case] required: Option<Level>, #[case] allowed: bool) {
        let id = Identity::authenticated("alice", level);
        assert_eq!(authorize(&id, required), allowed);
    }

    #[test]
    fn test_authorize_monotonic() {
        for level in 0..=10u8 {
            let id = Identity::authenticated("m", level);
            let mut denied = false;
            for required in 0..=10u8 {
                let ok = authorize(&id, Some(required));
                assert!(!(denied && ok), "level {level} allowed {required} after a denial");
                denied |= !ok;
            }
        }
    }

    #[test]
    fn test_script_identity_levels() {
        let invoker = Identity::authenticated("alice", 2);
        let plain = Identity::script("s", invoker.clone(), None);
        assert_eq!(plain.level(), 2);

        let forced = Identity::script("s", invoker, Some(7));
        assert_eq!(forced.level(), 7);
        assert_eq!(forced.invoker().level(), 2);
        assert_eq!(forced.principal(), Some("alice"));
    }

    #[test]
    fn test_synthetic_identities() {
        assert_eq!(Identity::guest().level(), 0);
        assert_eq!(Identity::unprivileged_internal().level(), 0);
        assert_eq!(Identity::privileged_internal(LevelScale { max: 6 }).level(), 6);
        assert_eq!(Identity::guest().principal(), None);
    }

    #[test]
    fn test_display() {
        let member = Identity::authenticated("alice", 4);
        assert_eq!(member.to_string(), "Member[alice](4)");
        let script = Identity::script("isbn", member, Some(1));
        assert_eq!(script.to_string(), "Script[isbn](1)<-Member[alice](4)");
        assert_eq!(Identity::guest().to_string(), "Guest");
    }
}
