use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use super::types::ScriptingError;
use crate::actions::ActionError;
use crate::auth::Level;
use crate::config::ScriptSettings;
use crate::store::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    /// Sensitive operations without a fresh credential.
    AuthGranted,
    /// Outbound GET requests through the allow-list.
    Requests,
    /// The script's persistent document.
    Store,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::AuthGranted => "AUTH_GRANTED",
            Capability::Requests => "REQUESTS",
            Capability::Store => "STORE",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "AUTH_GRANTED" => Ok(Capability::AuthGranted),
            "REQUESTS" => Ok(Capability::Requests),
            "STORE" => Ok(Capability::Store),
            _ => Err(format!("unknown capability '{s}'")),
        }
    }
}

/// Capabilities and forced level of one script activation. Immutable once
/// resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    granted: BTreeSet<Capability>,
    setlevel: Option<Level>,
}

impl CapabilitySet {
    pub fn new(granted: impl IntoIterator<Item = Capability>, setlevel: Option<Level>) -> Self {
        Self { granted: granted.into_iter().collect(), setlevel }
    }

    pub fn parse<S: AsRef<str>>(names: &[S], setlevel: Option<Level>) -> Result<Self, String> {
        let granted =
            names.iter().map(|n| n.as_ref().parse()).collect::<Result<BTreeSet<_>, _>>()?;
        Ok(Self { granted, setlevel })
    }

    /// Resolve for a Script record. Config settings, when present, replace
    /// the record's `permissions` and `setlevel`.
    pub fn resolve(record: &Record, settings: Option<&ScriptSettings>) -> Result<Self, ScriptingError> {
        let name = record.id.to_string();
        let misconfigured = |reason: String| ScriptingError::Config { script: name.clone(), reason };

        let (names, setlevel) = match settings {
            Some(s) => (s.permissions.clone().unwrap_or_default(), s.setlevel),
            None => {
                let names = match record.get("permissions") {
                    Value::Array(items) => items
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect(),
                    _ => Vec::new(),
                };
                let setlevel = match record.get("setlevel") {
                    Value::Null => None,
                    v => Some(
                        v.as_u64()
                            .and_then(|l| Level::try_from(l).ok())
                            .ok_or_else(|| misconfigured(format!("bad setlevel {v}")))?,
                    ),
                };
                (names, setlevel)
            }
        };
        Self::parse(&names, setlevel).map_err(misconfigured)
    }

    pub fn has(&self, cap: Capability) -> bool {
        self.granted.contains(&cap)
    }

    pub fn setlevel(&self) -> Option<Level> {
        self.setlevel
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.granted.iter().copied()
    }

    pub fn require(&self, cap: Capability) -> Result<(), ActionError> {
        if self.has(cap) {
            Ok(())
        } else {
            Err(ActionError::CapabilityAbsent(cap.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::EntityKind;
    use crate::store::RecordId;
    use serde_json::json;

    fn script(fields: Value) -> Record {
        Record {
            entity: EntityKind::Script,
            id: RecordId::from("greet"),
            fields: fields.as_object().cloned().unwrap(),
        }
    }

    #[test]
    fn test_parse() {
        let caps = CapabilitySet::parse(&["STORE", "requests"], Some(3)).unwrap();
        assert!(caps.has(Capability::Store));
        assert!(caps.has(Capability::Requests));
        assert!(!caps.has(Capability::AuthGranted));
        assert_eq!(caps.setlevel(), Some(3));
        assert!(CapabilitySet::parse(&["ROOT"], None).is_err());
    }

    #[test]
    fn test_resolve_from_record() {
        let record = script(json!({"name": "greet", "code": "", "permissions": ["STORE"], "setlevel": 2}));
        let caps = CapabilitySet::resolve(&record, None).unwrap();
        assert_eq!(caps, CapabilitySet::new([Capability::Store], Some(2)));
    }

    #[test]
    fn test_settings_take_precedence() {
        let record = script(json!({"name": "greet", "code": "", "permissions": ["STORE"]}));
        let settings = ScriptSettings {
            permissions: Some(vec!["REQUESTS".into()]),
            ..Default::default()
        };
        let caps = CapabilitySet::resolve(&record, Some(&settings)).unwrap();
        assert!(caps.has(Capability::Requests));
        assert!(!caps.has(Capability::Store));
        assert_eq!(caps.setlevel(), None);
    }

    #[test]
    fn test_require() {
        let caps = CapabilitySet::default();
        assert_eq!(
            caps.require(Capability::Store),
            Err(ActionError::CapabilityAbsent("STORE".into()))
        );
    }
}
