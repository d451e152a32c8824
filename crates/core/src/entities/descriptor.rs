//! Entity type descriptors.
//!
//! A descriptor is the read-only metadata the action namespaces are
//! parameterized by: the field list, the id policy, the required level per
//! operation and the named special actions.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

use crate::auth::Level;

/// The entity types managed by buchschloss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Book,
    Person,
    Library,
    Group,
    Borrow,
    Member,
    Script,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Book,
        EntityKind::Person,
        EntityKind::Library,
        EntityKind::Group,
        EntityKind::Borrow,
        EntityKind::Member,
        EntityKind::Script,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Book => "Book",
            EntityKind::Person => "Person",
            EntityKind::Library => "Library",
            EntityKind::Group => "Group",
            EntityKind::Borrow => "Borrow",
            EntityKind::Member => "Member",
            EntityKind::Script => "Script",
        }
    }

    /// How records of this kind are keyed.
    pub fn id_policy(&self) -> IdPolicy {
        match self {
            EntityKind::Book | EntityKind::Borrow => IdPolicy::Auto,
            EntityKind::Person => IdPolicy::Explicit("id"),
            EntityKind::Library | EntityKind::Group | EntityKind::Member | EntityKind::Script => {
                IdPolicy::Natural("name")
            }
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown entity type '{0}'")]
pub struct UnknownEntity(pub String);

impl FromStr for EntityKind {
    type Err = UnknownEntity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownEntity(s.to_string()))
    }
}

/// An operation that can be performed through an action namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operation {
    New,
    View,
    Search,
    Edit,
    Action(String),
}

impl Operation {
    pub fn name(&self) -> &str {
        match self {
            Operation::New => "new",
            Operation::View => "view",
            Operation::Search => "search",
            Operation::Edit => "edit",
            Operation::Action(name) => name,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Type of a declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Integer,
    Text,
    Boolean,
    /// `YYYY-MM-DD`
    Date,
    TextList,
    /// Integer within the configured level scale.
    Level,
    Ref(EntityKind),
    RefList(EntityKind),
}

/// Value filled in on `new` when a field is omitted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldDefault {
    Bool(bool),
    Int(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: FieldType,
    pub required: bool,
    /// Write-only: hashed into the credential table, never stored or viewed.
    pub secret: bool,
    pub default: Option<FieldDefault>,
}

impl FieldSpec {
    pub const fn required(name: &'static str, ty: FieldType) -> Self {
        Self { name, ty, required: true, secret: false, default: None }
    }

    pub const fn optional(name: &'static str, ty: FieldType) -> Self {
        Self { name, ty, required: false, secret: false, default: None }
    }

    pub const fn secret(name: &'static str) -> Self {
        Self { name, ty: FieldType::Text, required: true, secret: true, default: None }
    }

    pub const fn with_default(mut self, default: FieldDefault) -> Self {
        self.default = Some(default);
        self
    }
}

/// How a record's id is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPolicy {
    /// The store assigns the next integer.
    Auto,
    /// An integer supplied in the named field.
    Explicit(&'static str),
    /// A string key supplied in the named field.
    Natural(&'static str),
}

impl IdPolicy {
    pub fn key_field(&self) -> Option<&'static str> {
        match self {
            IdPolicy::Auto => None,
            IdPolicy::Explicit(f) | IdPolicy::Natural(f) => Some(f),
        }
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, IdPolicy::Natural(_))
    }
}

/// Required levels per operation. `None` means "not configured".
///
/// Unconfigured operations inherit: `search` from `view`, `edit` from `new`,
/// every special action from `edit`. An operation that resolves to `None`
/// is unconditionally allowed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LevelTable {
    #[serde(default)]
    pub new: Option<Level>,
    #[serde(default)]
    pub view: Option<Level>,
    #[serde(default)]
    pub search: Option<Level>,
    #[serde(default)]
    pub edit: Option<Level>,
    #[serde(default)]
    pub actions: BTreeMap<String, Level>,
}

impl LevelTable {
    /// Overlay the configured values of `other` on top of `self`.
    pub fn merged(&self, other: &LevelTable) -> LevelTable {
        let mut actions = self.actions.clone();
        actions.extend(other.actions.iter().map(|(k, v)| (k.clone(), *v)));
        LevelTable {
            new: other.new.or(self.new),
            view: other.view.or(self.view),
            search: other.search.or(self.search),
            edit: other.edit.or(self.edit),
            actions,
        }
    }

    pub fn resolve(&self, op: &Operation) -> Option<Level> {
        match op {
            Operation::New => self.new,
            Operation::View => self.view,
            Operation::Search => self.search.or(self.view),
            Operation::Edit => self.edit.or(self.new),
            Operation::Action(name) => {
                self.actions.get(name).copied().or_else(|| self.resolve(&Operation::Edit))
            }
        }
    }

    pub fn levels(&self) -> impl Iterator<Item = Level> + '_ {
        [self.new, self.view, self.search, self.edit]
            .into_iter()
            .flatten()
            .chain(self.actions.values().copied())
    }
}

/// Metadata for one entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDescriptor {
    pub kind: EntityKind,
    pub fields: Vec<FieldSpec>,
    pub id_policy: IdPolicy,
    pub levels: LevelTable,
    /// Named special actions this entity type supports.
    pub actions: Vec<&'static str>,
    /// Field pairs that must be both set or both absent.
    pub companions: Vec<(&'static str, &'static str)>,
}

impl EntityDescriptor {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether `name` can be read from a record: `id` or a non-secret field.
    pub fn is_readable(&self, name: &str) -> bool {
        name == "id" || self.field(name).is_some_and(|f| !f.secret)
    }

    pub fn has_action(&self, name: &str) -> bool {
        self.actions.contains(&name)
    }

    pub fn has_operation(&self, op: &Operation) -> bool {
        match op {
            Operation::Action(name) => self.has_action(name),
            _ => true,
        }
    }

    pub fn required_level(&self, op: &Operation) -> Option<Level> {
        self.levels.resolve(op)
    }
}
