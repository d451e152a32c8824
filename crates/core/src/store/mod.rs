//! Record storage: the `RecordStore` boundary and its SQLite implementation.
//!
//! The action namespaces never touch SQL; they talk to a [`RecordStore`].
//! Search conditions are handed through as [`Condition`] trees and evaluated
//! by the store.

pub mod condition;
pub mod db;
pub mod schema;
pub mod types;

pub use condition::{CompareOp, Condition, ConditionError};
pub use db::Database;
pub use schema::SchemaError;
pub use types::{Record, RecordId};

use serde_json::{Map, Value};
use thiserror::Error;

use crate::entities::EntityKind;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{entity}[{id}] already exists")]
    Duplicate { entity: EntityKind, id: RecordId },

    #[error("corrupt record {entity}[{id}]: {reason}")]
    Corrupt { entity: EntityKind, id: RecordId, reason: String },

    #[error("failed to create database directory {0}: {1}")]
    Io(String, #[source] std::io::Error),

    #[error("database lock poisoned")]
    Poisoned,
}

/// Persistence used by the action namespaces, the authenticator and the
/// scheduler.
///
/// Whole-document semantics throughout: `update` replaces a record's field
/// set and `set_script_storage` replaces a script's document. There is no
/// locking across a read-modify-write cycle.
pub trait RecordStore: Send + Sync {
    /// Insert a record. `None` asks the store for the next integer id.
    fn insert(
        &self,
        entity: EntityKind,
        id: Option<RecordId>,
        fields: &Map<String, Value>,
    ) -> Result<RecordId, StoreError>;

    /// Insert a record and store `hash` as the credential named by its id.
    /// Stores that can should write both or neither.
    fn insert_with_credential(
        &self,
        entity: EntityKind,
        id: Option<RecordId>,
        fields: &Map<String, Value>,
        hash: &str,
    ) -> Result<RecordId, StoreError> {
        let id = self.insert(entity, id, fields)?;
        self.set_credential(&id.to_string(), hash)?;
        Ok(id)
    }

    fn fetch(&self, entity: EntityKind, id: &RecordId) -> Result<Option<Record>, StoreError>;

    fn exists(&self, entity: EntityKind, id: &RecordId) -> Result<bool, StoreError> {
        Ok(self.fetch(entity, id)?.is_some())
    }

    /// Replace the stored fields. Returns `false` if the record does not exist.
    fn update(
        &self,
        entity: EntityKind,
        id: &RecordId,
        fields: &Map<String, Value>,
    ) -> Result<bool, StoreError>;

    fn search(&self, entity: EntityKind, condition: &Condition) -> Result<Vec<Record>, StoreError>;

    fn credential(&self, name: &str) -> Result<Option<String>, StoreError>;

    fn set_credential(&self, name: &str, hash: &str) -> Result<(), StoreError>;

    fn script_storage(&self, script: &str) -> Result<Option<Value>, StoreError>;

    fn set_script_storage(&self, script: &str, data: &Value) -> Result<(), StoreError>;

    fn misc(&self, key: &str) -> Result<Option<Value>, StoreError>;

    fn set_misc(&self, key: &str, value: &Value) -> Result<(), StoreError>;
}
