//! The generic action namespace.
//!
//! One instance per entity type, parameterized by its descriptor. Every
//! operation authorizes first (level, then reauthentication where the
//! operation is in the sensitive table) and only then touches the store.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::errors::ActionError;
use super::special;
use crate::auth::{AuthPolicy, Caller, authorize, hash_password, requires_reauth};
use crate::entities::{
    EntityDescriptor, EntityKind, EntityRegistry, FieldType, Operation, Validated,
    check_companions, validate_edit, validate_new,
};
use crate::store::{Condition, Record, RecordId, RecordStore};

pub struct ActionNamespace {
    descriptor: Arc<EntityDescriptor>,
    store: Arc<dyn RecordStore>,
    policy: AuthPolicy,
}

impl ActionNamespace {
    pub fn new(
        descriptor: Arc<EntityDescriptor>,
        store: Arc<dyn RecordStore>,
        policy: AuthPolicy,
    ) -> Self {
        Self { descriptor, store, policy }
    }

    pub fn kind(&self) -> EntityKind {
        self.descriptor.kind
    }

    pub fn descriptor(&self) -> &EntityDescriptor {
        &self.descriptor
    }

    pub(crate) fn store(&self) -> &dyn RecordStore {
        self.store.as_ref()
    }

    /// Level check, then the reauthentication check for sensitive operations.
    pub fn authorize(&self, caller: &Caller, op: &Operation) -> Result<(), ActionError> {
        let identity = caller.identity();
        let resource = format!("{}.{}", self.kind(), op);
        if !authorize(identity, self.descriptor.required_level(op)) {
            info!("access to {resource} denied to {identity}");
            return Err(ActionError::PermissionDenied {
                identity: identity.to_string(),
                operation: resource,
            });
        }
        if requires_reauth(self.kind(), op) {
            self.policy
                .check_reauth(caller, Utc::now())
                .map_err(|e| ActionError::from_auth(e, &resource))?;
        }
        Ok(())
    }

    pub fn create(
        &self,
        caller: &Caller,
        fields: Map<String, Value>,
    ) -> Result<RecordId, ActionError> {
        self.authorize(caller, &Operation::New)?;
        let Validated { fields, secrets } =
            validate_new(&self.descriptor, fields, self.policy.scale)?;
        self.check_references(&fields)?;

        let id = match self.descriptor.id_policy.key_field() {
            Some(key) => Some(
                fields.get(key).and_then(RecordId::from_json).ok_or_else(|| {
                    ActionError::Validation(format!("{} requires key '{key}'", self.kind()))
                })?,
            ),
            None => None,
        };
        let mut hashes = secrets
            .iter()
            .map(|(_, secret)| hash_password(secret))
            .collect::<Result<Vec<_>, _>>()?;
        let id = match hashes.pop() {
            Some(hash) if hashes.is_empty() => {
                self.store.insert_with_credential(self.kind(), id, &fields, &hash)?
            }
            Some(_) => {
                return Err(ActionError::Validation(format!(
                    "{} accepts at most one secret field",
                    self.kind()
                )));
            }
            None => self.store.insert(self.kind(), id, &fields)?,
        };

        info!("{} created {}[{}]", caller.identity(), self.kind(), id);
        Ok(id)
    }

    pub fn view(&self, caller: &Caller, id: &RecordId) -> Result<Record, ActionError> {
        self.authorize(caller, &Operation::View)?;
        let record = self.fetch(id)?;
        self.check_stored(&record)?;
        debug!("{} viewed {}", caller.identity(), record);
        Ok(record)
    }

    pub fn search(
        &self,
        caller: &Caller,
        condition: &Condition,
    ) -> Result<Vec<Record>, ActionError> {
        self.authorize(caller, &Operation::Search)?;
        if let Some(field) =
            condition.fields().into_iter().find(|f| !self.descriptor.is_readable(f))
        {
            return Err(ActionError::InvalidCondition(format!(
                "{} has no searchable field '{field}'",
                self.kind()
            )));
        }

        let records = self.store.search(self.kind(), condition)?;
        for record in &records {
            self.check_stored(record)?;
        }
        Ok(records)
    }

    /// Apply `changes` on top of the stored fields; unmentioned fields are kept.
    pub fn edit(
        &self,
        caller: &Caller,
        id: &RecordId,
        changes: Map<String, Value>,
    ) -> Result<(), ActionError> {
        self.authorize(caller, &Operation::Edit)?;
        let current = self.fetch(id)?;
        let merged = validate_edit(&self.descriptor, &current.fields, changes, self.policy.scale)?;
        self.check_references(&merged)?;
        if !self.store.update(self.kind(), id, &merged)? {
            return Err(self.not_found(id));
        }
        info!("{} edited {}[{}]", caller.identity(), self.kind(), id);
        Ok(())
    }

    /// Run a named special action on one record.
    pub fn perform(
        &self,
        caller: &Caller,
        id: &RecordId,
        action: &str,
        args: Map<String, Value>,
    ) -> Result<Value, ActionError> {
        if !self.descriptor.has_action(action) {
            return Err(ActionError::Validation(format!(
                "{} has no action '{action}'",
                self.kind()
            )));
        }
        self.authorize(caller, &Operation::Action(action.to_string()))?;
        let record = self.fetch(id)?;
        let result = special::dispatch(self, caller, record, action, args)?;
        info!("{} performed {}.{action} on [{}]", caller.identity(), self.kind(), id);
        Ok(result)
    }

    fn fetch(&self, id: &RecordId) -> Result<Record, ActionError> {
        self.store.fetch(self.kind(), id)?.ok_or_else(|| self.not_found(id))
    }

    pub(crate) fn not_found(&self, id: &RecordId) -> ActionError {
        ActionError::NotFound { entity: self.kind(), id: id.clone() }
    }

    fn check_stored(&self, record: &Record) -> Result<(), ActionError> {
        check_companions(&self.descriptor, &record.fields)
            .map_err(|e| ActionError::StorageStateInconsistent(format!("{record}: {e}")))
    }

    fn check_references(&self, fields: &Map<String, Value>) -> Result<(), ActionError> {
        for spec in &self.descriptor.fields {
            let (target, values) = match (spec.ty, fields.get(spec.name)) {
                (FieldType::Ref(target), Some(v)) => (target, std::slice::from_ref(v)),
                (FieldType::RefList(target), Some(Value::Array(items))) => {
                    (target, items.as_slice())
                }
                _ => continue,
            };
            for value in values {
                let Some(id) = RecordId::from_json(value) else { continue };
                if !self.store.exists(target, &id)? {
                    return Err(ActionError::Validation(format!(
                        "field '{}' refers to missing {target}[{id}]",
                        spec.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// All action namespaces, one per entity type.
#[derive(Clone)]
pub struct Namespaces {
    by_kind: [Arc<ActionNamespace>; 7],
}

impl Namespaces {
    pub fn new(registry: &EntityRegistry, store: Arc<dyn RecordStore>, policy: AuthPolicy) -> Self {
        let by_kind = EntityKind::ALL.map(|kind| {
            Arc::new(ActionNamespace::new(registry.get(kind), Arc::clone(&store), policy))
        });
        Self { by_kind }
    }

    pub fn get(&self, kind: EntityKind) -> &Arc<ActionNamespace> {
        &self.by_kind[kind as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ActionNamespace>> {
        self.by_kind.iter()
    }
}
