//! Lazy view proxies.
//!
//! A proxy stands for one record. It is created without touching the store;
//! the first field read performs a single authorized `view` and caches the
//! result for the proxy's lifetime. Edits and actions go straight through
//! to the namespace and never populate the cache.

use std::cell::RefCell;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::errors::ActionError;
use super::namespace::ActionNamespace;
use crate::auth::Caller;
use crate::entities::EntityKind;
use crate::store::{Record, RecordId};

pub struct LazyViewProxy {
    namespace: Arc<ActionNamespace>,
    caller: Arc<Caller>,
    id: RecordId,
    cache: RefCell<Option<Record>>,
}

impl LazyViewProxy {
    pub fn new(namespace: Arc<ActionNamespace>, caller: Arc<Caller>, id: RecordId) -> Self {
        Self { namespace, caller, id, cache: RefCell::new(None) }
    }

    /// A proxy around a record that was already viewed (e.g. a search hit).
    pub fn populated(namespace: Arc<ActionNamespace>, caller: Arc<Caller>, record: Record) -> Self {
        let id = record.id.clone();
        Self { namespace, caller, id, cache: RefCell::new(Some(record)) }
    }

    pub fn id(&self) -> &RecordId {
        &self.id
    }

    pub fn kind(&self) -> EntityKind {
        self.namespace.kind()
    }

    pub fn namespace(&self) -> &Arc<ActionNamespace> {
        &self.namespace
    }

    pub fn caller(&self) -> &Arc<Caller> {
        &self.caller
    }

    pub fn is_populated(&self) -> bool {
        self.cache.borrow().is_some()
    }

    /// Read one field. `id` never needs the store.
    pub fn get(&self, field: &str) -> Result<Value, ActionError> {
        if field == "id" {
            return Ok(self.id.to_json());
        }
        if !self.namespace.descriptor().is_readable(field) {
            return Err(ActionError::Validation(format!(
                "{} has no readable field '{field}'",
                self.kind()
            )));
        }
        self.populate()?;
        Ok(self.cache.borrow().as_ref().map(|r| r.get(field)).unwrap_or(Value::Null))
    }

    /// All stored fields, populating on first use.
    pub fn fields(&self) -> Result<Map<String, Value>, ActionError> {
        self.populate()?;
        Ok(self.cache.borrow().as_ref().map(|r| r.fields.clone()).unwrap_or_default())
    }

    pub fn edit(&self, changes: Map<String, Value>) -> Result<(), ActionError> {
        self.edit_as(&self.caller, changes)
    }

    /// Edit under a different caller, e.g. one carrying a fresh credential.
    pub fn edit_as(&self, caller: &Caller, changes: Map<String, Value>) -> Result<(), ActionError> {
        self.namespace.edit(caller, &self.id, changes)
    }

    pub fn perform(&self, action: &str, args: Map<String, Value>) -> Result<Value, ActionError> {
        self.perform_as(&self.caller, action, args)
    }

    pub fn perform_as(
        &self,
        caller: &Caller,
        action: &str,
        args: Map<String, Value>,
    ) -> Result<Value, ActionError> {
        self.namespace.perform(caller, &self.id, action, args)
    }

    fn populate(&self) -> Result<(), ActionError> {
        if self.cache.borrow().is_some() {
            return Ok(());
        }
        let record = self.namespace.view(&self.caller, &self.id)?;
        *self.cache.borrow_mut() = Some(record);
        Ok(())
    }
}
