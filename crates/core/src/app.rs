//! Wiring of store, namespaces, authentication and the script host from a
//! resolved configuration.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::info;

use crate::actions::{ActionError, Namespaces};
use crate::auth::{AuthError, Authenticator, Caller, Identity};
use crate::config::ResolvedConfig;
use crate::entities::EntityKind;
use crate::scheduler::Scheduler;
use crate::scripting::{Fetcher, ScriptHost};
use crate::store::{Condition, Database, RecordId, RecordStore, StoreError};

/// Library created by [`App::bootstrap`].
pub const DEFAULT_LIBRARY: &str = "main";

pub struct App {
    config: ResolvedConfig,
    store: Arc<dyn RecordStore>,
    namespaces: Namespaces,
    authenticator: Arc<Authenticator>,
    host: Arc<ScriptHost>,
}

impl App {
    /// Open the configured database file, creating it if needed.
    pub fn open(config: ResolvedConfig) -> Result<Self, StoreError> {
        let db = Database::open(&config.database_path)?;
        Ok(Self::with_store(config, Arc::new(db)))
    }

    pub fn in_memory(config: ResolvedConfig) -> Result<Self, StoreError> {
        Ok(Self::with_store(config, Arc::new(Database::open_in_memory()?)))
    }

    pub fn with_store(config: ResolvedConfig, store: Arc<dyn RecordStore>) -> Self {
        let namespaces = Namespaces::new(&config.registry, Arc::clone(&store), config.auth);
        let authenticator = Arc::new(Authenticator::new(Arc::clone(&store), config.auth));
        let host = ScriptHost::new(
            Arc::clone(&store),
            namespaces.clone(),
            Arc::clone(&authenticator),
            Arc::new(Fetcher::from_config(&config)),
            config.sandbox.clone(),
            config.script_settings.clone(),
        );
        Self { config, store, namespaces, authenticator, host: Arc::new(host) }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn namespaces(&self) -> &Namespaces {
        &self.namespaces
    }

    pub fn host(&self) -> &Arc<ScriptHost> {
        &self.host
    }

    /// Log in as `name`, or run as a guest when no name is given.
    pub fn identity(&self, name: Option<&str>, password: &str) -> Result<Identity, AuthError> {
        match name {
            Some(name) => self.authenticator.login(name, password),
            None => Ok(Identity::guest()),
        }
    }

    /// A caller for `identity`, carrying a fresh credential when the
    /// identity is a member and `password` checks out.
    pub fn caller(&self, identity: Identity, password: Option<&str>) -> Result<Caller, AuthError> {
        let caller = Caller::new(identity);
        match password {
            Some(pw) if caller.identity().principal().is_some() => {
                let credential = self.authenticator.reauthenticate(caller.identity(), pw)?;
                Ok(caller.with_credential(credential))
            }
            _ => Ok(caller),
        }
    }

    /// Create the default library and the first member at the highest
    /// level. Returns `false` when members already exist.
    pub fn bootstrap(&self, name: &str, password: &str) -> Result<bool, ActionError> {
        if !self.store.search(EntityKind::Member, &Condition::All)?.is_empty() {
            return Ok(false);
        }
        let scale = self.config.scale();
        let caller = Caller::new(Identity::privileged_internal(scale));

        if !self.store.exists(EntityKind::Library, &RecordId::from(DEFAULT_LIBRARY))? {
            let mut library = Map::new();
            library.insert("name".into(), Value::String(DEFAULT_LIBRARY.into()));
            self.namespaces.get(EntityKind::Library).create(&caller, library)?;
        }

        let mut fields = Map::new();
        fields.insert("name".into(), Value::String(name.to_string()));
        fields.insert("level".into(), Value::from(scale.max));
        fields.insert("password".into(), Value::String(password.to_string()));
        self.namespaces.get(EntityKind::Member).create(&caller, fields)?;
        info!(member = name, "created initial member");
        Ok(true)
    }

    /// A scheduler over the configured startup and repeating scripts.
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            Arc::clone(&self.host),
            Arc::clone(&self.store),
            self.config.startup.clone(),
            self.config.repeating.clone(),
        )
    }
}
