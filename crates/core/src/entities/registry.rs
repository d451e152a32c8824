//! Entity registry: one descriptor per entity type, built once at startup.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use thiserror::Error;

use super::builtin;
use super::descriptor::{EntityDescriptor, EntityKind, LevelTable, UnknownEntity};
use crate::auth::LevelScale;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    UnknownEntity(#[from] UnknownEntity),

    #[error("{entity} has no action '{action}'")]
    UnknownAction { entity: EntityKind, action: String },

    #[error("level {level} configured for {entity} exceeds the maximum level {max}")]
    LevelOutOfRange { entity: EntityKind, level: u8, max: u8 },
}

#[derive(Debug, Clone)]
pub struct EntityRegistry {
    descriptors: BTreeMap<EntityKind, Arc<EntityDescriptor>>,
}

impl EntityRegistry {
    /// Registry with the built-in levels.
    pub fn builtin() -> Self {
        let descriptors = EntityKind::ALL
            .into_iter()
            .map(|kind| (kind, Arc::new(builtin::descriptor(kind))))
            .collect();
        Self { descriptors }
    }

    /// Registry with configured level overrides applied on top of the
    /// built-in levels.
    pub fn with_overrides(
        overrides: &HashMap<String, LevelTable>,
        scale: LevelScale,
    ) -> Result<Self, RegistryError> {
        let mut descriptors = BTreeMap::new();
        let mut pending: HashMap<EntityKind, &LevelTable> = HashMap::new();
        for (name, table) in overrides {
            pending.insert(name.parse::<EntityKind>()?, table);
        }

        for kind in EntityKind::ALL {
            let mut descriptor = builtin::descriptor(kind);
            if let Some(table) = pending.get(&kind) {
                if let Some(action) =
                    table.actions.keys().find(|a| !descriptor.has_action(a.as_str()))
                {
                    return Err(RegistryError::UnknownAction {
                        entity: kind,
                        action: action.clone(),
                    });
                }
                descriptor.levels = descriptor.levels.merged(table);
            }
            if let Some(level) = descriptor.levels.levels().find(|l| *l > scale.max) {
                return Err(RegistryError::LevelOutOfRange {
                    entity: kind,
                    level,
                    max: scale.max,
                });
            }
            descriptors.insert(kind, Arc::new(descriptor));
        }

        Ok(Self { descriptors })
    }

    pub fn get(&self, kind: EntityKind) -> Arc<EntityDescriptor> {
        match self.descriptors.get(&kind) {
            Some(d) => Arc::clone(d),
            None => Arc::new(builtin::descriptor(kind)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<EntityDescriptor>> {
        self.descriptors.values()
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
