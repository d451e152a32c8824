//! Entity registry: descriptors, built-in entity types and field validation.

pub mod builtin;
pub mod descriptor;
pub mod registry;
pub mod validation;

pub use descriptor::{
    EntityDescriptor, EntityKind, FieldDefault, FieldSpec, FieldType, IdPolicy, LevelTable,
    Operation, UnknownEntity,
};
pub use registry::{EntityRegistry, RegistryError};
pub use validation::{FieldError, Validated, check_companions, validate_edit, validate_new};
