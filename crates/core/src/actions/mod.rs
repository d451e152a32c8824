//! Action namespaces: the only path from callers to the record store.

pub mod errors;
pub mod namespace;
pub mod proxy;
mod special;

pub use errors::ActionError;
pub use namespace::{ActionNamespace, Namespaces};
pub use proxy::LazyViewProxy;
