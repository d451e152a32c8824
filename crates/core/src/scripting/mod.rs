//! Sandboxed Lua scripting.
//!
//! Each script activation gets a fresh [`ScriptEnvironment`] built from an
//! explicit [`ScriptContext`]: the execution identity, the resolved
//! [`CapabilitySet`], and the host services the bindings may use.
//!
//! # Available globals
//!
//! - `buchschloss.<Entity>` - action namespaces (`new`, `view`, `search`,
//!   indexing by id, `record:edit{...}`, special actions)
//! - `buchschloss.login_context`, `buchschloss.check_level(level, alert?)`
//! - `buchschloss.get_storage()` / `buchschloss.set_storage(t)` - STORE only
//! - `requests.get(url, type?)` - REQUESTS only, allow-listed URLs
//! - `ui.*` - only when a UI is attached
//! - `config` - the script's configuration table
//!
//! # Security
//!
//! The Lua state has no `io`, `os`, `debug`, `package`, `require`, `load`,
//! `loadfile`, `dofile` or `collectgarbage`, and runs under a memory limit.

pub mod bindings;
pub mod capabilities;
pub mod convert;
pub mod engine;
pub mod environment;
pub mod fetch;
pub mod host;
pub mod html;
pub mod record_bindings;
pub mod types;
pub mod ui;

pub use capabilities::{Capability, CapabilitySet};
pub use engine::LuaEngine;
pub use environment::{ScriptContext, ScriptEnvironment};
pub use fetch::{FetchError, FetchedData, Fetcher, HttpResponse, HttpTransport, ResponseType, UreqTransport};
pub use host::{REPL_NAME, ScriptHost};
pub use types::{SandboxConfig, ScriptingError, action_error};
pub use ui::{DataField, DataKind, UiFacade, format_message};
