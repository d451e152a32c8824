#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod actions;
pub mod app;
pub mod auth;
pub mod config;
pub mod entities;
pub mod scheduler;
pub mod scripting;
pub mod store;

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
