//! Configuration management for the chat server
//!
//! Settings are read once at startup from a TOML file and handed to the hub
//! by value.

mod defaults;
mod loader;
mod schema;

pub use defaults::DEFAULT_CONFIG_TOML;
pub use loader::ConfigLoader;
pub use schema::*;
