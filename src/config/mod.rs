//! Configuration module for keel
//!
//! Provides types, discovery and parsing for `keel.toml` project configuration.

pub mod loader;
pub mod schema;

pub use loader::*;
pub use schema::*;
