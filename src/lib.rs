//! keel - Front-end asset build orchestrator
//!
//! This library provides functionality to:
//! - Build an HTML entry point and every local asset it references
//!   (stylesheets, scripts, icons, web manifests, service workers)
//! - Track the files each builder read so a change rebuilds only its dependents
//! - Watch a project and run rebuilds through a single coalescing queue

pub mod build;
pub mod builders;
pub mod cli;
pub mod config;
pub mod transform;
pub mod watch;
