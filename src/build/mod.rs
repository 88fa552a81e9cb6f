//! Builder contract and shared bookkeeping.
//!
//! # Overview
//!
//! - **Builder**: the unit of work (`setup` → `build` → `write`), see [`builder`]
//! - **ResourceSet**: files that contributed to a builder's last output
//! - **Events**: typed event stream every builder owns, forwarded up the tree
//! - **Options**: unresolved/resolved builder configuration
//! - **Context**: collaborators and the session's transform cache
//!
//! # Example
//!
//! ```ignore
//! use keel::build::{BuildContext, BuilderOptions};
//! use keel::builders;
//!
//! let ctx = BuildContext::default();
//! let mut builder = builders::for_input("src/index.html".as_ref(), &ctx);
//! builder.setup(BuilderOptions::new("src/index.html").with_output_dir("dist"))?;
//! builder.build(&Default::default())?;
//! let report = builder.write()?;
//! println!("wrote {} files", report.outputs.len());
//! ```

pub mod builder;
pub mod cache;
pub mod capability;
pub mod context;
pub mod error;
pub mod events;
pub mod options;
pub mod paths;
pub mod progress;
pub mod resources;
pub mod result;

pub use builder::*;
pub use cache::*;
pub use capability::*;
pub use context::*;
pub use error::*;
pub use events::*;
pub use options::*;
pub use resources::*;
pub use result::*;
