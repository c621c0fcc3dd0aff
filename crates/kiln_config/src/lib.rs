//! Parsing and validation of `kiln.toml` workspace configuration files.
//!
//! The configuration is the data-driven rules provider: it declares modules
//! (source roots, include paths, dependencies) and targets (module lists,
//! platform, configuration). [`resolve_target`] turns a named target into a
//! [`ResolvedTarget`] with absolute paths ready for scanning and building.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod resolve;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_config, load_config_from_str, CONFIG_FILE_NAME};
pub use resolve::{config_files, project_files, resolve_target, ResolvedModule, ResolvedTarget};
pub use types::*;
