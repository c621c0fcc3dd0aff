//! Shared foundational types used across the Kiln build orchestrator.
//!
//! This crate provides interned file identities, path normalization,
//! modification-time helpers, content hashing, and common result types.

#![warn(missing_docs)]

pub mod file;
pub mod hash;
pub mod result;
pub mod stamp;

pub use file::{normalize_path, FileHandle, FileTable};
pub use hash::ContentHash;
pub use result::{InternalError, KilnResult};
pub use stamp::{file_stamp, modified_time, set_modified, to_stamp};
