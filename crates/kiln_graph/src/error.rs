//! Error types for graph construction, persistence and patching.

use std::path::PathBuf;

use kiln_cache::CacheError;

/// Errors raised while describing, saving, patching or scheduling actions.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// A linked binary name does not start with `<Prefix>-`.
    #[error("binary name '{name}' has no '<prefix>-' component; cannot hot reload it")]
    MissingPrefix {
        /// The offending file stem.
        name: String,
    },

    /// A caller-supplied hot reload suffix is still referenced by a loaded binary.
    #[error("hot reload suffix '{suffix}' for module '{module}' is still in use")]
    SuffixInUse {
        /// The module being reloaded.
        module: String,
        /// The requested suffix.
        suffix: String,
    },

    /// No unused suffix could be found for a binary.
    #[error("no unused hot reload suffix left for '{base}'")]
    SuffixesExhausted {
        /// The binary base name.
        base: String,
    },

    /// A response file could not be copied or rewritten.
    #[error("failed to update response file {path}: {source}")]
    ResponseFile {
        /// The response file path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Two actions claim to produce the same file.
    #[error("{path} is produced by more than one action")]
    DuplicateProducer {
        /// The contested file.
        path: PathBuf,
    },

    /// Actions depend on each other in a loop.
    #[error("actions form a dependency cycle (involving '{status}')")]
    DependencyCycle {
        /// Status line of one action on the cycle.
        status: String,
    },

    /// A snapshot failed its consistency checks.
    #[error("refusing to save an invalid snapshot: {reason}")]
    InvalidSnapshot {
        /// What was inconsistent.
        reason: String,
    },

    /// A file or directory needed to describe actions could not be accessed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Writing the snapshot store failed.
    #[error(transparent)]
    Cache(#[from] CacheError),
}
