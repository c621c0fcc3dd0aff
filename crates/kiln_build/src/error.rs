//! Errors that end a build invocation.

use std::path::PathBuf;
use std::time::Duration;

use kiln_cache::CacheError;
use kiln_config::ConfigError;
use kiln_deps::ScanError;
use kiln_graph::{GraphError, InvalidationReason};

/// Errors returned by [`Orchestrator::run`](crate::Orchestrator::run).
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Another invocation held the instance lock for too long.
    #[error(
        "timed out after {}s waiting for another kiln instance to release {path}; \
         wait for it to finish or rerun with --no-lock",
        .timeout.as_secs()
    )]
    LockTimeout {
        /// The lock file.
        path: PathBuf,
        /// How long we waited.
        timeout: Duration,
    },

    /// The lock file could not be opened.
    #[error("failed to open lock file {path}: {source}")]
    LockIo {
        /// The lock file.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// An assemble-only run found no usable snapshot.
    #[error("cannot assemble without a valid snapshot: {reason}")]
    NoValidSnapshot {
        /// Why the snapshot was rejected.
        reason: InvalidationReason,
    },

    /// No targets were requested.
    #[error("no targets requested")]
    NoTargets,

    /// A single-file build named a file no compile action builds.
    #[error("{path} is not compiled by any requested target")]
    SingleFileNotFound {
        /// The requested file.
        path: PathBuf,
    },

    /// One or more actions failed.
    #[error("{failed} action(s) failed, {skipped} skipped; first failure: {first}")]
    ActionsFailed {
        /// Number of failed actions.
        failed: usize,
        /// Number of actions skipped because of failures.
        skipped: usize,
        /// Description of the first failure.
        first: String,
    },

    /// Snapshot files could not be deleted.
    #[error("failed to delete snapshot {path}: {source}")]
    Delete {
        /// The snapshot path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Include discovery error.
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// Build graph error.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Cache persistence error.
    #[error(transparent)]
    Cache(#[from] CacheError),
}
