//! Error types for cache operations.

use std::path::PathBuf;

/// Errors that can occur while reading or writing a persisted store.
///
/// Loaders of the include caches downgrade every variant to an empty cache;
/// the snapshot loader maps them to an invalidation reason.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An I/O error occurred while reading or writing a store file.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A store file has an invalid or missing header.
    #[error("invalid store header in {path}: {reason}")]
    InvalidHeader {
        /// The store file path.
        path: PathBuf,
        /// Description of the header problem.
        reason: String,
    },

    /// The stored checksum does not match the computed checksum of the payload.
    #[error("checksum mismatch in {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// The store file path.
        path: PathBuf,
        /// The expected checksum from the header.
        expected: String,
        /// The actual checksum computed from the payload.
        actual: String,
    },

    /// The schema version does not match the version this build understands.
    #[error("version mismatch in {path}: expected {expected}, got {actual}")]
    VersionMismatch {
        /// The store file path.
        path: PathBuf,
        /// The expected schema version.
        expected: u32,
        /// The schema version found in the file.
        actual: u32,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },
}
