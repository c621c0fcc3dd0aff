//! Error types for include scanning.

use std::path::PathBuf;

use kiln_common::InternalError;

/// Errors raised while discovering include dependencies.
///
/// Directive problems abort the gather of the current target; entries already
/// cached for other files are kept.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// A directive payload contains a character that cannot appear in a path.
    #[error("{path}: invalid character in include directive \"{token}\" (likely an unescaped quote)")]
    InvalidPathCharacter {
        /// The file containing the directive.
        path: PathBuf,
        /// The offending directive payload.
        token: String,
    },

    /// A first-party directive uses `\` as a path separator.
    #[error("{path}: include directive \"{token}\" uses '\\' as a path separator; use '/' instead")]
    BackslashSeparator {
        /// The file containing the directive.
        path: PathBuf,
        /// The offending directive payload.
        token: String,
    },

    /// A source file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// The file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The reflection marker list could not be compiled into a pattern.
    #[error("invalid reflection marker pattern: {reason}")]
    Pattern {
        /// Description of the pattern failure.
        reason: String,
    },

    /// A module name unknown to the target was used to select a search context.
    #[error("module '{module}' is not part of target '{target}'")]
    UnknownModule {
        /// The requested module.
        module: String,
        /// The target being scanned.
        target: String,
    },

    /// An invariant of the closure engine was violated.
    #[error(transparent)]
    Internal(#[from] InternalError),
}
