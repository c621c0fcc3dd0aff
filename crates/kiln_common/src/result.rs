//! Common result and error types for Kiln.

/// The result type for operations whose only failure mode is a bug in Kiln.
///
/// User-facing problems (malformed directives, failed actions, a held lock)
/// have their own error enums in the crates that detect them.
pub type KilnResult<T> = Result<T, InternalError>;

/// An internal error indicating a broken invariant, not a user input problem.
///
/// Raised loudly when, for example, the closure engine finishes a top-level
/// request while a node is still marked in progress.
#[derive(Debug, thiserror::Error)]
#[error("internal error: {message}")]
pub struct InternalError {
    /// Description of the violated invariant.
    pub message: String,
}

impl InternalError {
    /// Creates a new internal error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for InternalError {
    fn from(message: String) -> Self {
        Self { message }
    }
}
