//! Error types for the deferred-task scheduler.

/// Top-level error type for scheduling operations.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// Identifier was empty or otherwise unusable as a join key.
    #[error("invalid task identifier: {0:?}")]
    InvalidIdentifier(String),

    /// `schedule` was called for an identifier with no registration.
    #[error("task '{0}' is not registered")]
    NotRegistered(String),

    /// The deferred-execution port refused a submission (quota, policy).
    ///
    /// The foreground fallback stays armed when this is returned.
    #[error("submission rejected for '{identifier}': {reason}")]
    Submission {
        /// Identifier whose request was rejected.
        identifier: String,
        /// Port-supplied reason.
        reason: String,
    },

    /// No async runtime was available to drive invocations.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TaskError {
    /// Returns `true` for errors after which the fallback path is still armed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Submission { .. })
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, TaskError>;
