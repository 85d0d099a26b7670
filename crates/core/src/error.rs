//! Error model for talking to the remote job queue.

use thiserror::Error;

/// Result type used for remote queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Failure of a remote queue operation.
///
/// The variant names the operation that failed, which is what the retry layer
/// and the agents key their behaviour on. Everything except [`QueueError::Malformed`]
/// is assumed to be a transient condition of the remote side (schedd busy,
/// network hiccup, daemon restart) and may be retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// No handle to the queue could be obtained.
    #[error("cannot connect to job queue: {0}")]
    Connection(String),

    /// A listing of jobs failed (before or while iterating).
    #[error("job query failed: {0}")]
    Query(String),

    /// An attribute write failed. It may have been applied to part of the id list.
    #[error("attribute edit failed: {0}")]
    Edit(String),

    /// A bulk state-transition command failed.
    #[error("job action failed: {0}")]
    Action(String),

    /// Delegated output-sandbox transfer failed.
    #[error("output transfer failed: {0}")]
    Transfer(String),

    /// The request itself is invalid (e.g. an unparsable constraint). Never retried.
    #[error("malformed request: {0}")]
    Malformed(String),
}

impl QueueError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    pub fn edit(msg: impl Into<String>) -> Self {
        Self::Edit(msg.into())
    }

    pub fn action(msg: impl Into<String>) -> Self {
        Self::Action(msg.into())
    }

    pub fn transfer(msg: impl Into<String>) -> Self {
        Self::Transfer(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    /// Whether retrying the same request could succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Malformed(_))
    }

    /// Whether the error means the cached queue handle is no longer usable.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}
