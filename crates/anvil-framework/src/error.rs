//! Error types for the Anvil framework.

use thiserror::Error;

use anvil_core::{BackendError, StorageError};

use crate::router::RouterClass;

/// Boxed error returned by handlers and lifecycle hooks.
pub use tower::BoxError;

/// Errors raised while building or merging routers.
///
/// These are programmer errors: they surface when plugins are registered,
/// never while updates are being dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    /// Routers of different kinds cannot be merged.
    #[error("cannot merge a {got:?} router into a group of {expected:?} routers")]
    ClassMismatch {
        expected: RouterClass,
        got: RouterClass,
    },

    /// The router is itself the result of a merge.
    #[error("{0:?} router was already merged")]
    AlreadyMerged(RouterClass),

    /// Merge was called without any router.
    #[error("nothing to merge")]
    Empty,
}

/// Errors that can occur during context extraction.
#[derive(Debug, Clone, Error)]
pub enum ExtractError {
    /// The update is not a message.
    #[error("update is not a message")]
    NotAMessage,

    /// A dynamic context field has not been written by any router.
    #[error("context field '{0}' is not set")]
    MissingField(&'static str),

    /// The payload does not have the requested shape.
    #[error("payload mismatch: {0}")]
    Payload(String),

    /// Custom extraction error.
    #[error("{0}")]
    Custom(String),
}

impl ExtractError {
    /// Creates a custom extraction error.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }
}

/// Result type for extraction operations.
pub type ExtractResult<T> = Result<T, ExtractError>;

/// Errors raised by [`Context`](crate::Context) operations.
#[derive(Debug, Error)]
pub enum ContextError {
    /// Group state was written for an update without a group chat.
    #[error("update has no group channel to store group state in")]
    NoGroupChannel,

    /// User state was written for an update without a sender.
    #[error("update has no user channel to store user state in")]
    NoUserChannel,

    /// `reply` was called for an update without a default target.
    #[error("update has no default reply target")]
    NoReplyTarget,

    /// The configured state storage is not registered.
    #[error("storage '{0}' is not registered")]
    MissingStorage(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Result type for context operations.
pub type ContextResult<T> = Result<T, ContextError>;

/// A plugin's start hook failed.
#[derive(Debug, Error)]
#[error("start hook of plugin '{plugin}' failed: {source}")]
pub struct HookError {
    pub plugin: String,
    #[source]
    pub source: BoxError,
}
