//! Errors reported by backend collaborators.

use thiserror::Error;

/// Errors that can occur while talking to a backend.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The update queue or the backend connection is closed.
    #[error("backend is closed")]
    Closed,

    /// The backend does not implement the requested operation.
    #[error("operation '{0}' is not supported by this backend")]
    Unsupported(&'static str),

    /// The platform rejected an API call.
    #[error("API call '{method}' failed: {message}")]
    Request {
        /// The API method that was called.
        method: String,
        /// Error message reported by the platform.
        message: String,
    },

    /// A network-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Any other failure.
    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Creates a request error for the given API method.
    pub fn request(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Request {
            method: method.into(),
            message: message.into(),
        }
    }

    /// Wraps a network-level error.
    pub fn transport(error: impl std::fmt::Display) -> Self {
        Self::Transport(error.to_string())
    }
}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;
