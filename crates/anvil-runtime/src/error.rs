//! Runtime error types.

use thiserror::Error;

use anvil_core::{BackendError, StorageError};
use anvil_framework::{HookError, RouterError};

use crate::config::ConfigError;

/// Errors that can occur while assembling or running an [`App`](crate::App).
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The routers of the registered plugins could not be combined.
    #[error("Failed to compose routers: {0}")]
    Router(#[from] RouterError),

    /// A plugin with the same name is already registered.
    #[error("Plugin already registered: {0}")]
    PluginExists(String),

    #[error("Failed to initialize storage '{name}': {source}")]
    StorageInit {
        name: String,
        #[source]
        source: StorageError,
    },

    #[error("Backend '{backend}' failed to start: {source}")]
    BackendStart {
        backend: String,
        #[source]
        source: BackendError,
    },

    #[error(transparent)]
    Hook(#[from] HookError),

    /// A handler panicked while processing an update. Reported to
    /// exception hooks like any other handler failure.
    #[error("Handler panicked: {0}")]
    HandlerPanicked(String),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
