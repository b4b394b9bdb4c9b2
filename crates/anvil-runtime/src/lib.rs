//! # Anvil Runtime
//!
//! Runs plugins against backends:
//! - [`App`]: plugin registration, the bounded dispatch loop, lifecycle
//!   hooks and shutdown
//! - [`config`]: layered configuration loading (files, `ANVIL_*`
//!   environment variables, code)
//! - [`logging`]: `tracing-subscriber` setup driven by configuration
//!
//! ```rust,ignore
//! use anvil_runtime::App;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut app = App::new();
//!     app.add_plugin(my_plugin())?;
//!     app.add_backend(my_backend());
//!     app.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{AnvilConfig, ConfigError, ConfigLoader, ConfigResult, LoggingConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{App, AppBuilder};

// Re-export tracing for use by plugins
pub use tracing;
pub use tracing_subscriber;

/// Logging macros.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
