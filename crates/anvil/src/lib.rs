//! # Anvil
//!
//! A plugin-driven chat bot framework. Plugins register async handlers into
//! routers; backends connect platforms; the runtime dispatches every update
//! through the composed routers with bounded concurrency.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  push   ┌─────────────┐ permit ┌──────────────────────────────┐
//! │ Backend  │────────▶│ bounded     │───────▶│ task: Context + root router  │──▶ reply
//! │ Backend  │────────▶│ queue (N)   │        │ task: Context + root router  │──▶ hooks
//! └──────────┘         └─────────────┘        └──────────────────────────────┘
//! ```
//!
//! - **Backends** translate a platform into [`Update`](prelude::Update)s and
//!   perform sends and API calls
//! - **Plugins** bundle routers and lifecycle hooks
//! - **Routers** pick handlers by command, regex, payload, attachment kind,
//!   or catch-all, by descending priority
//! - **Handlers** are async functions taking extractors (axum-style)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use anvil::prelude::*;
//!
//! async fn echo(Body(body): Body) -> String {
//!     body
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut app = App::new();
//!     app.add_plugin(Plugin::new("echo").on_commands(["echo"], echo))?;
//!     app.add_backend(my_backend());
//!     app.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` *(default)*: `anvil.toml` configuration files
//! - `yaml-config`: `anvil.yaml` configuration files
//! - `json-log`: JSON log output

pub use anvil_core as core;
pub use anvil_framework as framework;
pub use anvil_runtime as runtime;

/// Everything a bot usually needs.
///
/// ```rust,ignore
/// use anvil::prelude::*;
/// ```
pub mod prelude {
    // Runtime
    pub use anvil_runtime::{AnvilConfig, App, RuntimeError};

    // Plugins, handlers and extractors
    pub use anvil_framework::prelude::*;
    pub use anvil_framework::{BoxError, Params, Router, RouterClass};

    // Logging macros
    pub use anvil_runtime::prelude::*;
}
