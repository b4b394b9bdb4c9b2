//! # Anvil Debug Backend
//!
//! A [`Backend`](anvil_framework::Backend) without a platform behind it.
//! Tests and demos inject updates through a [`DebugHandle`] and inspect
//! what the application sent back.
//!
//! ```rust,ignore
//! use anvil_backend_debug::DebugBackend;
//!
//! let backend = DebugBackend::new("debug");
//! let handle = backend.handle();
//! app.add_backend(backend);
//!
//! handle.push_text("alice", ".echo hello")?;
//! handle.close();
//! app.run_until(std::future::pending()).await?;
//!
//! assert_eq!(handle.sent_texts(), ["hello"]);
//! ```
//!
//! Closing the handle lets the application drain the queued updates and
//! stop on its own, which is what most tests want.

mod backend;
mod record;

pub use backend::{DebugBackend, DebugHandle};
pub use record::{ApiCall, SentMessage};
