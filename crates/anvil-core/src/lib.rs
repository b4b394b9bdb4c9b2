//! # Anvil Core
//!
//! The data model and persistence contract shared by every Anvil crate.
//!
//! ## Layers
//!
//! ### Foundation Layer
//!
//! Immutable inbound data produced by backends:
//! - **Updates**: [`Update`] is either a [`Message`] or a raw platform event
//! - **Attachments**: [`Attachment`] with an [`AttachmentKind`], either already
//!   uploaded (`raw`) or pending upload (`content`)
//! - **Errors**: [`BackendError`] returned by backend collaborators
//!
//! ### Storage Layer
//!
//! The optimistic-concurrency key/value contract used for persisted
//! per-user and per-group state:
//! - [`Storage`] trait with `put` / `get` / `delete` and last-write-wins
//!   `save` / `load`
//! - [`Document`], a versioned field map
//! - [`MemoryStorage`], a bounded in-process implementation
//!
//! ## Example
//!
//! ```rust,ignore
//! use anvil_core::{Document, MemoryStorage, Storage};
//!
//! let storage = MemoryStorage::new(10_000);
//! let doc = storage.put("counter", Document::new().with("hits", 1)).await?;
//! assert_eq!(doc.version(), Some(1));
//!
//! let mut doc = storage.get("counter").await?.unwrap();
//! doc.set("hits", 2);
//! let doc = storage.put("counter", doc).await?;
//! assert_eq!(doc.version(), Some(2));
//! ```

pub mod foundation;
pub mod storage;

pub use foundation::{
    Attachment, AttachmentKind, BackendError, BackendResult, Message, RecipientKind, Update,
    UpdateKind,
};
pub use storage::{
    BoxedStorage, Document, MemoryStorage, Storage, StorageError, StorageResult,
};

/// Prelude for common imports.
pub mod prelude {
    pub use super::foundation::*;
    pub use super::storage::{Document, MemoryStorage, Storage, StorageError};
}
