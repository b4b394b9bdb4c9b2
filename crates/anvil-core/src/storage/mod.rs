//! Persistent key/value storage with optimistic locking.
//!
//! Every record is a [`Document`]: a field map plus a `_version` counter.
//! Writers pass back the version they last observed and [`Storage::put`]
//! refuses the write if somebody else got there first:
//!
//! | Supplied version | Stored record      | Result                              |
//! |------------------|--------------------|-------------------------------------|
//! | none             | absent             | created with version 1              |
//! | none             | present            | [`StorageError::AlreadyExists`]     |
//! | `v`              | absent             | [`StorageError::AlreadyDeleted`]    |
//! | `v`              | present, version ≠ `v` | [`StorageError::VersionMismatch`] |
//! | `v`              | present, version = `v` | written with version `v + 1`    |
//!
//! A successful `put` patches the stored record: supplied fields overwrite
//! stored ones and fields set to `null` are removed.
//!
//! [`Storage::save`] / [`Storage::load`] are a simpler last-write-wins view
//! over the same records, used for plain string state.

pub mod document;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use document::Document;
pub use memory::MemoryStorage;

/// Field under which [`Storage::save`] keeps its value.
pub const VALUE_FIELD: &str = "value";

/// Number of attempts the default [`Storage::save`] makes before giving up.
const SAVE_ATTEMPTS: usize = 8;

/// Errors returned by storage operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Tried to create a record that already exists.
    #[error("record '{0}' already exists")]
    AlreadyExists(String),

    /// Tried to update a record that no longer exists.
    #[error("record '{0}' was deleted")]
    AlreadyDeleted(String),

    /// The record changed since the writer last read it.
    #[error("version mismatch for '{key}': expected {expected}, found {found}")]
    VersionMismatch {
        key: String,
        expected: u64,
        found: u64,
    },

    /// Failure inside the storage engine itself.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Returns `true` for optimistic-locking conflicts.
    pub fn is_conflict(&self) -> bool {
        !matches!(self, Self::Backend(_))
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// The storage contract.
///
/// Implementations must make `put` atomic per key: the version check and the
/// write happen as one step.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Prepares the storage (connections, tables, indexes).
    async fn init(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Creates or updates a record under optimistic locking.
    async fn put(&self, key: &str, data: Document) -> StorageResult<Document>;

    /// Returns the current record, or `None` if there is none.
    async fn get(&self, key: &str) -> StorageResult<Option<Document>>;

    /// Removes a record unconditionally.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Stores `value` under `key`, overwriting whatever is there.
    ///
    /// The default implementation re-reads and retries on version conflicts;
    /// engines with a native upsert should override it.
    async fn save(&self, key: &str, value: Value) -> StorageResult<()> {
        let mut last_error = None;
        for _ in 0..SAVE_ATTEMPTS {
            let mut doc = self.get(key).await?.unwrap_or_default();
            doc.set(VALUE_FIELD, value.clone());
            match self.put(key, doc).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_conflict() => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| StorageError::Backend("save retries exhausted".into())))
    }

    /// Returns the value stored by [`save`](Self::save), if any.
    async fn load(&self, key: &str) -> StorageResult<Option<Value>> {
        Ok(self
            .get(key)
            .await?
            .and_then(|doc| doc.get_raw(VALUE_FIELD).cloned()))
    }
}

/// A shared storage trait object.
pub type BoxedStorage = Arc<dyn Storage>;
