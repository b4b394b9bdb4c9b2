//! In-process storage.
//!
//! [`MemoryStorage`] keeps records in a `HashMap` behind a mutex. Memory is
//! bounded by a key ceiling: when a new key would exceed it, roughly 30% of
//! the stored keys are evicted at random. This is a coarse bound, not an LRU.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::seq::IteratorRandom;
use serde_json::{Map, Value};
use tracing::debug;

use super::{Document, Storage, StorageError, StorageResult, VALUE_FIELD};

/// Default key ceiling.
pub const DEFAULT_MAX_KEYS: usize = 1_000_000;

/// Share of keys removed when the ceiling is reached, in percent.
const EVICTION_PERCENT: usize = 30;

struct Record {
    fields: Map<String, Value>,
    version: u64,
}

/// A bounded in-memory [`Storage`].
pub struct MemoryStorage {
    records: Mutex<HashMap<String, Record>>,
    max_keys: usize,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_KEYS)
    }
}

impl MemoryStorage {
    /// Creates an empty storage holding at most `max_keys` keys.
    pub fn new(max_keys: usize) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            max_keys: max_keys.max(1),
        }
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Makes room for one more key if the ceiling has been reached.
    fn make_room(&self, records: &mut HashMap<String, Record>, key: &str) {
        if records.len() < self.max_keys || records.contains_key(key) {
            return;
        }

        let count = (records.len() * EVICTION_PERCENT / 100).max(1);
        let victims: Vec<String> = records
            .keys()
            .choose_multiple(&mut rand::rng(), count)
            .into_iter()
            .cloned()
            .collect();
        for victim in &victims {
            records.remove(victim);
        }

        debug!(
            evicted = victims.len(),
            remaining = records.len(),
            max_keys = self.max_keys,
            "Memory storage reached its key ceiling"
        );
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn put(&self, key: &str, data: Document) -> StorageResult<Document> {
        let mut records = self.records.lock();

        let current = records.get(key).map(|r| r.version);
        match (data.version(), current) {
            (None, Some(_)) => return Err(StorageError::AlreadyExists(key.to_string())),
            (Some(_), None) => return Err(StorageError::AlreadyDeleted(key.to_string())),
            (Some(expected), Some(found)) if expected != found => {
                return Err(StorageError::VersionMismatch {
                    key: key.to_string(),
                    expected,
                    found,
                });
            }
            _ => {}
        }

        if current.is_none() {
            self.make_room(&mut records, key);
        }

        let record = records.entry(key.to_string()).or_insert_with(|| Record {
            fields: Map::new(),
            version: 0,
        });
        for (field, value) in data.into_fields() {
            if value.is_null() {
                record.fields.remove(&field);
            } else {
                record.fields.insert(field, value);
            }
        }
        record.version += 1;

        Ok(Document::stored(key, record.fields.clone(), record.version))
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Document>> {
        Ok(self
            .records
            .lock()
            .get(key)
            .map(|r| Document::stored(key, r.fields.clone(), r.version)))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.records.lock().remove(key);
        Ok(())
    }

    async fn save(&self, key: &str, value: Value) -> StorageResult<()> {
        let mut records = self.records.lock();
        self.make_room(&mut records, key);

        let record = records.entry(key.to_string()).or_insert_with(|| Record {
            fields: Map::new(),
            version: 0,
        });
        if value.is_null() {
            record.fields.remove(VALUE_FIELD);
        } else {
            record.fields.insert(VALUE_FIELD.to_string(), value);
        }
        record.version += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn create_twice_without_version_fails() {
        let storage = MemoryStorage::default();
        let doc = assert_ok!(storage.put("k", Document::new().with("a", 1)).await);
        assert_eq!(doc.version(), Some(1));
        assert_eq!(doc.key(), Some("k"));

        let err = assert_err!(storage.put("k", Document::new().with("a", 1)).await);
        assert_eq!(err, StorageError::AlreadyExists("k".into()));
    }

    #[tokio::test]
    async fn put_with_current_version_increments_by_one() {
        let storage = MemoryStorage::default();
        storage.put("k", Document::new().with("a", 1)).await.unwrap();

        let mut doc = storage.get("k").await.unwrap().unwrap();
        doc.set("a", 2);
        let updated = storage.put("k", doc).await.unwrap();
        assert_eq!(updated.version(), Some(2));
        assert_eq!(updated.get::<i64>("a"), Some(2));
    }

    #[tokio::test]
    async fn stale_version_is_rejected() {
        let storage = MemoryStorage::default();
        let first = storage.put("k", Document::new().with("a", 1)).await.unwrap();

        let mut winner = first.clone();
        winner.set("a", 2);
        storage.put("k", winner).await.unwrap();

        let mut loser = first;
        loser.set("a", 3);
        let err = storage.put("k", loser).await.unwrap_err();
        assert_eq!(
            err,
            StorageError::VersionMismatch {
                key: "k".into(),
                expected: 1,
                found: 2,
            }
        );
        assert_eq!(
            storage.get("k").await.unwrap().unwrap().get::<i64>("a"),
            Some(2)
        );
    }

    #[tokio::test]
    async fn versioned_put_after_delete_fails() {
        let storage = MemoryStorage::default();
        let doc = storage.put("k", Document::new().with("a", 1)).await.unwrap();
        storage.delete("k").await.unwrap();

        let err = storage.put("k", doc).await.unwrap_err();
        assert_eq!(err, StorageError::AlreadyDeleted("k".into()));
        assert!(storage.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn null_fields_are_removed() {
        let storage = MemoryStorage::default();
        let mut doc = storage
            .put("k", Document::new().with("a", 1).with("b", 2))
            .await
            .unwrap();
        doc.remove("a");
        let doc = storage.put("k", doc).await.unwrap();
        assert_eq!(doc.fields().get("a"), None);
        assert_eq!(doc.get::<i64>("b"), Some(2));
    }

    #[tokio::test]
    async fn save_and_load_are_last_write_wins() {
        let storage = MemoryStorage::default();
        assert_eq!(storage.load("state").await.unwrap(), None);

        storage.save("state", json!("first")).await.unwrap();
        storage.save("state", json!("second")).await.unwrap();
        assert_eq!(storage.load("state").await.unwrap(), Some(json!("second")));
        assert_eq!(storage.get("state").await.unwrap().unwrap().version(), Some(2));
    }

    #[tokio::test]
    async fn eviction_keeps_key_count_bounded() {
        let storage = MemoryStorage::new(10);
        for i in 0..10 {
            storage.save(&format!("k{i}"), json!(i)).await.unwrap();
        }
        assert_eq!(storage.len(), 10);

        storage.save("overflow", json!(true)).await.unwrap();
        assert_eq!(storage.len(), 8);
        assert_eq!(storage.load("overflow").await.unwrap(), Some(json!(true)));

        for i in 0..100 {
            storage.put(&format!("p{i}"), Document::new().with("i", i)).await.unwrap();
            assert!(storage.len() <= 10);
        }
    }
}
