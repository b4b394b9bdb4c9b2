//! Versioned documents.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A field map with an optimistic-locking version.
///
/// Documents returned by a [`Storage`](super::Storage) carry the key they
/// were read from and the stored version. A fresh [`Document::new`] has no
/// version, which tells `put` to create the record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(skip)]
    key: Option<String>,
    #[serde(flatten)]
    fields: Map<String, Value>,
    #[serde(rename = "_version", default, skip_serializing_if = "Option::is_none")]
    version: Option<u64>,
}

impl Document {
    /// Creates an empty, unversioned document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an unversioned document from existing fields.
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self {
            key: None,
            fields,
            version: None,
        }
    }

    /// Builds a document as stored under `key` at `version`.
    ///
    /// Meant for storage implementations.
    pub fn stored(key: impl Into<String>, fields: Map<String, Value>, version: u64) -> Self {
        Self {
            key: Some(key.into()),
            fields,
            version: Some(version),
        }
    }

    /// Sets a field (builder style).
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Sets the version the writer claims to have observed.
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    /// The key this document was read from or written to.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// The stored version, `None` for documents not yet persisted.
    pub fn version(&self) -> Option<u64> {
        self.version
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    pub fn get_raw(&self, field: &str) -> Option<&Value> {
        self.fields.get(field).filter(|v| !v.is_null())
    }

    /// Deserializes a field, returning `None` if it is absent or has the
    /// wrong shape.
    pub fn get<T: DeserializeOwned>(&self, field: &str) -> Option<T> {
        self.get_raw(field)
            .and_then(|v| T::deserialize(v).ok())
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Marks a field for removal on the next `put`.
    pub fn remove(&mut self, field: impl Into<String>) {
        self.fields.insert(field.into(), Value::Null);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn typed_field_access() {
        let mut doc = Document::new().with("count", 3).with("name", "bob");
        assert_eq!(doc.get::<u32>("count"), Some(3));
        assert_eq!(doc.get::<String>("name").as_deref(), Some("bob"));
        assert_eq!(doc.get::<u32>("name"), None);

        doc.remove("name");
        assert_eq!(doc.get_raw("name"), None);
        assert_eq!(doc.fields().get("name"), Some(&Value::Null));
    }

    #[test]
    fn serializes_version_field() {
        let doc = Document::new().with("a", 1).with_version(4);
        assert_eq!(serde_json::to_value(&doc).unwrap(), json!({ "a": 1, "_version": 4 }));

        let parsed: Document = serde_json::from_value(json!({ "a": 1, "_version": 2 })).unwrap();
        assert_eq!(parsed.version(), Some(2));
        assert_eq!(parsed.get::<i64>("a"), Some(1));
    }
}
