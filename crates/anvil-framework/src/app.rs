//! Application-wide shared state.
//!
//! [`AppHandle`] is built once by the runtime before dispatch starts and
//! shared read-only with every [`Context`](crate::Context) and lifecycle hook.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use anvil_core::{BoxedStorage, MemoryStorage};

/// Name of the storage used when nothing else is configured.
pub const DEFAULT_STORAGE: &str = "default";

/// Default number of updates processed concurrently.
pub const DEFAULT_CONCURRENCY: usize = 512;

fn default_prefixes() -> Vec<String> {
    vec![".".to_string(), "/".to_string()]
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_storage() -> String {
    DEFAULT_STORAGE.to_string()
}

/// Dispatch settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Command prefixes recognised by the commands router.
    #[serde(default = "default_prefixes")]
    pub prefixes: Vec<String>,

    /// Maximum number of updates processed at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Name of the storage holding group and user states.
    #[serde(default = "default_storage")]
    pub storage: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            prefixes: default_prefixes(),
            concurrency: default_concurrency(),
            storage: default_storage(),
        }
    }
}

/// Handle to the running application.
pub struct AppHandle {
    config: DispatchConfig,
    storages: HashMap<String, BoxedStorage>,
    plugin_configs: HashMap<String, Value>,
}

impl AppHandle {
    /// Creates a handle. A [`MemoryStorage`] is registered under the state
    /// storage name if no storage of that name is given.
    pub fn new(
        config: DispatchConfig,
        mut storages: HashMap<String, BoxedStorage>,
        plugin_configs: HashMap<String, Value>,
    ) -> Self {
        storages
            .entry(config.storage.clone())
            .or_insert_with(|| Arc::new(MemoryStorage::default()) as BoxedStorage);
        Self {
            config,
            storages,
            plugin_configs,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn storage(&self, name: &str) -> Option<&BoxedStorage> {
        self.storages.get(name)
    }

    /// All registered storages by name.
    pub fn storages(&self) -> impl Iterator<Item = (&str, &BoxedStorage)> {
        self.storages.iter().map(|(name, s)| (name.as_str(), s))
    }

    /// Raw configuration section of a plugin, `Value::Null` if absent.
    pub fn plugin_config_raw(&self, plugin: &str) -> &Value {
        self.plugin_configs.get(plugin).unwrap_or(&Value::Null)
    }

    /// A plugin's configuration section deserialized into `T`.
    pub fn plugin_config<T: DeserializeOwned>(&self, plugin: &str) -> serde_json::Result<T> {
        T::deserialize(self.plugin_config_raw(plugin))
    }

    /// Like [`plugin_config`](Self::plugin_config), falling back to
    /// `T::default()` when the section is missing or malformed.
    pub fn plugin_config_or_default<T: DeserializeOwned + Default>(&self, plugin: &str) -> T {
        self.plugin_config(plugin).unwrap_or_default()
    }
}

impl std::fmt::Debug for AppHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppHandle")
            .field("config", &self.config)
            .field("storages", &self.storages.keys().collect::<Vec<_>>())
            .field("plugins", &self.plugin_configs.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dispatch_defaults() {
        let config: DispatchConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config, DispatchConfig::default());
        assert_eq!(config.prefixes, [".", "/"]);
        assert_eq!(config.concurrency, 512);
    }

    #[test]
    fn default_storage_is_registered() {
        let app = AppHandle::new(DispatchConfig::default(), HashMap::new(), HashMap::new());
        assert!(app.storage(DEFAULT_STORAGE).is_some());
        assert_eq!(app.storages().count(), 1);
    }

    #[test]
    fn plugin_sections() {
        #[derive(Deserialize, Default, Debug, PartialEq)]
        struct Greeting {
            text: String,
        }

        let configs = HashMap::from([("greeter".to_string(), json!({ "text": "hey" }))]);
        let app = AppHandle::new(DispatchConfig::default(), HashMap::new(), configs);

        let greeting: Greeting = app.plugin_config("greeter").unwrap();
        assert_eq!(greeting.text, "hey");
        assert!(app.plugin_config::<Greeting>("missing").is_err());
        assert_eq!(app.plugin_config_or_default::<Greeting>("missing"), Greeting::default());
    }
}
