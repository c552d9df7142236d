//! JSON-file `KeyValueStore`: one pretty-printed state file per namespace.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use pactbot_core::write_text_atomic;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::{validate_namespace, KeyValueStore, StoreError, StoreFactory, StoreResult};

/// File-backed store that rewrites the whole namespace file on every write.
#[derive(Debug)]
pub struct JsonFileKeyValueStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, Value>>,
}

impl JsonFileKeyValueStore {
    pub fn open(path: PathBuf) -> StoreResult<Self> {
        let entries = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str::<BTreeMap<String, Value>>(&raw)?
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, entries: &BTreeMap<String, Value>) -> StoreResult<()> {
        let object = entries
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect::<Map<String, Value>>();
        let mut payload = serde_json::to_string_pretty(&Value::Object(object))?;
        payload.push('\n');
        write_text_atomic(&self.path, &payload).map_err(|error| StoreError::Persist {
            path: self.path.display().to_string(),
            message: error.to_string(),
        })
    }
}

#[async_trait]
impl KeyValueStore for JsonFileKeyValueStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        let entries = self.entries.lock().await;
        Ok(entries.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Value) -> StoreResult<()> {
        self.put_many(vec![(key.to_string(), value)]).await
    }

    async fn put_many(&self, batch: Vec<(String, Value)>) -> StoreResult<()> {
        let mut entries = self.entries.lock().await;
        let mut next = entries.clone();
        next.extend(batch);
        self.save(&next)?;
        *entries = next;
        Ok(())
    }

    async fn delete_all(&self) -> StoreResult<()> {
        let mut entries = self.entries.lock().await;
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        entries.clear();
        Ok(())
    }
}

/// Maps each namespace to `<state_dir>/<namespace>.json`.
#[derive(Debug)]
pub struct JsonFileStoreFactory {
    state_dir: PathBuf,
    opened: std::sync::Mutex<BTreeMap<String, Arc<JsonFileKeyValueStore>>>,
}

impl JsonFileStoreFactory {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            state_dir: state_dir.as_ref().to_path_buf(),
            opened: std::sync::Mutex::new(BTreeMap::new()),
        }
    }
}

impl StoreFactory for JsonFileStoreFactory {
    fn open(&self, namespace: &str) -> StoreResult<Arc<dyn KeyValueStore>> {
        validate_namespace(namespace)?;
        let mut opened = self
            .opened
            .lock()
            .map_err(|_| StoreError::Poisoned(namespace.to_string()))?;
        if let Some(existing) = opened.get(namespace) {
            let store: Arc<dyn KeyValueStore> = existing.clone();
            return Ok(store);
        }
        let store = Arc::new(JsonFileKeyValueStore::open(
            self.state_dir.join(format!("{namespace}.json")),
        )?);
        opened.insert(namespace.to_string(), store.clone());
        let store: Arc<dyn KeyValueStore> = store;
        Ok(store)
    }

    fn namespaces(&self) -> StoreResult<Vec<String>> {
        if !self.state_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.state_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if validate_namespace(stem).is_ok() {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn backend_name(&self) -> &'static str {
        "json_file"
    }
}

#[cfg(test)]
mod tests {
    use super::{JsonFileKeyValueStore, JsonFileStoreFactory};
    use crate::{KeyValueStore, StoreFactory};
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn integration_json_file_store_survives_reopen() {
        let temp = tempdir().expect("tempdir");
        let factory = JsonFileStoreFactory::new(temp.path());
        let store = factory.open("main").expect("open");
        store
            .put("last_event_time", json!(120_000))
            .await
            .expect("put");

        let path = temp.path().join("main.json");
        let raw = std::fs::read_to_string(&path).expect("read state file");
        assert!(raw.ends_with('\n'));

        let reopened = JsonFileKeyValueStore::open(path.clone()).expect("reopen");
        assert_eq!(reopened.path(), path.as_path());
        assert_eq!(
            reopened.get("last_event_time").await.expect("get"),
            Some(json!(120_000))
        );
    }

    #[tokio::test]
    async fn functional_delete_all_removes_state_file() {
        let temp = tempdir().expect("tempdir");
        let factory = JsonFileStoreFactory::new(temp.path());
        let store = factory.open("main").expect("open");
        store.put("k", json!(true)).await.expect("put");
        store.delete_all().await.expect("delete all");

        assert!(!temp.path().join("main.json").exists());
        assert_eq!(store.get("k").await.expect("get"), None);
        assert_eq!(factory.backend_name(), "json_file");
    }

    #[tokio::test]
    async fn functional_namespaces_lists_persisted_state_files() {
        let temp = tempdir().expect("tempdir");
        let factory = JsonFileStoreFactory::new(temp.path());
        for namespace in ["team-b", "main"] {
            factory
                .open(namespace)
                .expect("open")
                .put("k", json!(1))
                .await
                .expect("put");
        }
        std::fs::write(temp.path().join("notes.txt"), "ignored").expect("write");
        factory.open("never-written").expect("open");

        assert_eq!(
            factory.namespaces().expect("namespaces"),
            vec!["main".to_string(), "team-b".to_string()]
        );
    }
}
