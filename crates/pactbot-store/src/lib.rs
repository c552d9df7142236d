//! Key-value store abstractions and backends for aggregator state.
//!
//! Each aggregator instance owns one namespace. Backends: in-memory (tests,
//! ephemeral runs), JSON file per namespace, and SQLite.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::RwLock;

mod json_file;
mod sqlite;

pub use json_file::{JsonFileKeyValueStore, JsonFileStoreFactory};
pub use sqlite::{SqliteKeyValueStore, SqliteStoreFactory};

/// Result type for key-value store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid namespace '{0}'")]
    InvalidNamespace(String),
    #[error("store namespace '{0}' lock is poisoned")]
    Poisoned(String),
    #[error("failed to persist '{path}': {message}")]
    Persist { path: String, message: String },
    #[error("store is unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Async durable key-value contract owned by a single aggregator instance.
///
/// Writes are last-write-wins per key.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<Value>>;
    async fn put(&self, key: &str, value: Value) -> StoreResult<()>;
    /// Writes several keys. Backends that support transactions apply them atomically.
    async fn put_many(&self, entries: Vec<(String, Value)>) -> StoreResult<()> {
        for (key, value) in entries {
            self.put(&key, value).await?;
        }
        Ok(())
    }
    async fn delete_all(&self) -> StoreResult<()>;
}

/// Opens the store namespace backing one aggregator name.
pub trait StoreFactory: Send + Sync {
    fn open(&self, namespace: &str) -> StoreResult<Arc<dyn KeyValueStore>>;
    /// Namespaces that already hold persisted state, sorted.
    fn namespaces(&self) -> StoreResult<Vec<String>>;
    fn backend_name(&self) -> &'static str;
}

pub(crate) fn validate_namespace(namespace: &str) -> StoreResult<()> {
    let valid = !namespace.is_empty()
        && namespace
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.');
    if valid && namespace != "." && namespace != ".." {
        Ok(())
    } else {
        Err(StoreError::InvalidNamespace(namespace.to_string()))
    }
}

/// In-memory implementation for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Value) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn put_many(&self, batch: Vec<(String, Value)>) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        entries.extend(batch);
        Ok(())
    }

    async fn delete_all(&self) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        entries.clear();
        Ok(())
    }
}

/// Hands out one shared in-memory store per namespace.
#[derive(Debug, Default)]
pub struct InMemoryStoreFactory {
    namespaces: Mutex<HashMap<String, Arc<InMemoryKeyValueStore>>>,
}

impl InMemoryStoreFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the concrete store for `namespace`, creating it when absent.
    pub fn namespace(&self, namespace: &str) -> StoreResult<Arc<InMemoryKeyValueStore>> {
        validate_namespace(namespace)?;
        let mut namespaces = self
            .namespaces
            .lock()
            .map_err(|_| StoreError::Poisoned(namespace.to_string()))?;
        Ok(namespaces
            .entry(namespace.to_string())
            .or_insert_with(|| Arc::new(InMemoryKeyValueStore::new()))
            .clone())
    }
}

impl StoreFactory for InMemoryStoreFactory {
    fn open(&self, namespace: &str) -> StoreResult<Arc<dyn KeyValueStore>> {
        let store: Arc<dyn KeyValueStore> = self.namespace(namespace)?;
        Ok(store)
    }

    fn namespaces(&self) -> StoreResult<Vec<String>> {
        let namespaces = self
            .namespaces
            .lock()
            .map_err(|_| StoreError::Poisoned("*".to_string()))?;
        let mut names = namespaces.keys().cloned().collect::<Vec<_>>();
        names.sort();
        Ok(names)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
