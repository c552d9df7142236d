//! SQLite-backed `KeyValueStore` implementation with durable persistence.

use crate::{validate_namespace, KeyValueStore, StoreFactory, StoreResult};
use async_trait::async_trait;
use pactbot_core::current_unix_timestamp_ms;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Persistent SQLite store scoped to one namespace.
#[derive(Debug)]
pub struct SqliteKeyValueStore {
    db_path: PathBuf,
    namespace: String,
}

impl SqliteKeyValueStore {
    /// Opens `namespace` inside the database at `path`, creating schema if needed.
    pub fn open(path: impl AsRef<Path>, namespace: &str) -> StoreResult<Self> {
        validate_namespace(namespace)?;
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self {
            db_path,
            namespace: namespace.to_string(),
        };
        let connection = store.open_connection()?;
        initialize_schema(&connection)?;
        Ok(store)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn open_connection(&self) -> StoreResult<Connection> {
        open_database(&self.db_path)
    }
}

fn open_database(path: &Path) -> StoreResult<Connection> {
    let connection = Connection::open(path)?;
    connection.busy_timeout(Duration::from_secs(5))?;
    connection.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        "#,
    )?;
    Ok(connection)
}

fn initialize_schema(connection: &Connection) -> StoreResult<()> {
    connection.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS kv_entries (
            namespace TEXT NOT NULL,
            entry_key TEXT NOT NULL,
            value_json TEXT NOT NULL,
            updated_unix_ms INTEGER NOT NULL,
            PRIMARY KEY (namespace, entry_key)
        );
        "#,
    )?;
    Ok(())
}

fn upsert_entry(
    connection: &Connection,
    namespace: &str,
    key: &str,
    value: &Value,
    now_unix_ms: u64,
) -> StoreResult<()> {
    connection.execute(
        r#"
        INSERT INTO kv_entries (namespace, entry_key, value_json, updated_unix_ms)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT (namespace, entry_key)
        DO UPDATE SET value_json = excluded.value_json, updated_unix_ms = excluded.updated_unix_ms
        "#,
        params![
            namespace,
            key,
            serde_json::to_string(value)?,
            i64::try_from(now_unix_ms).unwrap_or(i64::MAX),
        ],
    )?;
    Ok(())
}

#[async_trait]
impl KeyValueStore for SqliteKeyValueStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        let connection = self.open_connection()?;
        let raw: Option<String> = connection
            .query_row(
                "SELECT value_json FROM kv_entries WHERE namespace = ?1 AND entry_key = ?2",
                params![self.namespace, key],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: Value) -> StoreResult<()> {
        let connection = self.open_connection()?;
        upsert_entry(
            &connection,
            &self.namespace,
            key,
            &value,
            current_unix_timestamp_ms(),
        )
    }

    async fn put_many(&self, entries: Vec<(String, Value)>) -> StoreResult<()> {
        let mut connection = self.open_connection()?;
        let transaction = connection.transaction()?;
        let now_unix_ms = current_unix_timestamp_ms();
        for (key, value) in &entries {
            upsert_entry(&transaction, &self.namespace, key, value, now_unix_ms)?;
        }
        transaction.commit()?;
        Ok(())
    }

    async fn delete_all(&self) -> StoreResult<()> {
        let connection = self.open_connection()?;
        connection.execute(
            "DELETE FROM kv_entries WHERE namespace = ?1",
            params![self.namespace],
        )?;
        Ok(())
    }
}

/// Opens namespaces inside one shared SQLite database file.
#[derive(Debug, Clone)]
pub struct SqliteStoreFactory {
    db_path: PathBuf,
}

impl SqliteStoreFactory {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            db_path: path.as_ref().to_path_buf(),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

impl StoreFactory for SqliteStoreFactory {
    fn open(&self, namespace: &str) -> StoreResult<Arc<dyn KeyValueStore>> {
        Ok(Arc::new(SqliteKeyValueStore::open(&self.db_path, namespace)?))
    }

    fn namespaces(&self) -> StoreResult<Vec<String>> {
        if !self.db_path.exists() {
            return Ok(Vec::new());
        }
        let connection = open_database(&self.db_path)?;
        initialize_schema(&connection)?;
        let mut statement = connection
            .prepare("SELECT DISTINCT namespace FROM kv_entries ORDER BY namespace")?;
        let names = statement
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}
