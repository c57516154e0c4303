//! Key/value state store holding JSON documents under fixed string keys.

use crate::error::{StorageError, StorageResult};
use duckdb::{params, Connection};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Durable per-device state backed by DuckDB.
///
/// Every value is stored as a JSON document. Callers own the key namespace;
/// the store only guarantees that a `put_many` lands atomically.
#[derive(Clone)]
pub struct StateStore {
    conn: Arc<Mutex<Connection>>,
}

impl StateStore {
    /// Opens or creates a state store at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = crate::open_duckdb_with_wal_recovery(path, "64MB", 1)?;
        initialize_state_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory state store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_state_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    /// Reads the raw JSON stored under `key`.
    pub fn get_raw(&self, key: &str) -> StorageResult<Option<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT value_json FROM kv_state WHERE key = ?")?;
        let mut rows = stmt.query_map(params![key], |row| row.get::<_, String>(0))?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Reads and deserializes the value stored under `key`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        match self.get_raw(key)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Serializes and stores `value` under `key`, replacing any previous value.
    pub fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StorageResult<()> {
        let json = serde_json::to_string(value)?;
        let conn = self.lock()?;
        upsert(&conn, key, &json)?;
        debug!("stored {} bytes under {key}", json.len());
        Ok(())
    }

    /// Stores several pre-serialized values in a single transaction.
    pub fn put_many(&self, entries: &[(&str, serde_json::Value)]) -> StorageResult<()> {
        let encoded = entries
            .iter()
            .map(|(key, value)| Ok((*key, serde_json::to_string(value)?)))
            .collect::<StorageResult<Vec<_>>>()?;

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for (key, json) in &encoded {
            upsert(&tx, key, json)?;
        }
        tx.commit()?;
        debug!("stored {} keys in one transaction", encoded.len());
        Ok(())
    }

    /// Removes `key`. Returns true if a value was present.
    pub fn remove(&self, key: &str) -> StorageResult<bool> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM kv_state WHERE key = ?", params![key])?;
        Ok(removed > 0)
    }

    /// Returns true if a value is stored under `key`.
    pub fn contains(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get_raw(key)?.is_some())
    }

    /// Lists all stored keys in lexical order.
    pub fn keys(&self) -> StorageResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT key FROM kv_state ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    /// Milliseconds-since-epoch of the last write to `key`.
    pub fn updated_at(&self, key: &str) -> StorageResult<Option<i64>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT updated_at FROM kv_state WHERE key = ?")?;
        let mut rows = stmt.query_map(params![key], |row| row.get::<_, i64>(0))?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }
}

fn upsert(conn: &Connection, key: &str, json: &str) -> StorageResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO kv_state (key, value_json, updated_at) VALUES (?, ?, ?)",
        params![key, json, chrono::Utc::now().timestamp_millis()],
    )?;
    Ok(())
}

fn initialize_state_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS kv_state (
            key VARCHAR PRIMARY KEY,
            value_json VARCHAR NOT NULL,
            updated_at BIGINT NOT NULL
        );
        "#,
    )?;
    Ok(())
}
