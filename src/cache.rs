//! Local durable cache
//!
//! A small SQLite key-value table that mirrors the task list, the logged-in
//! user and the active factory code between runs.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Key holding the task collection as a JSON array
pub const TASKS_KEY: &str = "factory_tasks";
/// Key holding the logged-in user as a JSON object
pub const USER_KEY: &str = "factory_user";
/// Key holding the active factory code as a plain string
pub const BUCKET_KEY: &str = "factory_sync_code";

/// Thread-safe cache wrapper
pub struct LocalCache {
    conn: Mutex<Connection>,
}

impl LocalCache {
    /// Open or create the cache file
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context("Failed to create cache directory")?;
        }

        let conn = Connection::open(path).context("Failed to open cache database")?;
        Self::with_connection(conn)
    }

    /// Cache that lives only as long as the process
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory cache")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let cache = Self {
            conn: Mutex::new(conn),
        };
        cache.init()?;
        Ok(cache)
    }

    fn init(&self) -> Result<()> {
        self.conn().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Raw value under `key`
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn()
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// Decode the JSON stored under `key`.
    ///
    /// Unreadable or malformed entries count as absent.
    pub fn load_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to read cache entry");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "Ignoring malformed cache entry");
                None
            }
        }
    }

    pub fn store_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value).context("Failed to serialize cache entry")?;
        self.put(key, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_remove() {
        let cache = LocalCache::open_in_memory().unwrap();
        assert_eq!(cache.get(BUCKET_KEY).unwrap(), None);

        cache.put(BUCKET_KEY, "line-4").unwrap();
        assert_eq!(cache.get(BUCKET_KEY).unwrap().as_deref(), Some("line-4"));

        cache.put(BUCKET_KEY, "line-5").unwrap();
        assert_eq!(cache.get(BUCKET_KEY).unwrap().as_deref(), Some("line-5"));

        cache.remove(BUCKET_KEY).unwrap();
        assert_eq!(cache.get(BUCKET_KEY).unwrap(), None);
    }

    #[test]
    fn malformed_json_reads_as_absent() {
        let cache = LocalCache::open_in_memory().unwrap();
        cache.put(TASKS_KEY, "{not json").unwrap();
        assert!(cache.load_json::<Vec<String>>(TASKS_KEY).is_none());
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.sqlite");

        LocalCache::open(&path)
            .unwrap()
            .store_json(TASKS_KEY, &vec!["a", "b"])
            .unwrap();

        let reopened = LocalCache::open(&path).unwrap();
        assert_eq!(
            reopened.load_json::<Vec<String>>(TASKS_KEY),
            Some(vec!["a".to_string(), "b".to_string()])
        );
    }
}
