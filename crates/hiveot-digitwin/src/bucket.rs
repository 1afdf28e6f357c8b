// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! Key-value bucket storage
//!
//! A bucket is a named key-value collection. The digital-twin store keeps
//! one record per Thing in the `digitwin` bucket.
//!
//! # Implementations
//!
//! - `SqliteBucket` -- file backed, one table shared by all buckets
//! - `MemoryBucket` -- volatile, for tests and `storage.backend = "memory"`

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError, RwLock};
use tracing::debug;

/// Key-value bucket.
pub trait Bucket: Send + Sync {
    /// Name of the bucket.
    fn name(&self) -> &str;

    /// Read a value. Returns None if the key does not exist.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Insert or replace a value.
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Remove a key. Removing a missing key is not an error.
    fn delete(&self, key: &str) -> Result<()>;

    /// All keys, in ascending order.
    fn keys(&self) -> Result<Vec<String>>;

    /// All entries, in ascending key order.
    fn entries(&self) -> Result<Vec<(String, Vec<u8>)>>;

    /// Number of entries.
    fn count(&self) -> Result<usize>;
}

/// SQLite backed bucket
///
/// Thread-safe via internal Mutex (SQLite Connection is not Sync).
///
/// # Schema
///
/// ```sql
/// CREATE TABLE buckets (
///     bucket TEXT NOT NULL,
///     key TEXT NOT NULL,
///     value BLOB NOT NULL,
///     PRIMARY KEY (bucket, key)
/// );
/// ```
pub struct SqliteBucket {
    name: String,
    conn: Mutex<Connection>,
}

impl SqliteBucket {
    /// Open a bucket in a database file, creating the file if needed.
    pub fn open(path: impl AsRef<Path>, name: &str) -> Result<Self> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory {}", dir.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database at {}", path.display()))?;
        let bucket = Self {
            name: name.to_string(),
            conn: Mutex::new(conn),
        };
        bucket.init_schema()?;
        debug!("bucket '{}' opened at {}", name, path.display());
        Ok(bucket)
    }

    /// Open a bucket in an in-memory database (for testing)
    pub fn open_in_memory(name: &str) -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to create in-memory SQLite database")?;
        let bucket = Self {
            name: name.to_string(),
            conn: Mutex::new(conn),
        };
        bucket.init_schema()?;
        Ok(bucket)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "CREATE TABLE IF NOT EXISTS buckets (
                bucket TEXT NOT NULL,
                key TEXT NOT NULL,
                value BLOB NOT NULL,
                PRIMARY KEY (bucket, key)
            )",
            [],
        )
        .context("Failed to create bucket table")?;
        Ok(())
    }
}

impl Bucket for SqliteBucket {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let value = conn
            .query_row(
                "SELECT value FROM buckets WHERE bucket = ?1 AND key = ?2",
                params![self.name, key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()
            .with_context(|| format!("Failed to read '{}' from bucket '{}'", key, self.name))?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "INSERT INTO buckets (bucket, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(bucket, key) DO UPDATE SET value = excluded.value",
            params![self.name, key, value],
        )
        .with_context(|| format!("Failed to write '{}' to bucket '{}'", key, self.name))?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "DELETE FROM buckets WHERE bucket = ?1 AND key = ?2",
            params![self.name, key],
        )
        .with_context(|| format!("Failed to delete '{}' from bucket '{}'", key, self.name))?;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt =
            conn.prepare("SELECT key FROM buckets WHERE bucket = ?1 ORDER BY key ASC")?;
        let keys = stmt
            .query_map([&self.name], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    fn entries(&self) -> Result<Vec<(String, Vec<u8>)>> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt =
            conn.prepare("SELECT key, value FROM buckets WHERE bucket = ?1 ORDER BY key ASC")?;
        let entries = stmt
            .query_map([&self.name], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM buckets WHERE bucket = ?1",
            [&self.name],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

/// Volatile bucket.
#[derive(Debug, Default)]
pub struct MemoryBucket {
    name: String,
    data: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBucket {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            data: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Bucket for MemoryBucket {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self
            .data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect())
    }

    fn entries(&self) -> Result<Vec<(String, Vec<u8>)>> {
        Ok(self
            .data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.data.read().unwrap_or_else(PoisonError::into_inner).len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn exercise(bucket: &dyn Bucket) {
        assert_eq!(bucket.get("a").unwrap(), None);
        bucket.set("b", b"two").unwrap();
        bucket.set("a", b"one").unwrap();
        bucket.set("a", b"uno").unwrap();
        assert_eq!(bucket.get("a").unwrap(), Some(b"uno".to_vec()));
        assert_eq!(bucket.keys().unwrap(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(bucket.count().unwrap(), 2);

        bucket.delete("a").unwrap();
        bucket.delete("missing").unwrap();
        assert_eq!(
            bucket.entries().unwrap(),
            vec![("b".to_string(), b"two".to_vec())]
        );
    }

    #[test]
    fn test_memory_bucket() {
        exercise(&MemoryBucket::new("test"));
    }

    #[test]
    fn test_sqlite_bucket_in_memory() {
        exercise(&SqliteBucket::open_in_memory("test").unwrap());
    }

    #[test]
    fn test_sqlite_bucket_persists_and_isolates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stores/digitwin.db");
        {
            let bucket = SqliteBucket::open(&path, "digitwin").unwrap();
            bucket.set("dtw:a1:t1", b"{}").unwrap();
            let other = SqliteBucket::open(&path, "other").unwrap();
            other.set("x", b"1").unwrap();
        }
        let bucket = SqliteBucket::open(&path, "digitwin").unwrap();
        assert_eq!(bucket.keys().unwrap(), vec!["dtw:a1:t1".to_string()]);
        assert_eq!(bucket.get("dtw:a1:t1").unwrap(), Some(b"{}".to_vec()));
    }
}
