//! SQLite-backed cache provider.
//!
//! Persists entries in a single-file database so warm metadata survives a
//! restart. Any network store plugs in the same way by implementing
//! [`CacheProvider`].
//!
//! # Design
//!
//! - Opaque byte values with an absolute expiry in unix milliseconds
//! - Expired rows read as misses and are purged by [`SqliteProvider::purge_expired`]
//! - Versioned - auto-clears on version mismatch
//! - Prefix deletes use `LIKE prefix%` with `%` and `_` escaped
//! - The async [`CacheProvider`] methods run on tokio's blocking pool, so a
//!   slow disk or a contended connection never stalls a runtime worker and
//!   the caller's deadline still fires

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::{CacheError, CacheProvider, CacheResult};

/// Current cache schema version. Bump this when the cache format changes.
const CACHE_VERSION: i32 = 1;

/// SQLite cache provider. Clones share one connection.
#[derive(Debug, Clone)]
pub struct SqliteProvider {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteProvider {
    /// Open or create the cache database at `path`.
    ///
    /// `:memory:` opens a private in-memory database. If the stored version
    /// doesn't match, the cache is cleared.
    pub fn open(path: impl AsRef<Path>) -> CacheResult<Self> {
        let path = path.as_ref();
        if path == Path::new(":memory:") {
            return Self::open_in_memory();
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let provider = Self {
            conn: Arc::new(Mutex::new(Connection::open(path)?)),
        };
        provider.init()?;
        Ok(provider)
    }

    /// Open an in-memory cache.
    pub fn open_in_memory() -> CacheResult<Self> {
        let provider = Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
        };
        provider.init()?;
        Ok(provider)
    }

    /// Default location of the cache file.
    pub fn default_path() -> CacheResult<PathBuf> {
        let base = dirs::cache_dir().ok_or(CacheError::NoCacheDir)?;
        Ok(base.join("datasetq").join("metadata.db"))
    }

    fn lock(&self) -> CacheResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| CacheError::Poisoned)
    }

    /// Run a blocking operation on tokio's blocking pool.
    async fn run_blocking<T, F>(&self, op: F) -> CacheResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&SqliteProvider) -> CacheResult<T> + Send + 'static,
    {
        let provider = self.clone();
        tokio::task::spawn_blocking(move || op(&provider)).await?
    }

    fn ping_blocking(&self) -> CacheResult<()> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    fn init(&self) -> CacheResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS cache (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                expires_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;

        let stored_version: Option<i32> = conn
            .query_row("SELECT value FROM meta WHERE key = 'version'", [], |row| {
                let s: String = row.get(0)?;
                Ok(s.parse().unwrap_or(0))
            })
            .optional()?;

        match stored_version {
            Some(v) if v == CACHE_VERSION => {}
            Some(_) => {
                conn.execute("DELETE FROM cache", [])?;
                Self::set_version(&conn)?;
            }
            None => Self::set_version(&conn)?,
        }

        Ok(())
    }

    fn set_version(conn: &Connection) -> CacheResult<()> {
        conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES ('version', ?)",
            params![CACHE_VERSION.to_string()],
        )?;
        Ok(())
    }

    fn now_millis() -> i64 {
        Utc::now().timestamp_millis()
    }

    /// Read a live entry.
    pub fn get_blocking(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let conn = self.lock()?;
        let value = conn
            .query_row(
                "SELECT value FROM cache WHERE key = ? AND expires_at >= ?",
                params![key, Self::now_millis()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Insert or replace an entry.
    pub fn set_blocking(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = Self::now_millis().saturating_add(ttl_ms);
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO cache (key, value, expires_at) VALUES (?, ?, ?)",
            params![key, value, expires_at],
        )?;
        Ok(())
    }

    pub fn delete_blocking(&self, key: &str) -> CacheResult<bool> {
        let conn = self.lock()?;
        let rows = conn.execute("DELETE FROM cache WHERE key = ?", params![key])?;
        Ok(rows > 0)
    }

    /// Delete all entries whose key starts with `prefix`.
    pub fn delete_prefix_blocking(&self, prefix: &str) -> CacheResult<usize> {
        let pattern = format!("{}%", escape_like(prefix));
        let conn = self.lock()?;
        let rows = conn.execute(
            "DELETE FROM cache WHERE key LIKE ? ESCAPE '\\'",
            params![pattern],
        )?;
        Ok(rows)
    }

    /// Remove every expired row.
    pub fn purge_expired(&self) -> CacheResult<usize> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "DELETE FROM cache WHERE expires_at < ?",
            params![Self::now_millis()],
        )?;
        Ok(rows)
    }

    /// Clear all cache entries (but keep metadata).
    pub fn clear_all(&self) -> CacheResult<()> {
        self.lock()?.execute("DELETE FROM cache", [])?;
        Ok(())
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheResult<CacheStats> {
        let conn = self.lock()?;
        let entry_count: i64 = conn.query_row("SELECT COUNT(*) FROM cache", [], |row| row.get(0))?;
        let total_size: i64 = conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(value)), 0) FROM cache",
            [],
            |row| row.get(0),
        )?;

        Ok(CacheStats {
            entry_count: entry_count as usize,
            total_size_bytes: total_size as usize,
        })
    }
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[async_trait]
impl CacheProvider for SqliteProvider {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let key = key.to_string();
        self.run_blocking(move |p| p.get_blocking(&key)).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        let (key, value) = (key.to_string(), value.to_vec());
        self.run_blocking(move |p| p.set_blocking(&key, &value, ttl))
            .await
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let key = key.to_string();
        self.run_blocking(move |p| p.delete_blocking(&key).map(|_| ()))
            .await
    }

    async fn delete_by_prefix(&self, prefix: &str) -> CacheResult<u64> {
        let prefix = prefix.to_string();
        self.run_blocking(move |p| p.delete_prefix_blocking(&prefix).map(|n| n as u64))
            .await
    }

    async fn ping(&self) -> CacheResult<()> {
        self.run_blocking(|p| p.ping_blocking()).await
    }
}

/// Cache statistics.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of rows in the cache, expired ones included.
    pub entry_count: usize,
    /// Total size of all values in bytes.
    pub total_size_bytes: usize,
}
