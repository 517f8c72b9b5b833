//! Namespaced key/value store with TTL expiry, backed by SQLite.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use metrics::counter;
use parking_lot::Mutex;
use polyglot_core::MILLIS_PER_DAY;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use super::clock::Clock;
use super::schema;
use crate::{Error, Result};

/// A cache namespace. Each maps to one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Namespace {
    LanguageIndex,
    Records,
    Metrics,
}

impl Namespace {
    pub const ALL: [Namespace; 3] = [Self::LanguageIndex, Self::Records, Self::Metrics];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::LanguageIndex => "language_index",
            Self::Records => "records",
            Self::Metrics => "metrics",
        }
    }

    fn table(self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Path to the SQLite database.
    pub path: PathBuf,
    pub language_index_ttl_days: u32,
    pub records_ttl_days: u32,
    pub metrics_ttl_days: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/polyglot-cache.db"),
            language_index_ttl_days: 30,
            records_ttl_days: 30,
            metrics_ttl_days: 7,
        }
    }
}

impl CacheConfig {
    /// Lifetime of entries in `namespace`, in milliseconds.
    pub fn ttl_ms(&self, namespace: Namespace) -> i64 {
        let days = match namespace {
            Namespace::LanguageIndex => self.language_index_ttl_days,
            Namespace::Records => self.records_ttl_days,
            Namespace::Metrics => self.metrics_ttl_days,
        };
        days as i64 * MILLIS_PER_DAY
    }
}

/// A raw cache row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub key: String,
    pub data: String,
    /// Write time, unix milliseconds.
    pub generated_at: i64,
    /// Lifetime in milliseconds.
    pub ttl: i64,
}

impl StoredEntry {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.generated_at.saturating_add(self.ttl) < now_ms
    }
}

/// SQLite-backed store. Expired rows are never returned; they are deleted
/// when a read encounters them and by [`CacheStore::sweep_expired`].
pub struct CacheStore {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl CacheStore {
    /// Open or create the store at `path` and sweep expired entries.
    pub fn open(path: &Path, clock: Arc<dyn Clock>) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| Error::Database(format!("Failed to open SQLite: {}", e)))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| Error::Database(format!("Failed to set PRAGMA: {}", e)))?;

        schema::init_schema(&conn)
            .map_err(|e| Error::Database(format!("Failed to init schema: {}", e)))?;

        let store = Self {
            conn: Mutex::new(conn),
            clock,
        };

        let swept = store.sweep_expired()?;
        let total: usize = swept.iter().map(|(_, n)| n).sum();
        info!(path = %path.display(), expired = total, "cache opened");

        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory(clock: Arc<dyn Clock>) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("Failed to open in-memory SQLite: {}", e)))?;

        schema::init_schema(&conn)
            .map_err(|e| Error::Database(format!("Failed to init schema: {}", e)))?;

        Ok(Self {
            conn: Mutex::new(conn),
            clock,
        })
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Insert or overwrite an entry, stamped with the current time.
    pub fn put(&self, namespace: Namespace, key: &str, data: &str, ttl_ms: i64) -> Result<()> {
        let now = self.now_ms();
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {} (key, data, generated_at, ttl) VALUES (?1, ?2, ?3, ?4)",
                namespace.table()
            ),
            params![key, data, now, ttl_ms],
        )
        .map_err(|e| Error::Database(format!("Failed to write {} entry: {}", namespace, e)))?;
        Ok(())
    }

    /// Read a live entry. An expired entry is deleted and reported as absent.
    pub fn get(&self, namespace: Namespace, key: &str) -> Result<Option<StoredEntry>> {
        let now = self.now_ms();
        let conn = self.conn.lock();

        let entry = conn
            .query_row(
                &format!(
                    "SELECT key, data, generated_at, ttl FROM {} WHERE key = ?1",
                    namespace.table()
                ),
                [key],
                row_to_entry,
            )
            .optional()
            .map_err(|e| Error::Database(format!("Failed to read {} entry: {}", namespace, e)))?;

        match entry {
            Some(entry) if entry.is_expired(now) => {
                delete_row(&conn, namespace, key)?;
                counter!("cache_expired_total", "namespace" => namespace.as_str()).increment(1);
                counter!("cache_misses_total", "namespace" => namespace.as_str()).increment(1);
                debug!(%namespace, key, "entry expired");
                Ok(None)
            }
            Some(entry) => {
                counter!("cache_hits_total", "namespace" => namespace.as_str()).increment(1);
                Ok(Some(entry))
            }
            None => {
                counter!("cache_misses_total", "namespace" => namespace.as_str()).increment(1);
                Ok(None)
            }
        }
    }

    /// All live entries in a namespace, ordered by key. Expired entries
    /// encountered along the way are deleted.
    pub fn scan(&self, namespace: Namespace) -> Result<Vec<StoredEntry>> {
        let now = self.now_ms();
        let conn = self.conn.lock();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT key, data, generated_at, ttl FROM {} ORDER BY key",
                namespace.table()
            ))
            .map_err(|e| Error::Database(e.to_string()))?;

        let rows: Vec<StoredEntry> = stmt
            .query_map([], row_to_entry)
            .map_err(|e| Error::Database(e.to_string()))?
            .collect::<rusqlite::Result<_>>()
            .map_err(|e| Error::Database(e.to_string()))?;
        drop(stmt);

        let (expired, live): (Vec<_>, Vec<_>) =
            rows.into_iter().partition(|entry| entry.is_expired(now));
        for entry in &expired {
            delete_row(&conn, namespace, &entry.key)?;
        }
        if !expired.is_empty() {
            counter!("cache_expired_total", "namespace" => namespace.as_str())
                .increment(expired.len() as u64);
            debug!(%namespace, expired = expired.len(), "expired entries removed during scan");
        }

        Ok(live)
    }

    /// Delete one entry. Returns whether it existed.
    pub fn delete(&self, namespace: Namespace, key: &str) -> Result<bool> {
        let conn = self.conn.lock();
        Ok(delete_row(&conn, namespace, key)? > 0)
    }

    /// Number of rows in a namespace, expired or not.
    pub fn count(&self, namespace: Namespace) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {}", namespace.table()),
                [],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(count as usize)
    }

    /// Empty one namespace. Returns the number of rows removed.
    pub fn clear(&self, namespace: Namespace) -> Result<usize> {
        let conn = self.conn.lock();
        conn.execute(&format!("DELETE FROM {}", namespace.table()), [])
            .map_err(|e| Error::Database(format!("Failed to clear {}: {}", namespace, e)))
    }

    /// Empty every namespace.
    pub fn clear_all(&self) -> Result<usize> {
        let mut removed = 0;
        for namespace in Namespace::ALL {
            removed += self.clear(namespace)?;
        }
        info!(removed, "cache cleared");
        Ok(removed)
    }

    /// Delete every expired row, returning how many went per namespace.
    pub fn sweep_expired(&self) -> Result<Vec<(Namespace, usize)>> {
        let now = self.now_ms();
        let conn = self.conn.lock();

        let mut swept = Vec::with_capacity(Namespace::ALL.len());
        for namespace in Namespace::ALL {
            let removed = conn
                .execute(
                    &format!(
                        "DELETE FROM {} WHERE generated_at + ttl < ?1",
                        namespace.table()
                    ),
                    [now],
                )
                .map_err(|e| Error::Database(format!("Failed to sweep {}: {}", namespace, e)))?;
            if removed > 0 {
                counter!("cache_expired_total", "namespace" => namespace.as_str())
                    .increment(removed as u64);
                debug!(%namespace, removed, "swept expired entries");
            }
            swept.push((namespace, removed));
        }
        Ok(swept)
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredEntry> {
    Ok(StoredEntry {
        key: row.get(0)?,
        data: row.get(1)?,
        generated_at: row.get(2)?,
        ttl: row.get(3)?,
    })
}

fn delete_row(conn: &Connection, namespace: Namespace, key: &str) -> Result<usize> {
    conn.execute(
        &format!("DELETE FROM {} WHERE key = ?1", namespace.table()),
        [key],
    )
    .map_err(|e| Error::Database(format!("Failed to delete {} entry: {}", namespace, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::FixedClock;
    use tempfile::TempDir;

    const T: i64 = 1_700_000_000_000;
    const D: i64 = 30 * MILLIS_PER_DAY;

    fn store_at(now: i64) -> (CacheStore, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(now));
        let store = CacheStore::open_in_memory(clock.clone()).unwrap();
        (store, clock)
    }

    #[test]
    fn test_put_get_overwrite() {
        let (store, _) = store_at(T);
        store.put(Namespace::Metrics, "k", "{\"a\":1}", D).unwrap();
        store.put(Namespace::Metrics, "k", "{\"a\":2}", D).unwrap();

        let entry = store.get(Namespace::Metrics, "k").unwrap().unwrap();
        assert_eq!(entry.data, "{\"a\":2}");
        assert_eq!(entry.generated_at, T);
        assert_eq!(store.count(Namespace::Metrics).unwrap(), 1);
        assert!(store.get(Namespace::Records, "k").unwrap().is_none());
    }

    #[test]
    fn test_ttl_edges() {
        let (store, clock) = store_at(T);
        store.put(Namespace::LanguageIndex, "k", "{}", D).unwrap();

        clock.set(T + D - 1);
        assert!(store.get(Namespace::LanguageIndex, "k").unwrap().is_some());

        clock.set(T + D + 1);
        assert!(store.get(Namespace::LanguageIndex, "k").unwrap().is_none());
        // Deleted as a side effect of the read.
        assert_eq!(store.count(Namespace::LanguageIndex).unwrap(), 0);
    }

    #[test]
    fn test_scan_skips_and_deletes_expired() {
        let (store, clock) = store_at(T);
        store.put(Namespace::LanguageIndex, "old", "{}", 1_000).unwrap();
        clock.advance(500);
        store.put(Namespace::LanguageIndex, "new", "{}", D).unwrap();
        clock.advance(1_000);

        let live = store.scan(Namespace::LanguageIndex).unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].key, "new");
        assert_eq!(store.count(Namespace::LanguageIndex).unwrap(), 1);
    }

    #[test]
    fn test_sweep_counts_per_namespace() {
        let (store, clock) = store_at(T);
        store.put(Namespace::LanguageIndex, "a", "{}", 10).unwrap();
        store.put(Namespace::Records, "a", "{}", 10).unwrap();
        store.put(Namespace::Records, "b", "{}", 10).unwrap();
        store.put(Namespace::Metrics, "a", "{}", D).unwrap();
        clock.advance(11);

        let swept = store.sweep_expired().unwrap();
        assert_eq!(
            swept,
            vec![
                (Namespace::LanguageIndex, 1),
                (Namespace::Records, 2),
                (Namespace::Metrics, 0)
            ]
        );
    }

    #[test]
    fn test_clear_all_and_delete() {
        let (store, _) = store_at(T);
        for namespace in Namespace::ALL {
            store.put(namespace, "a", "{}", D).unwrap();
        }
        assert!(store.delete(Namespace::Metrics, "a").unwrap());
        assert!(!store.delete(Namespace::Metrics, "a").unwrap());
        assert_eq!(store.clear_all().unwrap(), 2);
    }

    #[test]
    fn test_open_sweeps_on_startup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("cache.db");
        let clock = Arc::new(FixedClock::new(T));

        {
            let store = CacheStore::open(&path, clock.clone()).unwrap();
            store.put(Namespace::Metrics, "short", "{}", 100).unwrap();
            store.put(Namespace::Metrics, "long", "{}", D).unwrap();
        }

        clock.advance(1_000);
        let store = CacheStore::open(&path, clock).unwrap();
        assert_eq!(store.count(Namespace::Metrics).unwrap(), 1);
        assert!(store.get(Namespace::Metrics, "long").unwrap().is_some());
    }

    #[test]
    fn test_sqlite_failures_surface_as_database_errors() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(FixedClock::new(T));

        // A directory can't be opened as a database file.
        let err = CacheStore::open(dir.path(), clock).err().unwrap();
        assert!(matches!(err, Error::Database(_)), "{err:?}");
    }
}
