//! Cache storage trait and SQLite implementation.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::http::{Headers, RequestKey, Response};

/// Trait for cache storage backends.
///
/// A backend holds any number of named caches. Each cache maps request keys
/// to responses and remembers the order in which keys were last written.
pub trait CacheStorage: Send + Sync {
  /// Names of all existing caches, oldest first.
  fn cache_names(&self) -> Result<Vec<String>>;

  /// Create the named cache if it does not exist yet.
  fn open(&self, cache: &str) -> Result<()>;

  /// Delete a whole cache with all of its entries.
  /// Returns false if no such cache existed.
  fn delete_cache(&self, cache: &str) -> Result<bool>;

  /// Look up a stored response.
  fn match_entry(&self, cache: &str, key: &RequestKey) -> Result<Option<Response>>;

  /// Store a response, replacing any previous entry for the key.
  /// A replaced entry moves to the back of the key order.
  fn put(&self, cache: &str, key: &RequestKey, response: &Response) -> Result<()>;

  /// Remove a single entry. Returns false if it was not present.
  fn delete(&self, cache: &str, key: &RequestKey) -> Result<bool>;

  /// All keys of a cache in write order, oldest first.
  fn keys(&self, cache: &str) -> Result<Vec<RequestKey>>;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn cache_names(&self) -> Result<Vec<String>> {
    Ok(Vec::new())
  }

  fn open(&self, _cache: &str) -> Result<()> {
    Ok(())
  }

  fn delete_cache(&self, _cache: &str) -> Result<bool> {
    Ok(false)
  }

  fn match_entry(&self, _cache: &str, _key: &RequestKey) -> Result<Option<Response>> {
    Ok(None) // Always miss
  }

  fn put(&self, _cache: &str, _key: &RequestKey, _response: &Response) -> Result<()> {
    Ok(()) // Discard
  }

  fn delete(&self, _cache: &str, _key: &RequestKey) -> Result<bool> {
    Ok(false)
  }

  fn keys(&self, _cache: &str) -> Result<Vec<RequestKey>> {
    Ok(Vec::new())
  }
}

/// SQLite-based cache storage implementation.
///
/// The same database also carries the background sync queue.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the SQLite storage at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;
    Self::open_at(&path)
  }

  /// Open or create the database at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offline-worker").join("cache.db"))
  }

  /// Run a closure against the locked connection.
  pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    f(&mut conn)
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self.with_conn(|conn| {
      conn
        .execute_batch(CACHE_SCHEMA)
        .map_err(|e| eyre!("Failed to run cache migrations: {}", e))
    })
  }
}

/// Schema for cache and queue tables.
const CACHE_SCHEMA: &str = r#"
-- Named caches
CREATE TABLE IF NOT EXISTS caches (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Cache entries; seq orders keys by last write
CREATE TABLE IF NOT EXISTS cache_entries (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    cache_name TEXT NOT NULL,
    key_digest TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (cache_name, key_digest)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_order
    ON cache_entries(cache_name, seq);

-- Deferred work waiting for connectivity
CREATE TABLE IF NOT EXISTS sync_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tag TEXT NOT NULL,
    payload TEXT NOT NULL,
    queued_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_sync_queue_tag ON sync_queue(tag, id);
"#;

fn ensure_cache(conn: &Connection, cache: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO caches (name) VALUES (?)",
      params![cache],
    )
    .map_err(|e| eyre!("Failed to create cache {}: {}", cache, e))?;
  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn cache_names(&self) -> Result<Vec<String>> {
    self.with_conn(|conn| {
      let mut stmt = conn
        .prepare("SELECT name FROM caches ORDER BY rowid")
        .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

      let names = stmt
        .query_map([], |row| row.get(0))
        .map_err(|e| eyre!("Failed to list caches: {}", e))?
        .collect::<std::result::Result<Vec<String>, _>>()
        .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

      Ok(names)
    })
  }

  fn open(&self, cache: &str) -> Result<()> {
    self.with_conn(|conn| ensure_cache(conn, cache))
  }

  fn delete_cache(&self, cache: &str) -> Result<bool> {
    self.with_conn(|conn| {
      let tx = conn
        .transaction()
        .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

      tx.execute(
        "DELETE FROM cache_entries WHERE cache_name = ?",
        params![cache],
      )
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", cache, e))?;

      let removed = tx
        .execute("DELETE FROM caches WHERE name = ?", params![cache])
        .map_err(|e| eyre!("Failed to delete cache {}: {}", cache, e))?;

      tx.commit()
        .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

      Ok(removed > 0)
    })
  }

  fn match_entry(&self, cache: &str, key: &RequestKey) -> Result<Option<Response>> {
    self.with_conn(|conn| {
      let row: Option<(u16, String, Vec<u8>)> = conn
        .query_row(
          "SELECT status, headers, body FROM cache_entries
           WHERE cache_name = ? AND key_digest = ?",
          params![cache, key.digest()],
          |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()
        .map_err(|e| eyre!("Failed to look up {}: {}", key, e))?;

      match row {
        Some((status, headers, body)) => {
          let headers: Headers = serde_json::from_str(&headers)
            .map_err(|e| eyre!("Failed to deserialize headers for {}: {}", key, e))?;
          Ok(Some(Response {
            status,
            headers,
            body,
          }))
        }
        None => Ok(None),
      }
    })
  }

  fn put(&self, cache: &str, key: &RequestKey, response: &Response) -> Result<()> {
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    self.with_conn(|conn| {
      ensure_cache(conn, cache)?;

      // REPLACE deletes the old row, so the entry gets a fresh seq
      conn
        .execute(
          "INSERT OR REPLACE INTO cache_entries
             (cache_name, key_digest, method, url, status, headers, body, stored_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
          params![
            cache,
            key.digest(),
            key.method,
            key.url,
            response.status,
            headers,
            response.body
          ],
        )
        .map_err(|e| eyre!("Failed to store {}: {}", key, e))?;

      Ok(())
    })
  }

  fn delete(&self, cache: &str, key: &RequestKey) -> Result<bool> {
    self.with_conn(|conn| {
      let removed = conn
        .execute(
          "DELETE FROM cache_entries WHERE cache_name = ? AND key_digest = ?",
          params![cache, key.digest()],
        )
        .map_err(|e| eyre!("Failed to delete {}: {}", key, e))?;
      Ok(removed > 0)
    })
  }

  fn keys(&self, cache: &str) -> Result<Vec<RequestKey>> {
    self.with_conn(|conn| {
      let mut stmt = conn
        .prepare("SELECT method, url FROM cache_entries WHERE cache_name = ? ORDER BY seq")
        .map_err(|e| eyre!("Failed to prepare key query: {}", e))?;

      let keys = stmt
        .query_map(params![cache], |row| {
          Ok(RequestKey {
            method: row.get(0)?,
            url: row.get(1)?,
          })
        })
        .map_err(|e| eyre!("Failed to list keys of {}: {}", cache, e))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| eyre!("Failed to read key: {}", e))?;

      Ok(keys)
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn key(path: &str) -> RequestKey {
    let url = Url::parse("https://shop.test/").unwrap().join(path).unwrap();
    RequestKey::new("GET", &url)
  }

  fn storage() -> (tempfile::TempDir, SqliteStorage) {
    let dir = tempfile::tempdir().unwrap();
    let storage = SqliteStorage::open_at(&dir.path().join("cache.db")).unwrap();
    (dir, storage)
  }

  #[test]
  fn test_put_and_match() {
    let (_dir, storage) = storage();
    let response = Response::ok("body{}", "text/css").with_header("etag", "\"v1\"");

    storage.put("static-v1", &key("/a.css"), &response).unwrap();

    let found = storage.match_entry("static-v1", &key("/a.css")).unwrap();
    assert_eq!(found, Some(response));
    assert!(storage.match_entry("static-v1", &key("/b.css")).unwrap().is_none());
    assert!(storage.match_entry("other", &key("/a.css")).unwrap().is_none());
  }

  #[test]
  fn test_rewrite_moves_key_to_back() {
    let (_dir, storage) = storage();
    let body = Response::ok("x", "image/png");

    storage.put("images", &key("/1.png"), &body).unwrap();
    storage.put("images", &key("/2.png"), &body).unwrap();
    storage.put("images", &key("/1.png"), &body).unwrap();

    let keys = storage.keys("images").unwrap();
    assert_eq!(keys, vec![key("/2.png"), key("/1.png")]);
  }

  #[test]
  fn test_delete_cache_removes_entries() {
    let (_dir, storage) = storage();
    storage.open("a").unwrap();
    storage
      .put("b", &key("/x"), &Response::ok("x", "text/plain"))
      .unwrap();

    assert_eq!(storage.cache_names().unwrap(), vec!["a", "b"]);
    assert!(storage.delete_cache("b").unwrap());
    assert!(!storage.delete_cache("b").unwrap());
    assert_eq!(storage.cache_names().unwrap(), vec!["a"]);
    assert!(storage.keys("b").unwrap().is_empty());
  }

  #[test]
  fn test_entries_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");

    {
      let storage = SqliteStorage::open_at(&path).unwrap();
      storage
        .put("dynamic", &key("/api"), &Response::ok("[]", "application/json"))
        .unwrap();
    }

    let storage = SqliteStorage::open_at(&path).unwrap();
    let found = storage.match_entry("dynamic", &key("/api")).unwrap().unwrap();
    assert_eq!(found.text(), "[]");
  }
}
