//! SQLite implementation of cache storage.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use url::Url;

use super::traits::{CacheStorage, CachedResponse};
use crate::net::{RequestKey, Response, ResponseKind};

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the database at `path`, or at the default location.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Storage that lives only as long as this value.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offline-agent").join("cache.db"))
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per cache generation (e.g. mortzkey-v2.0.0)
CREATE TABLE IF NOT EXISTS cache_generations (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored responses, keyed by request identity within a generation
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    request_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    kind TEXT NOT NULL,
    redirected INTEGER NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, request_hash),
    FOREIGN KEY (cache_name) REFERENCES cache_generations(name) ON DELETE CASCADE
);
"#;

fn ensure_generation(conn: &Connection, cache_name: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO cache_generations (name) VALUES (?)",
      params![cache_name],
    )
    .map_err(|e| eyre!("Failed to open cache {}: {}", cache_name, e))?;
  Ok(())
}

fn insert_entry(
  conn: &Connection,
  cache_name: &str,
  key: &RequestKey,
  response: &Response,
) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries
         (cache_name, request_hash, request_key, url, status, status_text, headers, kind, redirected, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        cache_name,
        key.hash(),
        key.to_string(),
        response.url.as_str(),
        response.status,
        response.status_text,
        headers,
        response.kind.as_str(),
        response.redirected,
        response.body,
      ],
    )
    .map_err(|e| eyre!("Failed to store {}: {}", key, e))?;

  Ok(())
}

/// Raw column values of a stored entry.
type EntryRow = (String, u16, String, String, String, bool, Vec<u8>, String);

fn decode_entry(row: EntryRow) -> Result<CachedResponse> {
  let (url, status, status_text, headers, kind, redirected, body, cached_at) = row;

  let response = Response {
    url: Url::parse(&url).map_err(|e| eyre!("Corrupt cached URL '{}': {}", url, e))?,
    status,
    status_text,
    headers: serde_json::from_str(&headers)
      .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?,
    body,
    kind: ResponseKind::parse(&kind).ok_or_else(|| eyre!("Unknown response kind '{}'", kind))?,
    redirected,
  };

  Ok(CachedResponse {
    response,
    cached_at: parse_datetime(&cached_at)?,
  })
}

impl CacheStorage for SqliteStorage {
  fn open(&self, cache_name: &str) -> Result<()> {
    let conn = self.lock()?;
    ensure_generation(&conn, cache_name)
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_generations ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }

  fn has(&self, cache_name: &str) -> Result<bool> {
    let conn = self.lock()?;

    let found: Option<i64> = conn
      .query_row(
        "SELECT 1 FROM cache_generations WHERE name = ?",
        params![cache_name],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up cache {}: {}", cache_name, e))?;

    Ok(found.is_some())
  }

  fn delete(&self, cache_name: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE cache_name = ?",
      params![cache_name],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", cache_name, e))?;

    let removed = tx
      .execute(
        "DELETE FROM cache_generations WHERE name = ?",
        params![cache_name],
      )
      .map_err(|e| eyre!("Failed to delete cache {}: {}", cache_name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn match_request(&self, cache_name: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self.lock()?;

    let row: Option<EntryRow> = conn
      .query_row(
        "SELECT url, status, status_text, headers, kind, redirected, body, cached_at
         FROM cache_entries
         WHERE cache_name = ? AND request_hash = ?",
        params![cache_name, key.hash()],
        |row| {
          Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
            row.get(7)?,
          ))
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", key, e))?;

    row.map(decode_entry).transpose()
  }

  fn put(&self, cache_name: &str, key: &RequestKey, response: &Response) -> Result<()> {
    let conn = self.lock()?;
    ensure_generation(&conn, cache_name)?;
    insert_entry(&conn, cache_name, key, response)
  }

  fn put_all(&self, cache_name: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_generation(&tx, cache_name)?;
    for (key, response) in entries {
      insert_entry(&tx, cache_name, key, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::testing::response;

  const INDEX: &str = "https://apps.example.com/mortzkey/index.html";

  fn key(url: &str) -> RequestKey {
    RequestKey::get(&Url::parse(url).unwrap())
  }

  #[test]
  fn test_put_then_match() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let stored = response(INDEX, 200, ResponseKind::Basic, "<html>v2</html>");

    storage.put("mortzkey-v2.0.0", &key(INDEX), &stored).unwrap();

    let cached = storage
      .match_request("mortzkey-v2.0.0", &key(INDEX))
      .unwrap()
      .unwrap();
    assert_eq!(cached.response, stored);
    assert!(storage.has("mortzkey-v2.0.0").unwrap());
  }

  #[test]
  fn test_open_creates_empty_generation() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    assert!(!storage.has("mortzkey-v2.0.0").unwrap());

    storage.open("mortzkey-v2.0.0").unwrap();

    assert!(storage.has("mortzkey-v2.0.0").unwrap());
    assert!(storage
      .match_request("mortzkey-v2.0.0", &key(INDEX))
      .unwrap()
      .is_none());
  }

  #[test]
  fn test_match_is_scoped_to_generation() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let stored = response(INDEX, 200, ResponseKind::Basic, "old");
    storage.put("mortzkey-v1.0.0", &key(INDEX), &stored).unwrap();

    assert!(storage
      .match_request("mortzkey-v2.0.0", &key(INDEX))
      .unwrap()
      .is_none());
  }

  #[test]
  fn test_put_overwrites_same_request() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let cache = "mortzkey-v2.0.0";

    storage
      .put(cache, &key(INDEX), &response(INDEX, 200, ResponseKind::Basic, "first"))
      .unwrap();
    storage
      .put(cache, &key(INDEX), &response(INDEX, 200, ResponseKind::Basic, "second"))
      .unwrap();

    let cached = storage.match_request(cache, &key(INDEX)).unwrap().unwrap();
    assert_eq!(cached.response.body, b"second");
  }

  #[test]
  fn test_keys_and_delete() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open("mortzkey-v1.0.0").unwrap();
    storage.open("mortzkey-v2.0.0").unwrap();
    storage.open("mortzkey-v2.0.0").unwrap();
    storage
      .put(
        "mortzkey-v1.0.0",
        &key(INDEX),
        &response(INDEX, 200, ResponseKind::Basic, "old"),
      )
      .unwrap();

    assert_eq!(
      storage.keys().unwrap(),
      vec!["mortzkey-v1.0.0".to_string(), "mortzkey-v2.0.0".to_string()]
    );

    assert!(storage.delete("mortzkey-v1.0.0").unwrap());
    assert!(!storage.delete("mortzkey-v1.0.0").unwrap());
    assert_eq!(storage.keys().unwrap(), vec!["mortzkey-v2.0.0".to_string()]);

    // Entries are gone with their generation
    storage.open("mortzkey-v1.0.0").unwrap();
    assert!(storage
      .match_request("mortzkey-v1.0.0", &key(INDEX))
      .unwrap()
      .is_none());
  }

  #[test]
  fn test_put_all_creates_generation() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let icon = "https://apps.example.com/mortzkey/icons/favicon.ico";
    let entries = vec![
      (key(INDEX), response(INDEX, 200, ResponseKind::Basic, "index")),
      (key(icon), response(icon, 200, ResponseKind::Basic, "icon")),
    ];

    storage.put_all("mortzkey-v2.0.0", &entries).unwrap();

    assert_eq!(storage.keys().unwrap(), vec!["mortzkey-v2.0.0".to_string()]);
    for (k, _) in &entries {
      assert!(storage.match_request("mortzkey-v2.0.0", k).unwrap().is_some());
    }
  }

  #[test]
  fn test_open_creates_database_file() {
    let dir = std::env::temp_dir().join(format!("offline-agent-test-{}", std::process::id()));
    let path = dir.join("nested").join("cache.db");

    {
      let storage = SqliteStorage::open(Some(&path)).unwrap();
      storage.open("mortzkey-v2.0.0").unwrap();
    }
    assert!(path.exists());

    let reopened = SqliteStorage::open(Some(&path)).unwrap();
    assert!(reopened.has("mortzkey-v2.0.0").unwrap());

    let _ = std::fs::remove_dir_all(&dir);
  }
}
