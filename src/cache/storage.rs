//! Cache storage trait with SQLite and in-memory implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, RwLock};

use crate::origin::{Response, ResponseType};

use super::traits::{EntryInfo, StoredResponse};

/// Trait for cache storage backends.
///
/// Storage holds named cache generations, each mapping request identities to
/// response snapshots. Every method is atomic with respect to other callers.
#[async_trait]
pub trait CacheStorage: Send + Sync {
  /// Names of all existing generations.
  async fn generations(&self) -> Result<Vec<String>>;

  async fn has_generation(&self, generation: &str) -> Result<bool>;

  /// Whether the generation was written by `put_all`. Generations created
  /// implicitly by `put` are not complete.
  async fn is_complete(&self, generation: &str) -> Result<bool>;

  /// Delete a generation and all of its entries. Returns whether it existed.
  async fn delete_generation(&self, generation: &str) -> Result<bool>;

  /// Create the generation if needed and store every entry, all or nothing.
  /// Marks the generation complete.
  async fn put_all(&self, generation: &str, entries: &[(String, Response)]) -> Result<()>;

  /// Store a single entry, creating the generation if needed.
  async fn put(&self, generation: &str, key: &str, response: &Response) -> Result<()>;

  async fn get(&self, generation: &str, key: &str) -> Result<Option<StoredResponse>>;

  /// Entries of a generation, ordered by key.
  async fn entries(&self, generation: &str) -> Result<Vec<EntryInfo>>;
}

/// In-memory storage. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStorage {
  generations: RwLock<BTreeMap<String, Generation>>,
}

#[derive(Default)]
struct Generation {
  /// Set once a `put_all` has landed
  complete: bool,
  entries: BTreeMap<String, StoredResponse>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
  async fn generations(&self) -> Result<Vec<String>> {
    let generations = self
      .generations
      .read()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(generations.keys().cloned().collect())
  }

  async fn has_generation(&self, generation: &str) -> Result<bool> {
    let generations = self
      .generations
      .read()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(generations.contains_key(generation))
  }

  async fn is_complete(&self, generation: &str) -> Result<bool> {
    let generations = self
      .generations
      .read()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(generations.get(generation).is_some_and(|g| g.complete))
  }

  async fn delete_generation(&self, generation: &str) -> Result<bool> {
    let mut generations = self
      .generations
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(generations.remove(generation).is_some())
  }

  async fn put_all(&self, generation: &str, entries: &[(String, Response)]) -> Result<()> {
    let mut generations = self
      .generations
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let target = generations.entry(generation.to_string()).or_default();
    for (key, response) in entries {
      target
        .entries
        .insert(key.clone(), StoredResponse::new(response.clone()));
    }
    target.complete = true;
    Ok(())
  }

  async fn put(&self, generation: &str, key: &str, response: &Response) -> Result<()> {
    let mut generations = self
      .generations
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    generations
      .entry(generation.to_string())
      .or_default()
      .entries
      .insert(key.to_string(), StoredResponse::new(response.clone()));
    Ok(())
  }

  async fn get(&self, generation: &str, key: &str) -> Result<Option<StoredResponse>> {
    let generations = self
      .generations
      .read()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      generations
        .get(generation)
        .and_then(|g| g.entries.get(key))
        .cloned(),
    )
  }

  async fn entries(&self, generation: &str) -> Result<Vec<EntryInfo>> {
    let generations = self
      .generations
      .read()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      generations
        .get(generation)
        .map(|g| {
          g.entries
            .iter()
            .map(|(key, stored)| EntryInfo {
              key: key.clone(),
              status: stored.response.status,
              size: stored.response.body.len(),
              stored_at: stored.stored_at,
            })
            .collect()
        })
        .unwrap_or_default(),
    )
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open cache database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS cache_generations (
    name TEXT PRIMARY KEY,
    complete INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS cache_entries (
    generation TEXT NOT NULL,
    request_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    content_type TEXT,
    response_type TEXT NOT NULL,
    body BLOB NOT NULL,
    digest TEXT NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, request_key),
    FOREIGN KEY (generation) REFERENCES cache_generations(name) ON DELETE CASCADE
);
"#;

/// Insert the generation row if missing, then replace the entry.
fn upsert_entry(conn: &Connection, generation: &str, key: &str, response: &Response) -> Result<()> {
  let stored = StoredResponse::new(response.clone());

  conn
    .execute(
      "INSERT OR IGNORE INTO cache_generations (name) VALUES (?)",
      params![generation],
    )
    .map_err(|e| eyre!("Failed to create generation {}: {}", generation, e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries
         (generation, request_key, url, status, content_type, response_type, body, digest, stored_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        generation,
        key,
        response.url,
        response.status,
        response.content_type,
        response.response_type.as_str(),
        response.body,
        stored.digest,
      ],
    )
    .map_err(|e| eyre!("Failed to store entry {}: {}", key, e))?;

  Ok(())
}

#[async_trait]
impl CacheStorage for SqliteStorage {
  async fn generations(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_generations ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list generations: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read generation name: {}", e))?;

    Ok(names)
  }

  async fn has_generation(&self, generation: &str) -> Result<bool> {
    let conn = self.lock()?;

    let found: Option<i64> = conn
      .query_row(
        "SELECT 1 FROM cache_generations WHERE name = ?",
        params![generation],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up generation {}: {}", generation, e))?;

    Ok(found.is_some())
  }

  async fn is_complete(&self, generation: &str) -> Result<bool> {
    let conn = self.lock()?;

    let complete: Option<bool> = conn
      .query_row(
        "SELECT complete FROM cache_generations WHERE name = ?",
        params![generation],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up generation {}: {}", generation, e))?;

    Ok(complete.unwrap_or(false))
  }

  async fn delete_generation(&self, generation: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE generation = ?",
      params![generation],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", generation, e))?;

    let deleted = tx
      .execute(
        "DELETE FROM cache_generations WHERE name = ?",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to delete generation {}: {}", generation, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(deleted > 0)
  }

  async fn put_all(&self, generation: &str, entries: &[(String, Response)]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT INTO cache_generations (name, complete) VALUES (?, 1)
       ON CONFLICT(name) DO UPDATE SET complete = 1",
      params![generation],
    )
    .map_err(|e| eyre!("Failed to create generation {}: {}", generation, e))?;

    for (key, response) in entries {
      upsert_entry(&tx, generation, key, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  async fn put(&self, generation: &str, key: &str, response: &Response) -> Result<()> {
    let conn = self.lock()?;
    upsert_entry(&conn, generation, key, response)
  }

  async fn get(&self, generation: &str, key: &str) -> Result<Option<StoredResponse>> {
    let conn = self.lock()?;

    let row = conn
      .query_row(
        "SELECT url, status, content_type, response_type, body, digest, stored_at
         FROM cache_entries WHERE generation = ? AND request_key = ?",
        params![generation, key],
        |row| {
          Ok((
            row.get::<_, String>(0)?,
            row.get::<_, u16>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, Vec<u8>>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, String>(6)?,
          ))
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to read entry {}: {}", key, e))?;

    let Some((url, status, content_type, response_type, body, digest, stored_at)) = row else {
      return Ok(None);
    };

    let response_type = ResponseType::parse(&response_type)
      .ok_or_else(|| eyre!("Unknown response type '{}' for {}", response_type, key))?;

    Ok(Some(StoredResponse {
      response: Response {
        url,
        status,
        content_type,
        response_type,
        body,
      },
      digest,
      stored_at: parse_datetime(&stored_at)?,
    }))
  }

  async fn entries(&self, generation: &str) -> Result<Vec<EntryInfo>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT request_key, status, length(body), stored_at FROM cache_entries
         WHERE generation = ?
         ORDER BY request_key",
      )
      .map_err(|e| eyre!("Failed to prepare entry query: {}", e))?;

    let rows = stmt
      .query_map(params![generation], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, u16>(1)?,
          row.get::<_, i64>(2)?,
          row.get::<_, String>(3)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query entries: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read entry: {}", e))?;

    rows
      .into_iter()
      .map(|(key, status, size, stored_at)| {
        Ok(EntryInfo {
          key,
          status,
          size: usize::try_from(size).unwrap_or_default(),
          stored_at: parse_datetime(&stored_at)?,
        })
      })
      .collect()
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
