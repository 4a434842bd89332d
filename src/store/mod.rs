//! Durable local store backing the content cache and the pending queue.

pub mod schema;

use color_eyre::{eyre::eyre, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Handle to the client's local SQLite database.
///
/// Opened once per process and passed to the components that need it; the
/// cache and queue never reach for an ambient global. If opening fails the
/// app must degrade to online-only behavior: writes fail immediately
/// instead of being silently dropped.
pub struct SyncStore {
  conn: Mutex<Connection>,
}

impl SyncStore {
  /// Open or create the store at the default location.
  pub fn open_default() -> Result<Self> {
    let path = Self::default_path()?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create data directory: {}", e))?;
    }

    Self::open(&path)
  }

  /// Open or create the store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open local store at {}: {}", path.display(), e))?;
    Self::init_connection(conn)
  }

  /// Open an in-memory store. Used in tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory store: {}", e))?;
    Self::init_connection(conn)
  }

  fn init_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(schema::SCHEMA)
      .map_err(|e| eyre!("Failed to run migrations: {}", e))?;
    conn
      .pragma_update(None, "journal_mode", "WAL")
      .map_err(|e| eyre!("Failed to enable WAL: {}", e))?;
    conn
      .pragma_update(None, "synchronous", "NORMAL")
      .map_err(|e| eyre!("Failed to set synchronous mode: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("lectern").join("sync.db"))
  }

  /// Move WAL contents into the main database file.
  pub fn checkpoint(&self) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute_batch("PRAGMA wal_checkpoint(PASSIVE);")
      .map_err(|e| eyre!("Failed to checkpoint: {}", e))?;
    Ok(())
  }

  /// Lock the underlying connection.
  pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}
