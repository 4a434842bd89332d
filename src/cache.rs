//! Local cache of read-mostly reference content for offline access.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::params;
use std::sync::Arc;
use tracing::debug;

use crate::store::SyncStore;
use crate::types::ResourceClass;

/// One offline-readable unit of reference content.
#[derive(Debug, Clone)]
pub struct CachedResource {
  /// Serialized content, opaque to the cache.
  pub payload: Vec<u8>,
  /// When this entry was last written.
  pub cached_at: DateTime<Utc>,
}

/// Key-value store of reference content, keyed by
/// `(resource class, resource id, variant)`.
///
/// Only classes on the cacheable allow-list land here; everything else is a
/// silent no-op on write, which keeps access-controlled content out of the
/// persistent local store. Lookups never touch the network.
pub struct ContentCache {
  store: Arc<SyncStore>,
}

impl ContentCache {
  /// Create a cache over the given store.
  pub fn new(store: Arc<SyncStore>) -> Self {
    Self { store }
  }

  /// Store a payload for the composite key, replacing any existing entry
  /// atomically. A no-op when the class is not cacheable.
  pub fn put(
    &self,
    class: ResourceClass,
    resource_id: &str,
    variant: &str,
    payload: &[u8],
  ) -> Result<()> {
    if !class.is_cacheable() {
      debug!(class = %class, "skipping cache write for non-cacheable class");
      return Ok(());
    }

    let conn = self.store.lock()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO content_cache (resource_class, resource_id, variant, payload, cached_at)
         VALUES (?, ?, ?, ?, ?)",
        params![
          class.as_str(),
          resource_id,
          variant,
          payload,
          // Fixed-width instants keep lexicographic order equal to time order.
          Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
        ],
      )
      .map_err(|e| eyre!("Failed to write cache entry: {}", e))?;

    Ok(())
  }

  /// Look up a payload by composite key. Pure local read.
  pub fn get(
    &self,
    class: ResourceClass,
    resource_id: &str,
    variant: &str,
  ) -> Result<Option<CachedResource>> {
    let conn = self.store.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT payload, cached_at FROM content_cache
         WHERE resource_class = ? AND resource_id = ? AND variant = ?",
      )
      .map_err(|e| eyre!("Failed to prepare cache lookup: {}", e))?;

    let row: Option<(Vec<u8>, String)> = stmt
      .query_row(params![class.as_str(), resource_id, variant], |row| {
        Ok((row.get(0)?, row.get(1)?))
      })
      .ok();

    match row {
      Some((payload, cached_at)) => Ok(Some(CachedResource {
        payload,
        cached_at: parse_instant(&cached_at)?,
      })),
      None => Ok(None),
    }
  }

  /// Number of cached entries.
  pub fn count(&self) -> Result<u64> {
    let conn = self.store.lock()?;
    let count: i64 = conn
      .query_row("SELECT COUNT(*) FROM content_cache", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count cache entries: {}", e))?;
    Ok(count as u64)
  }

  /// Delete entries older than `age`. Explicit maintenance only: nothing
  /// evicts implicitly, so a previously cached variant stays readable
  /// offline until the host decides otherwise.
  pub fn prune_older_than(&self, age: Duration) -> Result<usize> {
    let cutoff = Utc::now() - age;
    let conn = self.store.lock()?;
    let removed = conn
      .execute(
        "DELETE FROM content_cache WHERE cached_at < ?",
        params![cutoff.to_rfc3339_opts(SecondsFormat::Micros, true)],
      )
      .map_err(|e| eyre!("Failed to prune cache: {}", e))?;

    if removed > 0 {
      debug!(removed, "pruned cache entries");
    }
    Ok(removed)
  }
}

/// Parse an RFC 3339 instant stored by this module.
fn parse_instant(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse instant '{}': {}", s, e))
}
