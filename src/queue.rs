//! Durable FIFO queue of mutations recorded while offline.

use chrono::{DateTime, SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::params;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::store::SyncStore;
use crate::types::{Operation, PendingMutation, ResourceClass};

/// Append-only queue of pending local mutations.
///
/// Queue order is the single source of truth for replay order: mutations
/// against the same logical record must reach the server in creation order
/// for last-write-wins to be deterministic. Sequence ids are assigned by
/// SQLite's AUTOINCREMENT, so removing an entry never renumbers the rest
/// and order survives process restarts.
pub struct PendingQueue {
  store: Arc<SyncStore>,
}

impl PendingQueue {
  /// Create a queue over the given store.
  pub fn new(store: Arc<SyncStore>) -> Self {
    Self { store }
  }

  /// Append a mutation to the end of the queue and return its sequence id.
  ///
  /// The row is committed before this returns, so a crash or reload does
  /// not lose the pending write. Classes the server will never accept are
  /// rejected here rather than queued to fail later.
  pub fn enqueue(
    &self,
    class: ResourceClass,
    operation: Operation,
    payload: &Value,
    principal: &str,
  ) -> Result<i64> {
    if !class.is_syncable() {
      return Err(eyre!("Resource class `{}` is not syncable", class));
    }

    let encoded =
      serde_json::to_vec(payload).map_err(|e| eyre!("Failed to serialize payload: {}", e))?;
    let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);

    let conn = self.store.lock()?;
    conn
      .execute(
        "INSERT INTO pending_mutations (resource_class, operation, payload, principal, created_at)
         VALUES (?, ?, ?, ?, ?)",
        params![class.as_str(), operation.as_str(), encoded, principal, created_at],
      )
      .map_err(|e| eyre!("Failed to enqueue mutation: {}", e))?;

    let seq = conn.last_insert_rowid();
    debug!(seq, class = %class, op = operation.as_str(), "queued mutation");
    Ok(seq)
  }

  /// All pending mutations, oldest first.
  pub fn list_pending(&self) -> Result<Vec<PendingMutation>> {
    let conn = self.store.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT seq, resource_class, operation, payload, principal, created_at
         FROM pending_mutations ORDER BY seq ASC",
      )
      .map_err(|e| eyre!("Failed to prepare queue read: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
          row.get::<_, Vec<u8>>(3)?,
          row.get::<_, String>(4)?,
          row.get::<_, String>(5)?,
        ))
      })
      .map_err(|e| eyre!("Failed to read queue: {}", e))?;

    let mut out = Vec::new();
    for row in rows {
      let (seq, class, operation, payload, principal, created_at) =
        row.map_err(|e| eyre!("Failed to read queue row: {}", e))?;
      out.push(PendingMutation {
        seq,
        resource_class: ResourceClass::parse(&class)
          .ok_or_else(|| eyre!("Unknown resource class `{}` in queue", class))?,
        operation: Operation::parse(&operation)
          .ok_or_else(|| eyre!("Unknown operation `{}` in queue", operation))?,
        payload: serde_json::from_slice(&payload)
          .map_err(|e| eyre!("Failed to decode queued payload: {}", e))?,
        principal,
        created_at: parse_instant(&created_at)?,
      });
    }
    Ok(out)
  }

  /// Delete a single confirmed entry. The remaining entries keep their
  /// sequence ids and order.
  pub fn remove(&self, seq: i64) -> Result<()> {
    let conn = self.store.lock()?;
    conn
      .execute("DELETE FROM pending_mutations WHERE seq = ?", params![seq])
      .map_err(|e| eyre!("Failed to remove queue entry {}: {}", seq, e))?;
    Ok(())
  }

  /// Number of entries still waiting to sync.
  pub fn count(&self) -> Result<u64> {
    let conn = self.store.lock()?;
    let count: i64 = conn
      .query_row("SELECT COUNT(*) FROM pending_mutations", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count queue entries: {}", e))?;
    Ok(count as u64)
  }
}

fn parse_instant(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse instant '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn queue() -> PendingQueue {
    PendingQueue::new(Arc::new(SyncStore::open_in_memory().expect("store")))
  }

  #[test]
  fn enqueue_assigns_increasing_sequence_ids() {
    let queue = queue();
    let a = queue
      .enqueue(ResourceClass::Note, Operation::Insert, &json!({"id": "n-1"}), "alice")
      .expect("enqueue");
    let b = queue
      .enqueue(ResourceClass::Note, Operation::Update, &json!({"id": "n-1"}), "alice")
      .expect("enqueue");
    assert!(b > a);
    assert_eq!(queue.count().expect("count"), 2);
  }

  #[test]
  fn list_pending_is_oldest_first() {
    let queue = queue();
    for i in 0..5 {
      queue
        .enqueue(
          ResourceClass::Highlight,
          Operation::Insert,
          &json!({"id": format!("h-{}", i)}),
          "alice",
        )
        .expect("enqueue");
    }

    let pending = queue.list_pending().expect("list");
    let seqs: Vec<i64> = pending.iter().map(|m| m.seq).collect();
    let mut sorted = seqs.clone();
    sorted.sort_unstable();
    assert_eq!(seqs, sorted);
    assert_eq!(pending[0].payload["id"], "h-0");
    assert_eq!(pending[4].payload["id"], "h-4");
  }

  #[test]
  fn remove_does_not_reorder_or_renumber() {
    let queue = queue();
    let mut seqs = Vec::new();
    for i in 0..4 {
      seqs.push(
        queue
          .enqueue(
            ResourceClass::Bookmark,
            Operation::Insert,
            &json!({"id": format!("b-{}", i)}),
            "alice",
          )
          .expect("enqueue"),
      );
    }

    queue.remove(seqs[1]).expect("remove");

    let remaining: Vec<i64> = queue
      .list_pending()
      .expect("list")
      .iter()
      .map(|m| m.seq)
      .collect();
    assert_eq!(remaining, vec![seqs[0], seqs[2], seqs[3]]);

    // A fresh enqueue never reuses the removed id.
    let next = queue
      .enqueue(ResourceClass::Bookmark, Operation::Insert, &json!({"id": "b-4"}), "alice")
      .expect("enqueue");
    assert!(next > seqs[3]);
  }

  #[test]
  fn non_syncable_class_is_rejected_at_enqueue() {
    let queue = queue();
    let result = queue.enqueue(
      ResourceClass::Chapter,
      Operation::Insert,
      &json!({"id": "GEN-1"}),
      "alice",
    );
    assert!(result.is_err());
    assert_eq!(queue.count().expect("count"), 0);
  }
}
