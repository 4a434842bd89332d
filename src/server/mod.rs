//! Server-side reconciliation: authentication, allow-listing, ownership
//! checks, and last-write-wins application of queued mutations.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::types::{
  Operation, PendingMutation, RecordResult, RejectReason, ResourceClass, SyncRequest, SyncResponse,
};

/// Canonical store tables.
///
/// Records are keyed by `(resource_class, record_id)`, the natural key an
/// insert upserts on, and carry the owning principal plus the server-side
/// `updated_at` conflict clock. Principals are looked up by a SHA-256
/// digest of their bearer token; raw tokens are never stored.
const SERVER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    resource_class TEXT NOT NULL,
    record_id TEXT NOT NULL,
    principal TEXT NOT NULL,
    payload BLOB NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (resource_class, record_id)
);

CREATE INDEX IF NOT EXISTS idx_records_principal ON records(principal);

CREATE TABLE IF NOT EXISTS principals (
    token_digest TEXT PRIMARY KEY,
    principal TEXT NOT NULL
);
"#;

/// Errors that fail an entire reconcile call, as opposed to the per-record
/// rejections reported inside a [`SyncResponse`].
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
  /// The bearer token resolved to no known principal.
  #[error("missing or invalid bearer token")]
  Unauthorized,
  /// The canonical store failed.
  #[error("canonical store error: {0}")]
  Store(#[from] rusqlite::Error),
  /// A payload could not be serialized for storage.
  #[error("payload encoding error: {0}")]
  Encoding(#[from] serde_json::Error),
  /// A stored value failed to decode.
  #[error("corrupt stored value: {0}")]
  Corrupt(String),
  /// The store mutex was poisoned.
  #[error("canonical store lock poisoned")]
  Poisoned,
}

impl ServerError {
  /// HTTP status this error maps to when the service is mounted at
  /// `POST /sync`.
  pub fn status(&self) -> u16 {
    match self {
      ServerError::Unauthorized => 401,
      ServerError::Store(_)
      | ServerError::Encoding(_)
      | ServerError::Corrupt(_)
      | ServerError::Poisoned => 500,
    }
  }
}

/// A canonical stored record, as read back for inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
  /// Owning principal.
  pub principal: String,
  /// Record fields as last applied.
  pub payload: serde_json::Value,
  /// Server-stamped conflict clock.
  pub updated_at: DateTime<Utc>,
}

enum EntryOutcome {
  Applied,
  Rejected(RejectReason),
}

/// The reconciliation service behind `POST /sync`.
///
/// Each mutation is its own atomic unit: there is no staging or two-phase
/// commit across a batch, and one rejected entry never aborts the rest.
/// The server is the sole writer of `updated_at`, so a client cannot spoof
/// recency to win a conflict.
pub struct Reconciler {
  conn: Mutex<Connection>,
}

impl Reconciler {
  /// Open or create the canonical store at `path`.
  pub fn open(path: &Path) -> Result<Self, ServerError> {
    Self::init_connection(Connection::open(path)?)
  }

  /// Open an in-memory canonical store. Used in tests.
  pub fn open_in_memory() -> Result<Self, ServerError> {
    Self::init_connection(Connection::open_in_memory()?)
  }

  fn init_connection(conn: Connection) -> Result<Self, ServerError> {
    conn.execute_batch(SERVER_SCHEMA)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>, ServerError> {
    self.conn.lock().map_err(|_| ServerError::Poisoned)
  }

  /// Register a principal's bearer token. Only the token's SHA-256 digest
  /// is stored.
  pub fn register_principal(&self, principal: &str, token: &str) -> Result<(), ServerError> {
    let conn = self.lock()?;
    conn.execute(
      "INSERT OR REPLACE INTO principals (token_digest, principal) VALUES (?, ?)",
      params![token_digest(token), principal],
    )?;
    Ok(())
  }

  /// Resolve a bearer token to its principal.
  pub fn authenticate(&self, token: &str) -> Result<String, ServerError> {
    let conn = self.lock()?;
    conn
      .query_row(
        "SELECT principal FROM principals WHERE token_digest = ?",
        params![token_digest(token)],
        |row| row.get(0),
      )
      .optional()?
      .ok_or(ServerError::Unauthorized)
  }

  /// Full endpoint surface: authenticate, then reconcile the batch.
  pub fn handle(&self, token: &str, request: &SyncRequest) -> Result<SyncResponse, ServerError> {
    let caller = self.authenticate(token)?;
    self.reconcile(&caller, &request.records)
  }

  /// Apply a batch of mutations on behalf of `caller`, in submitted order,
  /// returning one outcome per entry.
  pub fn reconcile(
    &self,
    caller: &str,
    records: &[PendingMutation],
  ) -> Result<SyncResponse, ServerError> {
    let mut results = Vec::with_capacity(records.len());
    let mut processed = 0;
    let mut failed = 0;

    for entry in records {
      match self.apply_entry(caller, entry)? {
        EntryOutcome::Applied => {
          processed += 1;
          results.push(RecordResult {
            id: entry.seq,
            ok: true,
            error: None,
          });
        }
        EntryOutcome::Rejected(reason) => {
          failed += 1;
          warn!(seq = entry.seq, class = %entry.resource_class, %reason, "rejected mutation");
          results.push(RecordResult {
            id: entry.seq,
            ok: false,
            error: Some(reason),
          });
        }
      }
    }

    debug!(processed, failed, "reconciled batch");
    Ok(SyncResponse {
      ok: true,
      processed,
      failed,
      results,
    })
  }

  fn apply_entry(
    &self,
    caller: &str,
    entry: &PendingMutation,
  ) -> Result<EntryOutcome, ServerError> {
    if entry.principal != caller {
      return Ok(EntryOutcome::Rejected(RejectReason::PrincipalMismatch));
    }
    if !entry.resource_class.is_syncable() {
      return Ok(EntryOutcome::Rejected(RejectReason::ClassNotSyncable));
    }
    let record_id = match entry.resource_class.validate_payload(&entry.payload) {
      Ok(id) => id.to_string(),
      Err(reason) => return Ok(EntryOutcome::Rejected(reason)),
    };

    let class = entry.resource_class.as_str();
    let conn = self.lock()?;

    match entry.operation {
      Operation::Insert | Operation::Update => {
        // A record id already owned by someone else is an ownership
        // violation, not a conflict to resolve.
        let owner: Option<String> = conn
          .query_row(
            "SELECT principal FROM records WHERE resource_class = ? AND record_id = ?",
            params![class, record_id],
            |row| row.get(0),
          )
          .optional()?;
        if let Some(owner) = owner {
          if owner != entry.principal {
            return Ok(EntryOutcome::Rejected(RejectReason::PrincipalMismatch));
          }
        }

        // Last-write-wins: stamp with the server clock and overwrite with
        // no comparison against the stored updated_at.
        let payload = serde_json::to_vec(&entry.payload)?;
        conn.execute(
          "INSERT OR REPLACE INTO records (resource_class, record_id, principal, payload, updated_at)
           VALUES (?, ?, ?, ?, ?)",
          params![class, record_id, entry.principal, payload, server_now()],
        )?;
      }
      Operation::Delete => {
        // Scoped to (id, principal): a principal cannot delete another's
        // record by id guesswork. Deleting an absent record is a no-op,
        // which keeps replays idempotent.
        conn.execute(
          "DELETE FROM records WHERE resource_class = ? AND record_id = ? AND principal = ?",
          params![class, record_id, entry.principal],
        )?;
      }
    }

    Ok(EntryOutcome::Applied)
  }

  /// Read a canonical record back. Inspection surface for hosts and tests.
  pub fn get_record(
    &self,
    class: ResourceClass,
    record_id: &str,
  ) -> Result<Option<StoredRecord>, ServerError> {
    let conn = self.lock()?;
    let row: Option<(String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT principal, payload, updated_at FROM records
         WHERE resource_class = ? AND record_id = ?",
        params![class.as_str(), record_id],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()?;

    match row {
      Some((principal, payload, updated_at)) => Ok(Some(StoredRecord {
        principal,
        payload: serde_json::from_slice(&payload)?,
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
          .map(|dt| dt.with_timezone(&Utc))
          .map_err(|e| ServerError::Corrupt(e.to_string()))?,
      })),
      None => Ok(None),
    }
  }
}

fn server_now() -> String {
  Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn token_digest(token: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(token.as_bytes());
  hex::encode(hasher.finalize())
}
