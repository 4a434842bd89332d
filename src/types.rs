//! Domain and wire types shared by the client and server halves of the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed set of resource classes the engine knows about.
///
/// Each class decides for itself whether it may live in the local content
/// cache and whether the server accepts mutations for it. Keeping this a
/// closed enum means both allow-lists are checked exhaustively at compile
/// time instead of through a runtime string table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
  /// A chapter of reference text, addressed by a translation variant.
  Chapter,
  /// A user note attached to a passage.
  Note,
  /// A user highlight over a verse range.
  Highlight,
  /// A user bookmark on a chapter.
  Bookmark,
}

impl ResourceClass {
  /// Whether content of this class is free of per-user restriction and may
  /// be stored in the persistent local cache.
  pub fn is_cacheable(self) -> bool {
    match self {
      ResourceClass::Chapter => true,
      ResourceClass::Note | ResourceClass::Highlight | ResourceClass::Bookmark => false,
    }
  }

  /// Whether the reconciliation server accepts mutations for this class.
  pub fn is_syncable(self) -> bool {
    match self {
      ResourceClass::Chapter => false,
      ResourceClass::Note | ResourceClass::Highlight | ResourceClass::Bookmark => true,
    }
  }

  /// Stable name used in storage and on the wire.
  pub fn as_str(self) -> &'static str {
    match self {
      ResourceClass::Chapter => "chapter",
      ResourceClass::Note => "note",
      ResourceClass::Highlight => "highlight",
      ResourceClass::Bookmark => "bookmark",
    }
  }

  /// Parse a stable name back into a class.
  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "chapter" => Some(ResourceClass::Chapter),
      "note" => Some(ResourceClass::Note),
      "highlight" => Some(ResourceClass::Highlight),
      "bookmark" => Some(ResourceClass::Bookmark),
      _ => None,
    }
  }

  /// Fields a record payload of this class must carry.
  ///
  /// `id` is the record's natural key and is required everywhere; the rest
  /// are the minimum the apply step needs to produce a usable record.
  pub fn required_fields(self) -> &'static [&'static str] {
    match self {
      ResourceClass::Chapter => &["id"],
      ResourceClass::Note => &["id", "passage", "body"],
      ResourceClass::Highlight => &["id", "passage", "color"],
      ResourceClass::Bookmark => &["id", "chapter"],
    }
  }

  /// Validate a mutation payload for this class and return its record id.
  pub fn validate_payload<'a>(self, payload: &'a Value) -> Result<&'a str, RejectReason> {
    let obj = match payload.as_object() {
      Some(obj) => obj,
      None => {
        return Err(RejectReason::MalformedPayload {
          detail: "payload is not an object".to_string(),
        })
      }
    };

    for field in self.required_fields() {
      if !obj.contains_key(*field) {
        return Err(RejectReason::MalformedPayload {
          detail: format!("missing required field `{}`", field),
        });
      }
    }

    match obj.get("id").and_then(Value::as_str) {
      Some(id) if !id.is_empty() => Ok(id),
      _ => Err(RejectReason::MalformedPayload {
        detail: "`id` must be a non-empty string".to_string(),
      }),
    }
  }
}

impl std::fmt::Display for ResourceClass {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Kind of mutation recorded against a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
  /// Create a record; applied as an upsert on the record's natural key so
  /// a replay after a lost response is harmless.
  Insert,
  /// Replace a record's fields.
  Update,
  /// Remove a record, scoped to its owning principal.
  Delete,
}

impl Operation {
  /// Stable name used in storage and on the wire.
  pub fn as_str(self) -> &'static str {
    match self {
      Operation::Insert => "insert",
      Operation::Update => "update",
      Operation::Delete => "delete",
    }
  }

  /// Parse a stable name back into an operation.
  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "insert" => Some(Operation::Insert),
      "update" => Some(Operation::Update),
      "delete" => Some(Operation::Delete),
      _ => None,
    }
  }
}

/// One unit of work queued locally for replay against the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMutation {
  /// Locally assigned, monotonically increasing sequence id. Queue order is
  /// FIFO by this id and must be preserved during replay.
  pub seq: i64,
  /// Class of the record being mutated.
  pub resource_class: ResourceClass,
  /// What to do with the record.
  pub operation: Operation,
  /// Record fields, opaque to the queue.
  pub payload: Value,
  /// Identity that created the mutation.
  pub principal: String,
  /// When the mutation was recorded locally.
  pub created_at: DateTime<Utc>,
}

/// Why the server refused to apply a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum RejectReason {
  /// The mutation's owning principal is not the authenticated caller.
  PrincipalMismatch,
  /// The target resource class is not on the server's syncable allow-list.
  ClassNotSyncable,
  /// The payload failed the class's validation.
  MalformedPayload {
    /// What was wrong with it.
    detail: String,
  },
}

impl std::fmt::Display for RejectReason {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      RejectReason::PrincipalMismatch => f.write_str("principal mismatch"),
      RejectReason::ClassNotSyncable => f.write_str("resource class not syncable"),
      RejectReason::MalformedPayload { detail } => write!(f, "malformed payload: {}", detail),
    }
  }
}

/// Per-record outcome of a reconcile pass, keyed by the mutation's local
/// sequence id so the client can remove exactly the confirmed entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordResult {
  /// Sequence id of the mutation this outcome is for.
  pub id: i64,
  /// Whether the mutation was applied.
  pub ok: bool,
  /// Rejection reason when `ok` is false.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<RejectReason>,
}

/// Request body of `POST /sync`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
  /// Queued mutations in enqueue order.
  pub records: Vec<PendingMutation>,
}

/// Response body of `POST /sync`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
  /// Always true when the batch itself was accepted; per-record failures
  /// are reported in `results`, not here.
  pub ok: bool,
  /// Number of mutations applied.
  pub processed: usize,
  /// Number of mutations rejected.
  pub failed: usize,
  /// One outcome per submitted mutation, in submitted order.
  pub results: Vec<RecordResult>,
}

/// Client-side summary of one sync pass.
#[derive(Debug, Clone)]
pub struct SyncReport {
  /// Entries confirmed by the server and removed from the queue.
  pub processed: usize,
  /// Entries the server rejected; they remain queued.
  pub failed: usize,
  /// Per-record outcomes as reported by the server.
  pub results: Vec<RecordResult>,
}

impl SyncReport {
  /// Report for a pass that found nothing to sync.
  pub fn empty() -> Self {
    Self {
      processed: 0,
      failed: 0,
      results: Vec::new(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn allow_lists_are_disjoint_for_known_classes() {
    for class in [
      ResourceClass::Chapter,
      ResourceClass::Note,
      ResourceClass::Highlight,
      ResourceClass::Bookmark,
    ] {
      assert_ne!(class.is_cacheable(), class.is_syncable());
      assert_eq!(ResourceClass::parse(class.as_str()), Some(class));
    }
  }

  #[test]
  fn payload_validation_requires_class_fields() {
    let note = json!({ "id": "n-1", "passage": "GEN-1:3", "body": "let there be light" });
    assert_eq!(ResourceClass::Note.validate_payload(&note), Ok("n-1"));

    let missing_body = json!({ "id": "n-1", "passage": "GEN-1:3" });
    assert!(matches!(
      ResourceClass::Note.validate_payload(&missing_body),
      Err(RejectReason::MalformedPayload { .. })
    ));

    let not_an_object = json!("n-1");
    assert!(ResourceClass::Note.validate_payload(&not_an_object).is_err());

    let empty_id = json!({ "id": "", "chapter": "GEN-1" });
    assert!(ResourceClass::Bookmark.validate_payload(&empty_id).is_err());
  }

  #[test]
  fn reject_reasons_render_the_wire_strings() {
    assert_eq!(RejectReason::PrincipalMismatch.to_string(), "principal mismatch");
    assert_eq!(
      RejectReason::ClassNotSyncable.to_string(),
      "resource class not syncable"
    );
  }
}
