//! Schema for the client-side durable store.

/// Client tables: cached reference content and the pending mutation queue.
///
/// `content_cache` is keyed by the full composite key so lookups are a
/// single covering-index probe. `pending_mutations` is append-only; `seq`
/// is AUTOINCREMENT so sequence ids are never reused after a removal and
/// FIFO order survives process restarts.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS content_cache (
    resource_class TEXT NOT NULL,
    resource_id TEXT NOT NULL,
    variant TEXT NOT NULL,
    payload BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (resource_class, resource_id, variant)
);

CREATE TABLE IF NOT EXISTS pending_mutations (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    resource_class TEXT NOT NULL,
    operation TEXT NOT NULL,
    payload BLOB NOT NULL,
    principal TEXT NOT NULL,
    created_at TEXT NOT NULL
);
"#;
