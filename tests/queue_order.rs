use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

use lectern::{Operation, PendingQueue, ResourceClass, SyncStore};

fn open_queue(path: &std::path::Path) -> PendingQueue {
  PendingQueue::new(Arc::new(SyncStore::open(path).expect("open store")))
}

#[test]
fn enqueue_order_survives_process_restart() {
  let tmp = TempDir::new().expect("tmp");
  let db_path = tmp.path().join("sync.db");

  let ids: Vec<String> = (0..6).map(|i| format!("n-{}", i)).collect();

  {
    let queue = open_queue(&db_path);
    for id in &ids {
      queue
        .enqueue(ResourceClass::Note, Operation::Insert, &json!({ "id": id }), "alice")
        .expect("enqueue");
    }
    // Store dropped here, simulating app shutdown.
  }

  let queue = open_queue(&db_path);
  let pending = queue.list_pending().expect("list");
  assert_eq!(pending.len(), ids.len());

  let replayed: Vec<String> = pending
    .iter()
    .map(|m| m.payload["id"].as_str().expect("id").to_string())
    .collect();
  assert_eq!(replayed, ids);

  for window in pending.windows(2) {
    assert!(window[0].seq < window[1].seq);
    assert!(window[0].created_at <= window[1].created_at);
  }
}

#[test]
fn removal_then_restart_keeps_remaining_order() {
  let tmp = TempDir::new().expect("tmp");
  let db_path = tmp.path().join("sync.db");

  let seqs: Vec<i64> = {
    let queue = open_queue(&db_path);
    (0..5)
      .map(|i| {
        queue
          .enqueue(
            ResourceClass::Highlight,
            Operation::Insert,
            &json!({ "id": format!("h-{}", i) }),
            "alice",
          )
          .expect("enqueue")
      })
      .collect()
  };

  {
    let queue = open_queue(&db_path);
    queue.remove(seqs[0]).expect("remove head");
    queue.remove(seqs[3]).expect("remove middle");
  }

  let queue = open_queue(&db_path);
  let remaining: Vec<i64> = queue
    .list_pending()
    .expect("list")
    .iter()
    .map(|m| m.seq)
    .collect();
  assert_eq!(remaining, vec![seqs[1], seqs[2], seqs[4]]);
}

fn syncable_class() -> impl Strategy<Value = ResourceClass> {
  prop_oneof![
    Just(ResourceClass::Note),
    Just(ResourceClass::Highlight),
    Just(ResourceClass::Bookmark),
  ]
}

fn operation() -> impl Strategy<Value = Operation> {
  prop_oneof![
    Just(Operation::Insert),
    Just(Operation::Update),
    Just(Operation::Delete),
  ]
}

proptest! {
  // For any sequence of offline writes, list_pending returns them in exact
  // enqueue order with strictly increasing sequence ids.
  #[test]
  fn list_pending_is_always_in_enqueue_order(
    writes in proptest::collection::vec((syncable_class(), operation(), "[a-z]{1,8}"), 1..20)
  ) {
    let queue = PendingQueue::new(Arc::new(SyncStore::open_in_memory().expect("store")));

    let mut expected = Vec::new();
    for (class, op, id) in &writes {
      let seq = queue
        .enqueue(*class, *op, &json!({ "id": id }), "alice")
        .expect("enqueue");
      expected.push((seq, id.clone()));
    }

    let pending = queue.list_pending().expect("list");
    let actual: Vec<(i64, String)> = pending
      .iter()
      .map(|m| (m.seq, m.payload["id"].as_str().expect("id").to_string()))
      .collect();

    prop_assert_eq!(actual, expected);
    for window in pending.windows(2) {
      prop_assert!(window[0].seq < window[1].seq);
    }
  }
}
