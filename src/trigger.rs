//! Sync trigger: decides when a reconcile pass runs and guards against
//! concurrent passes.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::client::{ReconcileClient, SyncTransport};
use crate::connectivity::{ConnectivityEvent, ConnectivityMonitor};
use crate::queue::PendingQueue;
use crate::store::SyncStore;
use crate::types::SyncReport;

/// What woke the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
  /// The connectivity monitor reported a transition back to online.
  ReconnectEdge,
  /// The host platform woke the app in the background after connectivity
  /// was restored.
  BackgroundWake,
  /// An explicit in-app "sync now" action.
  Manual,
}

impl TriggerKind {
  fn as_str(self) -> &'static str {
    match self {
      TriggerKind::ReconnectEdge => "reconnect",
      TriggerKind::BackgroundWake => "background_wake",
      TriggerKind::Manual => "manual",
    }
  }
}

/// Outcome of one trigger.
#[derive(Debug)]
pub enum SyncOutcome {
  /// A pass ran and the server answered; per-record results attached.
  Completed(SyncReport),
  /// Another pass was already in flight; this trigger collapsed to a no-op.
  AlreadyInFlight,
  /// The pass aborted on a transient error. Nothing was removed from the
  /// queue; the next trigger retries the whole batch.
  Failed(color_eyre::Report),
}

/// Summary of the engine's state for display.
///
/// Queued-but-unsynced work must be visible to the user, so they are never
/// misled about the durability of an action taken offline.
#[derive(Debug, Clone)]
pub struct StatusInfo {
  /// Current connectivity flag.
  pub online: bool,
  /// Entries waiting to sync.
  pub pending: u64,
  /// When the last successful pass finished.
  pub last_sync: Option<DateTime<Utc>>,
  /// Human-readable summary.
  pub message: String,
}

/// Drives reconcile passes off connectivity edges, host background wakes,
/// and manual requests.
///
/// The state machine is `Idle → Syncing → Idle` whether the pass succeeds
/// or fails; a failed pass leaves the queue for the next trigger. Only one
/// pass may be in flight at a time; concurrent triggers collapse into a
/// no-op so the same queue contents are never submitted twice.
pub struct SyncEngine<T: SyncTransport> {
  monitor: Arc<ConnectivityMonitor>,
  queue: Arc<PendingQueue>,
  store: Arc<SyncStore>,
  client: ReconcileClient<T>,
  in_flight: Mutex<()>,
  last_sync: std::sync::Mutex<Option<DateTime<Utc>>>,
}

impl<T: SyncTransport + 'static> SyncEngine<T> {
  /// Wire an engine from its parts.
  pub fn new(
    monitor: Arc<ConnectivityMonitor>,
    queue: Arc<PendingQueue>,
    store: Arc<SyncStore>,
    client: ReconcileClient<T>,
  ) -> Self {
    Self {
      monitor,
      queue,
      store,
      client,
      in_flight: Mutex::new(()),
      last_sync: std::sync::Mutex::new(None),
    }
  }

  /// Explicit in-app "sync now".
  pub async fn sync_now(&self) -> SyncOutcome {
    self.trigger(TriggerKind::Manual).await
  }

  /// Entry point for the host platform's background-wake callback. Hosts
  /// without background execution fall back to the in-app reconnect edge.
  pub async fn background_wake(&self) -> SyncOutcome {
    self.trigger(TriggerKind::BackgroundWake).await
  }

  /// Consume connectivity transitions and fire a pass on each reconnect
  /// edge. Runs until the monitor is dropped.
  pub async fn run(self: Arc<Self>) {
    let mut events = self.monitor.subscribe();
    while let Some(event) = events.next_event().await {
      if event == ConnectivityEvent::BecameOnline {
        self.trigger(TriggerKind::ReconnectEdge).await;
      }
    }
  }

  async fn trigger(&self, kind: TriggerKind) -> SyncOutcome {
    let _guard = match self.in_flight.try_lock() {
      Ok(guard) => guard,
      Err(_) => {
        debug!(kind = kind.as_str(), "sync already in flight, collapsing trigger");
        return SyncOutcome::AlreadyInFlight;
      }
    };

    info!(kind = kind.as_str(), "sync pass starting");
    match self.client.sync().await {
      Ok(report) => {
        if let Ok(mut last) = self.last_sync.lock() {
          *last = Some(Utc::now());
        }
        self.spawn_checkpoint();
        SyncOutcome::Completed(report)
      }
      Err(err) => {
        warn!(kind = kind.as_str(), error = %err, "sync pass failed, queue retained");
        SyncOutcome::Failed(err)
      }
    }
  }

  /// Flush the WAL after a pass. Failure policy is log and continue.
  fn spawn_checkpoint(&self) {
    let store = Arc::clone(&self.store);
    tokio::task::spawn_blocking(move || {
      if let Err(err) = store.checkpoint() {
        warn!(error = %err, "post-sync checkpoint failed");
      }
    });
  }

  /// Snapshot of the engine's state for the status surface.
  pub fn status(&self) -> color_eyre::Result<StatusInfo> {
    let online = self.monitor.is_online();
    let pending = self.queue.count()?;
    let last_sync = self.last_sync.lock().ok().and_then(|g| *g);

    let message = match (online, pending) {
      (true, 0) => "Synced".to_string(),
      (true, n) => format!("{} changes pending sync", n),
      (false, 0) => "Offline".to_string(),
      (false, n) => format!("Offline - {} changes pending sync", n),
    };

    Ok(StatusInfo {
      online,
      pending,
      last_sync,
      message,
    })
  }

  /// Seconds since the last successful pass, if there has been one.
  pub fn time_since_sync(&self) -> Option<i64> {
    self
      .last_sync
      .lock()
      .ok()
      .and_then(|g| *g)
      .map(|at| (Utc::now() - at).num_seconds())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::{Operation, RecordResult, ResourceClass, SyncRequest, SyncResponse};
  use color_eyre::Result;
  use serde_json::json;
  use std::time::Duration;

  /// Confirms everything, slowly enough for a second trigger to overlap.
  struct SlowTransport;

  impl SyncTransport for SlowTransport {
    async fn submit(&self, request: SyncRequest) -> Result<SyncResponse> {
      tokio::time::sleep(Duration::from_millis(100)).await;
      let results: Vec<RecordResult> = request
        .records
        .iter()
        .map(|r| RecordResult {
          id: r.seq,
          ok: true,
          error: None,
        })
        .collect();
      Ok(SyncResponse {
        ok: true,
        processed: results.len(),
        failed: 0,
        results,
      })
    }
  }

  fn engine() -> Arc<SyncEngine<SlowTransport>> {
    let store = Arc::new(SyncStore::open_in_memory().expect("store"));
    let queue = Arc::new(PendingQueue::new(Arc::clone(&store)));
    queue
      .enqueue(ResourceClass::Note, Operation::Insert, &json!({"id": "n-1"}), "alice")
      .expect("enqueue");

    let client = ReconcileClient::new(Arc::clone(&queue), SlowTransport, Duration::from_secs(5));
    Arc::new(SyncEngine::new(
      Arc::new(ConnectivityMonitor::new()),
      queue,
      store,
      client,
    ))
  }

  #[tokio::test]
  async fn concurrent_triggers_collapse_to_one_pass() {
    let engine = engine();
    let (first, second) = tokio::join!(engine.sync_now(), engine.sync_now());

    let outcomes = [&first, &second];
    assert_eq!(
      outcomes
        .iter()
        .filter(|o| matches!(o, SyncOutcome::Completed(_)))
        .count(),
      1
    );
    assert_eq!(
      outcomes
        .iter()
        .filter(|o| matches!(o, SyncOutcome::AlreadyInFlight))
        .count(),
      1
    );
  }

  #[tokio::test]
  async fn successful_pass_records_last_sync_time() {
    let engine = engine();
    assert!(engine.time_since_sync().is_none());

    match engine.sync_now().await {
      SyncOutcome::Completed(report) => assert_eq!(report.processed, 1),
      other => panic!("expected completed pass, got {:?}", other),
    }

    assert!(engine.time_since_sync().is_some());
    let status = engine.status().expect("status");
    assert_eq!(status.pending, 0);
    assert!(status.last_sync.is_some());
    assert_eq!(status.message, "Synced");
  }

  #[tokio::test]
  async fn status_reports_pending_changes_while_offline() {
    let engine = engine();
    engine.monitor.set_online(false);

    let status = engine.status().expect("status");
    assert!(!status.online);
    assert_eq!(status.pending, 1);
    assert_eq!(status.message, "Offline - 1 changes pending sync");
  }
}
