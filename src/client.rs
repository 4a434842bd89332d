//! Client side of reconciliation: batches the pending queue and submits it
//! to the remote endpoint.

use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::queue::PendingQueue;
use crate::types::{SyncReport, SyncRequest, SyncResponse};

/// Transport over which a batch reaches the reconciliation endpoint.
///
/// The real implementation is [`HttpTransport`]; tests drive the client
/// against an in-process server or a failing stand-in through the same
/// seam.
pub trait SyncTransport: Send + Sync {
  /// Submit one batch and return the server's per-record outcomes.
  fn submit(&self, request: SyncRequest) -> impl Future<Output = Result<SyncResponse>> + Send;
}

/// HTTP transport for `POST /sync` with bearer-token auth.
#[derive(Clone)]
pub struct HttpTransport {
  http: reqwest::Client,
  endpoint: Url,
  token: String,
}

impl HttpTransport {
  /// Build a transport for the given server base URL.
  pub fn new(base_url: &Url, token: String, timeout: Duration) -> Result<Self> {
    let http = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    let endpoint = base_url
      .join("sync")
      .map_err(|e| eyre!("Invalid server URL {}: {}", base_url, e))?;

    Ok(Self {
      http,
      endpoint,
      token,
    })
  }
}

impl SyncTransport for HttpTransport {
  async fn submit(&self, request: SyncRequest) -> Result<SyncResponse> {
    let response = self
      .http
      .post(self.endpoint.clone())
      .bearer_auth(&self.token)
      .json(&request)
      .send()
      .await
      .map_err(|e| eyre!("Sync request failed: {}", e))?;

    if response.status() == reqwest::StatusCode::UNAUTHORIZED {
      return Err(eyre!("Sync endpoint rejected credentials"));
    }
    let response = response
      .error_for_status()
      .map_err(|e| eyre!("Sync endpoint returned an error: {}", e))?;

    response
      .json::<SyncResponse>()
      .await
      .map_err(|e| eyre!("Failed to decode sync response: {}", e))
  }
}

/// Drains the pending queue against the reconciliation endpoint.
pub struct ReconcileClient<T: SyncTransport> {
  queue: Arc<PendingQueue>,
  transport: T,
  timeout: Duration,
}

impl<T: SyncTransport> ReconcileClient<T> {
  /// Create a client over the given queue and transport.
  pub fn new(queue: Arc<PendingQueue>, transport: T, timeout: Duration) -> Self {
    Self {
      queue,
      transport,
      timeout,
    }
  }

  /// Run one reconcile pass.
  ///
  /// Snapshots the queue, submits the whole batch in one call, then removes
  /// exactly the entries the server confirmed. Entries enqueued while the
  /// call is in flight are left for the next pass. A timeout or transport
  /// failure aborts the pass with nothing removed, which is safe to retry
  /// whole because every operation is idempotent.
  pub async fn sync(&self) -> Result<SyncReport> {
    let pending = self.queue.list_pending()?;
    if pending.is_empty() {
      debug!("nothing pending, skipping sync");
      return Ok(SyncReport::empty());
    }

    let batch_len = pending.len();
    let request = SyncRequest { records: pending };

    let response = match tokio::time::timeout(self.timeout, self.transport.submit(request)).await {
      Ok(Ok(response)) => response,
      Ok(Err(err)) => return Err(err.wrap_err("sync batch failed, queue retained")),
      Err(_) => {
        return Err(eyre!(
          "sync timed out after {:?}, queue retained",
          self.timeout
        ))
      }
    };

    let mut processed = 0;
    let mut failed = 0;
    for result in &response.results {
      if result.ok {
        self.queue.remove(result.id)?;
        processed += 1;
      } else {
        failed += 1;
        warn!(
          seq = result.id,
          error = %result.error.as_ref().map(ToString::to_string).unwrap_or_default(),
          "server rejected mutation, keeping it queued"
        );
      }
    }

    info!(batch_len, processed, failed, "sync pass finished");
    Ok(SyncReport {
      processed,
      failed,
      results: response.results,
    })
  }
}
