//! Offline-first sync engine for the Lectern scripture-study app.
//!
//! Reads populate a durable local cache of reference content so previously
//! viewed chapters render instantly offline; writes made while offline are
//! appended to a durable FIFO queue and replayed against the remote system
//! of record once connectivity returns. Conflict resolution is whole-record
//! last-write-wins, stamped by the server clock; there is no merge and no
//! CRDT. That is a scope decision, not a gap: the engine serves a low
//! write-contention, single-device-per-session usage pattern.

pub mod cache;
pub mod client;
pub mod config;
pub mod connectivity;
pub mod queue;
pub mod server;
pub mod store;
pub mod trigger;
pub mod types;

pub use cache::ContentCache;
pub use client::{HttpTransport, ReconcileClient, SyncTransport};
pub use connectivity::{ConnectivityEvent, ConnectivityMonitor};
pub use queue::PendingQueue;
pub use server::Reconciler;
pub use store::SyncStore;
pub use trigger::{StatusInfo, SyncEngine, SyncOutcome};
pub use types::{
  Operation, PendingMutation, RecordResult, RejectReason, ResourceClass, SyncReport, SyncRequest,
  SyncResponse,
};
