//! Relay of the host runtime's online/offline signal.

use tokio::sync::watch;
use tracing::debug;

/// A connectivity transition observed by a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
  /// The host reported a transition to online.
  BecameOnline,
  /// The host reported a transition to offline.
  BecameOffline,
}

/// Tracks the host's connectivity signal and fans out transition events.
///
/// This does no probing of its own; the host feeds it via [`set_online`]
/// and it relays. The initial state is optimistically online so first paint
/// is never punished; the host establishes the real value on activation.
/// This component never triggers a sync itself.
///
/// [`set_online`]: ConnectivityMonitor::set_online
pub struct ConnectivityMonitor {
  tx: watch::Sender<bool>,
}

impl ConnectivityMonitor {
  /// Create a monitor in the optimistic initial state.
  pub fn new() -> Self {
    let (tx, _rx) = watch::channel(true);
    Self { tx }
  }

  /// Current connectivity flag.
  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  /// Record the host's connectivity signal. Subscribers only observe
  /// actual transitions; repeating the current value is a no-op.
  pub fn set_online(&self, online: bool) {
    let changed = self.tx.send_if_modified(|current| {
      if *current == online {
        false
      } else {
        *current = online;
        true
      }
    });
    if changed {
      debug!(online, "connectivity changed");
    }
  }

  /// Subscribe to transition events.
  pub fn subscribe(&self) -> ConnectivityEvents {
    let rx = self.tx.subscribe();
    let last_seen = *rx.borrow();
    ConnectivityEvents { rx, last_seen }
  }
}

impl Default for ConnectivityMonitor {
  fn default() -> Self {
    Self::new()
  }
}

/// Stream of connectivity transitions for one subscriber.
pub struct ConnectivityEvents {
  rx: watch::Receiver<bool>,
  last_seen: bool,
}

impl ConnectivityEvents {
  /// Wait for the next transition. Returns `None` once the monitor has
  /// been dropped.
  pub async fn next_event(&mut self) -> Option<ConnectivityEvent> {
    loop {
      if self.rx.changed().await.is_err() {
        return None;
      }
      let online = *self.rx.borrow_and_update();
      if online == self.last_seen {
        continue;
      }
      self.last_seen = online;
      return Some(if online {
        ConnectivityEvent::BecameOnline
      } else {
        ConnectivityEvent::BecameOffline
      });
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn initial_state_is_optimistically_online() {
    let monitor = ConnectivityMonitor::new();
    assert!(monitor.is_online());
  }

  #[tokio::test]
  async fn transitions_produce_edge_events() {
    let monitor = ConnectivityMonitor::new();
    let mut events = monitor.subscribe();

    monitor.set_online(false);
    assert_eq!(events.next_event().await, Some(ConnectivityEvent::BecameOffline));
    assert!(!monitor.is_online());

    monitor.set_online(true);
    assert_eq!(events.next_event().await, Some(ConnectivityEvent::BecameOnline));
    assert!(monitor.is_online());
  }

  #[tokio::test]
  async fn repeated_signal_is_not_an_edge() {
    let monitor = ConnectivityMonitor::new();
    let mut events = monitor.subscribe();

    // Already online; repeating it must not wake subscribers.
    monitor.set_online(true);
    monitor.set_online(false);
    assert_eq!(events.next_event().await, Some(ConnectivityEvent::BecameOffline));

    monitor.set_online(false);
    monitor.set_online(true);
    assert_eq!(events.next_event().await, Some(ConnectivityEvent::BecameOnline));
  }

  #[tokio::test]
  async fn events_end_when_monitor_is_dropped() {
    let monitor = ConnectivityMonitor::new();
    let mut events = monitor.subscribe();
    drop(monitor);
    assert_eq!(events.next_event().await, None);
  }
}
