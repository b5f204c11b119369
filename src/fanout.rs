//! Publish/subscribe fanout of daemon events to connected clients.

use async_channel::Sender;
use serde_json::{Map, Value};

use crate::rpc::Request;

struct Listener {
  conn_id: u64,
  tx: Sender<String>,
}

/// Registry of subscribed connections.
///
/// Delivery pushes a pre-serialized notification line into each listener's
/// writer queue and never waits: a slow subscriber cannot stall the publisher
/// or its peers, and a dead one is pruned after the pass.
pub struct EventFanout {
  listeners: Vec<Listener>,
}

impl EventFanout {
  pub fn new() -> Self {
    Self {
      listeners: Vec::new(),
    }
  }

  /// Register a connection's writer queue. Idempotent per connection.
  pub fn subscribe(&mut self, conn_id: u64, tx: Sender<String>) {
    if self.listeners.iter().any(|l| l.conn_id == conn_id) {
      return;
    }
    self.listeners.push(Listener { conn_id, tx });
  }

  /// Broadcast an event to every subscriber, then drop the ones whose
  /// delivery failed. The set is rebuilt rather than edited mid-iteration.
  pub fn publish(&mut self, name: &str, payload: Map<String, Value>) {
    if self.listeners.is_empty() {
      return;
    }
    let notification = Request::event(name, payload);
    let line = match serde_json::to_string(&notification) {
      Ok(line) => line,
      Err(e) => {
        log::error!("Failed to serialize event {}: {}", name, e);
        return;
      }
    };
    log::debug!("Publishing event {} to {} listener(s)", name, self.listeners.len());

    let mut stale = Vec::new();
    for listener in &self.listeners {
      if listener.tx.try_send(line.clone()).is_err() {
        stale.push(listener.conn_id);
      }
    }
    if !stale.is_empty() {
      let kept = std::mem::take(&mut self.listeners)
        .into_iter()
        .filter(|l| !stale.contains(&l.conn_id))
        .collect();
      self.listeners = kept;
      log::debug!("Removed {} stale listener(s)", stale.len());
    }
  }

  #[cfg(test)]
  fn len(&self) -> usize {
    self.listeners.len()
  }
}
