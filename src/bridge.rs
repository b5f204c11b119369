//! Concurrency bridge between the backend worker thread and the
//! socket-serving loop.
//!
//! The backend emits events through an unbounded channel: submission is
//! schedule-and-return, so the backend thread never waits on the server loop.
//! The reverse direction (server loop calling backend getters/setters) is a
//! plain synchronous call, permitted because the backend contract guarantees
//! those are fast.

use std::sync::Arc;
use std::thread::JoinHandle;

use async_channel::Receiver;

use crate::backend::{BackendEvent, PlayerBackend};

/// Fire-and-forget handle the backend uses to push events at the server loop.
#[derive(Clone)]
pub struct EventSink {
  tx: async_channel::Sender<BackendEvent>,
}

impl EventSink {
  /// Submit an event without blocking. On an unbounded channel this only
  /// fails once the server loop is gone, in which case the event is dropped.
  pub fn emit(&self, event: BackendEvent) {
    if self.tx.try_send(event).is_err() {
      log::warn!("Server loop is gone, dropping backend event");
    }
  }
}

/// Create the backend-to-server event channel.
pub fn event_channel() -> (EventSink, Receiver<BackendEvent>) {
  let (tx, rx) = async_channel::unbounded();
  (EventSink { tx }, rx)
}

/// Dedicated thread running the backend event loop.
pub struct BackendThread {
  backend: Arc<dyn PlayerBackend>,
  handle: Option<JoinHandle<()>>,
}

impl BackendThread {
  /// Spawn the backend run loop and return its event receiver.
  pub fn spawn(
    backend: Arc<dyn PlayerBackend>,
  ) -> std::io::Result<(Self, Receiver<BackendEvent>)> {
    let (sink, events) = event_channel();
    let runner = backend.clone();
    let handle = std::thread::Builder::new()
      .name("player-backend".into())
      .spawn(move || {
        log::info!("Backend run loop started");
        runner.run(sink);
        log::info!("Backend run loop stopped");
      })?;
    Ok((
      Self {
        backend,
        handle: Some(handle),
      },
      events,
    ))
  }

  /// Stop the run loop and join the thread. Blocking; call off the runtime.
  pub fn stop(mut self) {
    self.backend.shutdown();
    if let Some(handle) = self.handle.take() {
      if handle.join().is_err() {
        log::error!("Backend thread panicked");
      }
    }
  }
}
