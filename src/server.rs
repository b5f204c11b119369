//! The daemon: accepts connections on a Unix socket and pumps backend
//! events into arbitration and fanout.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_channel::Receiver;
use parking_lot::Mutex;
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;

use crate::arbiter::{Arbiter, PublishFn};
use crate::backend::{BackendEvent, PlayerBackend};
use crate::bridge::BackendThread;
use crate::dispatch::Dispatcher;
use crate::error::ServerError;
use crate::fanout::EventFanout;
use crate::rpc::RpcConnection;

/// Per-user default socket path.
pub fn default_socket_path() -> PathBuf {
  dirs::runtime_dir()
    .unwrap_or_else(std::env::temp_dir)
    .join("playermux")
}

pub struct Daemon {
  backend: Arc<dyn PlayerBackend>,
  socket_path: PathBuf,
  shutdown: CancellationToken,
}

impl Daemon {
  pub fn new(backend: Arc<dyn PlayerBackend>, socket_path: impl Into<PathBuf>) -> Self {
    Self {
      backend,
      socket_path: socket_path.into(),
      shutdown: CancellationToken::new(),
    }
  }

  /// Token that stops the accept loop and tears the daemon down.
  pub fn shutdown_token(&self) -> CancellationToken {
    self.shutdown.clone()
  }

  /// Single-instance probe: a live daemon on the socket aborts startup, a
  /// refused connection means a stale file we may remove.
  async fn check_socket(path: &Path) -> Result<(), ServerError> {
    match UnixStream::connect(path).await {
      Ok(_) => Err(ServerError::AlreadyRunning(path.to_path_buf())),
      Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
        log::info!("Removing stale socket at {}", path.display());
        std::fs::remove_file(path)?;
        Ok(())
      }
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(ServerError::Io(e)),
    }
  }

  /// Run until the shutdown token fires. The backend loop starts before the
  /// listener accepts; on the way out the listener closes first so no new
  /// connection can race the backend teardown.
  pub async fn run(self) -> Result<(), ServerError> {
    Self::check_socket(&self.socket_path).await?;

    let fanout = Arc::new(Mutex::new(EventFanout::new()));
    let publish_fanout = fanout.clone();
    let publish: PublishFn =
      Box::new(move |name, payload| publish_fanout.lock().publish(name, payload));
    let arbiter = Arc::new(Mutex::new(Arbiter::new(self.backend.clone(), publish)));

    let (backend_thread, events) = BackendThread::spawn(self.backend.clone())?;
    let pump_arbiter = arbiter.clone();
    let pump = tokio::spawn(async move {
      pump_events(events, pump_arbiter).await;
    });

    let dispatcher = Dispatcher::new(self.backend.clone(), arbiter, fanout);

    let listener = UnixListener::bind(&self.socket_path)?;
    log::info!("Listening on {}", self.socket_path.display());

    let mut connections: Vec<RpcConnection> = Vec::new();
    let mut next_conn_id: u64 = 1;
    loop {
      tokio::select! {
        _ = self.shutdown.cancelled() => {
          log::info!("Shutdown requested, closing listener");
          break;
        }
        accepted = listener.accept() => {
          match accepted {
            Ok((stream, _)) => {
              connections.retain(|c| !c.is_closed());
              let conn_id = next_conn_id;
              next_conn_id += 1;
              log::debug!("Client #{} connected", conn_id);
              let (reader, writer) = tokio::io::split(stream);
              connections.push(RpcConnection::new(reader, writer, |tx| {
                dispatcher.handler(conn_id, tx)
              }));
            }
            Err(e) => log::warn!("Accept failed: {}", e),
          }
        }
      }
    }

    drop(listener);
    // Tear surviving connections down before the backend goes away, so no
    // request can reach a stopped backend.
    connections.clear();
    let _ = std::fs::remove_file(&self.socket_path);

    // Joining the backend thread blocks; keep it off the async runtime.
    let _ = tokio::task::spawn_blocking(move || backend_thread.stop()).await;
    pump.abort();
    log::info!("Daemon stopped");
    Ok(())
  }
}

/// Marshal backend-thread events into arbitration on the server loop.
async fn pump_events(events: Receiver<BackendEvent>, arbiter: Arc<Mutex<Arbiter>>) {
  while let Ok(event) = events.recv().await {
    let mut arbiter = arbiter.lock();
    match event {
      BackendEvent::PlayerAppeared { instance } => arbiter.on_player_appeared(&instance),
      BackendEvent::PlayerVanished { instance } => arbiter.on_player_vanished(&instance),
      BackendEvent::PlaybackChanged { instance, status } => {
        arbiter.on_playback_change(&instance, status)
      }
      BackendEvent::PlayerSignal {
        instance,
        signal,
        data,
      } => arbiter.on_player_signal(&instance, &signal, data),
    }
  }
  log::debug!("Backend event channel closed");
}
