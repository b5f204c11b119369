//! One RPC peer endpoint over a line-delimited stream.
//!
//! Symmetric: the daemon wraps every accepted socket in an `RpcConnection`
//! and so does the client on its outgoing socket. A reader task resolves
//! responses against the pending-request table and hands requests to the
//! supplied handler in strict arrival order; a writer task serializes all
//! outgoing lines through one queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::protocol::{Message, Request, Response};
use crate::error::RpcError;

/// How long a caller waits for a matching response.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Waiter resolved by a matching response, or dropped on disconnect.
type PendingReply = oneshot::Sender<Result<Value, RpcError>>;

/// Handles requests and notifications arriving from the peer. Returns the
/// response to write back, or `None` for notifications. Invoked inline in
/// the reader loop, so requests on one connection never reorder.
pub type RequestHandler = Box<dyn Fn(Request) -> Option<Response> + Send + Sync>;

/// Dropping the handle tears the endpoint down: both tasks stop and every
/// pending request fails with `Disconnected`.
pub struct RpcConnection {
  next_id: AtomicU64,
  pending: Arc<Mutex<HashMap<u64, PendingReply>>>,
  write_tx: Sender<String>,
  reader_handle: JoinHandle<()>,
  writer_handle: JoinHandle<()>,
}

impl RpcConnection {
  /// Spawn the reader and writer tasks for a split stream. `make_handler`
  /// receives the connection's writer queue so handlers (e.g. `subscribe`)
  /// can register it for event delivery.
  pub fn new<R, W, F>(reader: R, writer: W, make_handler: F) -> Self
  where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
    F: FnOnce(Sender<String>) -> RequestHandler,
  {
    let pending = Arc::new(Mutex::new(HashMap::new()));
    let (write_tx, write_rx) = async_channel::unbounded::<String>();
    let handler = make_handler(write_tx.clone());

    let reader_pending = pending.clone();
    let reader_write_tx = write_tx.clone();
    let reader_handle = tokio::spawn(async move {
      Self::reader_loop(reader, reader_pending, reader_write_tx, handler).await;
    });
    let writer_handle = tokio::spawn(async move {
      Self::writer_loop(writer, write_rx).await;
    });

    Self {
      next_id: AtomicU64::new(1),
      pending,
      write_tx,
      reader_handle,
      writer_handle,
    }
  }

  /// Whether the connection has already wound down on its own (peer closed
  /// or I/O error).
  pub fn is_closed(&self) -> bool {
    self.reader_handle.is_finished()
  }

  /// The connection's outgoing line queue. Sends fail once the writer task
  /// has stopped, which is how stale event listeners are detected.
  pub fn sender(&self) -> Sender<String> {
    self.write_tx.clone()
  }

  /// Send a request and suspend until the matching response or the timeout,
  /// whichever comes first. The pending entry is removed on timeout so the
  /// table cannot leak.
  pub async fn do_request(
    &self,
    method: &str,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
  ) -> Result<Value, RpcError> {
    let id = self.next_id.fetch_add(1, Ordering::SeqCst);
    let request = Request::new(id, method, args, kwargs);
    let line =
      serde_json::to_string(&request).map_err(|e| RpcError::Decode(e.to_string()))?;

    let (tx, rx) = oneshot::channel();
    self.pending.lock().insert(id, tx);

    log::debug!("Sending request #{}: {}", id, line);
    if self.write_tx.send(line).await.is_err() {
      self.pending.lock().remove(&id);
      return Err(RpcError::Disconnected);
    }

    match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
      Ok(Ok(result)) => result,
      Ok(Err(_)) => Err(RpcError::Disconnected),
      Err(_) => {
        log::warn!("Request #{} ({}) timed out", id, method);
        self.pending.lock().remove(&id);
        Err(RpcError::Timeout)
      }
    }
  }

  /// Send a one-way notification.
  pub async fn notify(
    &self,
    method: &str,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
  ) -> Result<(), RpcError> {
    let request = Request::notification(method, args, kwargs);
    let line =
      serde_json::to_string(&request).map_err(|e| RpcError::Decode(e.to_string()))?;
    self
      .write_tx
      .send(line)
      .await
      .map_err(|_| RpcError::Disconnected)
  }

  async fn reader_loop<R: AsyncRead + Unpin>(
    reader: R,
    pending: Arc<Mutex<HashMap<u64, PendingReply>>>,
    write_tx: Sender<String>,
    handler: RequestHandler,
  ) {
    let mut buf_reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
      line.clear();
      match buf_reader.read_line(&mut line).await {
        Ok(0) => {
          log::debug!("Peer closed the connection");
          break;
        }
        Ok(_) => {
          let trimmed = line.trim();
          if trimmed.is_empty() {
            continue;
          }
          match Message::parse(trimmed) {
            Ok(Message::Response(response)) => {
              let waiter = pending.lock().remove(&response.id);
              match waiter {
                Some(tx) => {
                  let _ = tx.send(response.into_result());
                }
                None => {
                  log::warn!("Reply for unknown request #{}, dropping", response.id)
                }
              }
            }
            Ok(Message::Request(request)) => {
              if let Some(reply) = handler(request) {
                match serde_json::to_string(&reply) {
                  Ok(out) => {
                    if write_tx.send(out).await.is_err() {
                      break;
                    }
                  }
                  Err(e) => log::error!("Failed to serialize response: {}", e),
                }
              }
            }
            Err(e) => log::warn!("Discarding malformed line: {}", e),
          }
        }
        Err(e) => {
          log::warn!("Read error, closing connection: {}", e);
          break;
        }
      }
    }

    // Fail anything still waiting and wake the writer so it can exit.
    let waiters: Vec<PendingReply> = pending.lock().drain().map(|(_, tx)| tx).collect();
    for tx in waiters {
      let _ = tx.send(Err(RpcError::Disconnected));
    }
    write_tx.close();
  }

  async fn writer_loop<W: AsyncWrite + Unpin>(mut writer: W, write_rx: Receiver<String>) {
    while let Ok(line) = write_rx.recv().await {
      if let Err(e) = writer.write_all(line.as_bytes()).await {
        log::warn!("Write error: {}", e);
        break;
      }
      if let Err(e) = writer.write_all(b"\n").await {
        log::warn!("Write error: {}", e);
        break;
      }
      if let Err(e) = writer.flush().await {
        log::warn!("Flush error: {}", e);
        break;
      }
    }
    // After a write error, make queued senders (event fanout included) fail.
    write_rx.close();
  }
}

impl Drop for RpcConnection {
  fn drop(&mut self) {
    self.reader_handle.abort();
    self.writer_handle.abort();
    self.write_tx.close();
    let waiters: Vec<PendingReply> = self.pending.lock().drain().map(|(_, tx)| tx).collect();
    for tx in waiters {
      let _ = tx.send(Err(RpcError::Disconnected));
    }
  }
}
