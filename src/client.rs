//! Client-side handle to a running daemon.
//!
//! Wraps an [`RpcConnection`] over the daemon socket and exposes typed
//! wrappers for every supported method plus the subscription event stream.

use std::path::Path;
use std::time::Duration;

use async_channel::Receiver;
use serde_json::{json, Map, Value};
use tokio::net::UnixStream;

use crate::backend::{LoopStatus, PlaybackStatus};
use crate::error::RpcError;
use crate::rpc::{RequestHandler, Response, RpcConnection};

/// An event pushed by the daemon to a subscribed client.
#[derive(Debug, Clone)]
pub struct Event {
  pub name: String,
  pub payload: Map<String, Value>,
}

pub struct Client {
  conn: RpcConnection,
  events: Receiver<Event>,
}

impl Client {
  /// Connect to the daemon socket.
  pub async fn connect(path: &Path) -> Result<Self, RpcError> {
    let stream = UnixStream::connect(path)
      .await
      .map_err(|e| RpcError::Connection(e.to_string()))?;
    Ok(Self::from_stream(stream))
  }

  fn from_stream(stream: UnixStream) -> Self {
    let (reader, writer) = tokio::io::split(stream);

    let (event_tx, event_rx) = async_channel::unbounded::<Event>();
    let handler: RequestHandler = Box::new(move |request| {
      if request.method != "event" {
        log::warn!("Unexpected request from daemon: {}", request.method);
        return request
          .id
          .map(|id| Response::error(id, &RpcError::MethodNotFound(request.method.clone())));
      }
      let mut payload = request.kwargs;
      let name = match payload.remove("event") {
        Some(Value::String(name)) => name,
        _ => {
          log::warn!("Event notification without a name, dropping");
          return None;
        }
      };
      let _ = event_tx.try_send(Event { name, payload });
      None
    });

    let conn = RpcConnection::new(reader, writer, |_tx| handler);
    Self {
      conn,
      events: event_rx,
    }
  }

  /// Connect, retrying with a fixed backoff while the daemon is not (yet)
  /// reachable. Other socket errors are surfaced immediately.
  pub async fn connect_with_retry(path: &Path, backoff: Duration) -> Result<Self, RpcError> {
    loop {
      match UnixStream::connect(path).await {
        Ok(stream) => return Ok(Self::from_stream(stream)),
        Err(e)
          if matches!(
            e.kind(),
            std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::NotFound
          ) =>
        {
          log::info!("Daemon not reachable ({}), retrying in {:?}", e, backoff);
          tokio::time::sleep(backoff).await;
        }
        Err(e) => return Err(RpcError::Connection(e.to_string())),
      }
    }
  }

  /// Raw positional call.
  pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, RpcError> {
    self.conn.do_request(method, args, Map::new()).await
  }

  /// Raw call with keyword arguments.
  pub async fn call_kw(
    &self,
    method: &str,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
  ) -> Result<Value, RpcError> {
    self.conn.do_request(method, args, kwargs).await
  }

  /// Subscribe to daemon events and return the delivery stream.
  pub async fn subscribe(&self) -> Result<Receiver<Event>, RpcError> {
    self.call("subscribe", Vec::new()).await?;
    Ok(self.events.clone())
  }

  /// Event stream without subscribing (stays silent until `subscribe`).
  pub fn events(&self) -> Receiver<Event> {
    self.events.clone()
  }

  pub async fn next_player(&self) -> Result<Option<String>, RpcError> {
    Ok(as_optional_string(self.call("next-player", Vec::new()).await?))
  }

  pub async fn previous_player(&self) -> Result<Option<String>, RpcError> {
    Ok(as_optional_string(
      self.call("previous-player", Vec::new()).await?,
    ))
  }

  /// Instance id of the current player ("" when there is none).
  pub async fn current_instance(&self) -> Result<String, RpcError> {
    expect_string(self.call("get-current-instance", Vec::new()).await?)
  }

  /// Display name of the current player ("" when there is none).
  pub async fn current_name(&self) -> Result<String, RpcError> {
    expect_string(self.call("get-current-name", Vec::new()).await?)
  }

  /// Playback position in seconds.
  pub async fn get_position(&self) -> Result<f64, RpcError> {
    expect_f64(self.call("player.get-position", Vec::new()).await?)
  }

  /// Seek; `offset` is seconds, exact when `absolute`, relative otherwise.
  /// Returns the fresh position.
  pub async fn set_position(&self, offset: f64, absolute: bool) -> Result<f64, RpcError> {
    expect_f64(
      self
        .call("player.set-position", vec![json!(offset), json!(absolute)])
        .await?,
    )
  }

  /// Volume as a fraction in [0, 1].
  pub async fn get_volume(&self) -> Result<f64, RpcError> {
    expect_f64(self.call("player.get-volume", Vec::new()).await?)
  }

  /// Returns the fresh volume.
  pub async fn set_volume(&self, level: f64, absolute: bool) -> Result<f64, RpcError> {
    expect_f64(
      self
        .call("player.set-volume", vec![json!(level), json!(absolute)])
        .await?,
    )
  }

  pub async fn get_status(&self) -> Result<PlaybackStatus, RpcError> {
    let value = self.call("player.get-status", Vec::new()).await?;
    serde_json::from_value(value).map_err(|e| RpcError::Decode(e.to_string()))
  }

  pub async fn get_metadata_key(&self, key: &str) -> Result<Value, RpcError> {
    self.call("player.get-metadata-key", vec![json!(key)]).await
  }

  pub async fn get_all_metadata(&self) -> Result<Map<String, Value>, RpcError> {
    match self.call("player.get-all-metadata", Vec::new()).await? {
      Value::Object(map) => Ok(map),
      other => Err(RpcError::Decode(format!(
        "expected a metadata object, got {}",
        other
      ))),
    }
  }

  pub async fn get_loop_status(&self) -> Result<LoopStatus, RpcError> {
    let value = self.call("player.get-loop-status", Vec::new()).await?;
    serde_json::from_value(value).map_err(|e| RpcError::Decode(e.to_string()))
  }

  pub async fn set_loop_status(&self, status: LoopStatus) -> Result<LoopStatus, RpcError> {
    let value = self
      .call("player.set-loop-status", vec![json!(status.as_str())])
      .await?;
    serde_json::from_value(value).map_err(|e| RpcError::Decode(e.to_string()))
  }

  pub async fn get_shuffled(&self) -> Result<bool, RpcError> {
    expect_bool(self.call("player.get-shuffled", Vec::new()).await?)
  }

  pub async fn set_shuffled(&self, shuffled: bool) -> Result<bool, RpcError> {
    expect_bool(
      self
        .call("player.set-shuffled", vec![json!(shuffled)])
        .await?,
    )
  }

  pub async fn play(&self) -> Result<(), RpcError> {
    self.call("player.play", Vec::new()).await.map(|_| ())
  }

  pub async fn pause(&self) -> Result<(), RpcError> {
    self.call("player.pause", Vec::new()).await.map(|_| ())
  }

  pub async fn play_pause(&self) -> Result<(), RpcError> {
    self.call("player.play-pause", Vec::new()).await.map(|_| ())
  }

  pub async fn stop(&self) -> Result<(), RpcError> {
    self.call("player.stop", Vec::new()).await.map(|_| ())
  }

  pub async fn next(&self) -> Result<(), RpcError> {
    self.call("player.next", Vec::new()).await.map(|_| ())
  }

  pub async fn previous(&self) -> Result<(), RpcError> {
    self.call("player.previous", Vec::new()).await.map(|_| ())
  }

  pub async fn open(&self, uri: &str) -> Result<(), RpcError> {
    self.call("player.open", vec![json!(uri)]).await.map(|_| ())
  }
}

fn as_optional_string(value: Value) -> Option<String> {
  match value {
    Value::String(s) => Some(s),
    _ => None,
  }
}

fn expect_string(value: Value) -> Result<String, RpcError> {
  match value {
    Value::String(s) => Ok(s),
    other => Err(RpcError::Decode(format!("expected a string, got {}", other))),
  }
}

fn expect_f64(value: Value) -> Result<f64, RpcError> {
  value
    .as_f64()
    .ok_or_else(|| RpcError::Decode(format!("expected a number, got {}", value)))
}

fn expect_bool(value: Value) -> Result<bool, RpcError> {
  value
    .as_bool()
    .ok_or_else(|| RpcError::Decode(format!("expected a boolean, got {}", value)))
}
