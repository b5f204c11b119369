//! Routes incoming RPC methods to the arbiter, the player backend and the
//! subscription registry.
//!
//! The method table is closed: a method is either matched here or rejected
//! with MethodNotFound before anything executes. The `player` namespace
//! forwards to the backend on the current player; the default namespace
//! carries arbitration and subscription commands.

use std::sync::Arc;

use async_channel::Sender;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use crate::arbiter::Arbiter;
use crate::backend::{LoopStatus, PlayerBackend, PlayerCommand};
use crate::error::RpcError;
use crate::fanout::EventFanout;
use crate::rpc::{Request, RequestHandler, Response};

const MICROS_PER_SEC: f64 = 1_000_000.0;

/// Positional-or-named parameter access with type checking.
struct Params<'a> {
  args: &'a [Value],
  kwargs: &'a Map<String, Value>,
}

impl<'a> Params<'a> {
  fn new(request: &'a Request) -> Self {
    Self {
      args: &request.args,
      kwargs: &request.kwargs,
    }
  }

  fn get(&self, index: usize, name: &str) -> Option<&Value> {
    self.args.get(index).or_else(|| self.kwargs.get(name))
  }

  fn expect_at_most(&self, count: usize) -> Result<(), RpcError> {
    if self.args.len() > count {
      return Err(RpcError::InvalidParams(format!(
        "expected at most {} positional argument(s), got {}",
        count,
        self.args.len()
      )));
    }
    Ok(())
  }

  fn require_f64(&self, index: usize, name: &str) -> Result<f64, RpcError> {
    self
      .get(index, name)
      .and_then(Value::as_f64)
      .ok_or_else(|| RpcError::InvalidParams(format!("expected a number for '{}'", name)))
  }

  fn require_bool(&self, index: usize, name: &str) -> Result<bool, RpcError> {
    self
      .get(index, name)
      .and_then(Value::as_bool)
      .ok_or_else(|| RpcError::InvalidParams(format!("expected a boolean for '{}'", name)))
  }

  fn bool_or(&self, index: usize, name: &str, default: bool) -> Result<bool, RpcError> {
    match self.get(index, name) {
      None => Ok(default),
      Some(value) => value
        .as_bool()
        .ok_or_else(|| RpcError::InvalidParams(format!("expected a boolean for '{}'", name))),
    }
  }

  fn require_str(&self, index: usize, name: &str) -> Result<&str, RpcError> {
    self
      .get(index, name)
      .and_then(Value::as_str)
      .ok_or_else(|| RpcError::InvalidParams(format!("expected a string for '{}'", name)))
  }
}

/// Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct Dispatcher {
  backend: Arc<dyn PlayerBackend>,
  arbiter: Arc<Mutex<Arbiter>>,
  fanout: Arc<Mutex<EventFanout>>,
}

impl Dispatcher {
  pub fn new(
    backend: Arc<dyn PlayerBackend>,
    arbiter: Arc<Mutex<Arbiter>>,
    fanout: Arc<Mutex<EventFanout>>,
  ) -> Self {
    Self {
      backend,
      arbiter,
      fanout,
    }
  }

  /// Build the request handler for one accepted connection. `event_tx` is
  /// the connection's writer queue, registered on `subscribe`.
  pub fn handler(&self, conn_id: u64, event_tx: Sender<String>) -> RequestHandler {
    let dispatcher = self.clone();
    Box::new(move |request: Request| {
      let id = request.id;
      let result = dispatcher.dispatch(conn_id, &event_tx, &request);
      match (id, result) {
        (Some(id), Ok(value)) => Some(Response::result(id, value)),
        (Some(id), Err(err)) => {
          log::debug!("Request {} failed: {}", request.method, err);
          Some(Response::error(id, &err))
        }
        (None, Ok(_)) => None,
        (None, Err(err)) => {
          log::debug!("Notification {} failed: {}", request.method, err);
          None
        }
      }
    })
  }

  fn dispatch(
    &self,
    conn_id: u64,
    event_tx: &Sender<String>,
    request: &Request,
  ) -> Result<Value, RpcError> {
    let (namespace, name) = match request.method.split_once('.') {
      Some((namespace, name)) => (namespace, name),
      None => ("", request.method.as_str()),
    };
    let params = Params::new(request);
    match namespace {
      "" => self.dispatch_control(conn_id, event_tx, name, params),
      "player" => self.dispatch_player(name, params),
      _ => Err(RpcError::MethodNotFound(request.method.clone())),
    }
  }

  fn dispatch_control(
    &self,
    conn_id: u64,
    event_tx: &Sender<String>,
    name: &str,
    params: Params<'_>,
  ) -> Result<Value, RpcError> {
    match name {
      "next-player" => {
        params.expect_at_most(0)?;
        Ok(instance_or_null(
          self.arbiter.lock().move_current_player_index(1),
        ))
      }
      "previous-player" => {
        params.expect_at_most(0)?;
        Ok(instance_or_null(
          self.arbiter.lock().move_current_player_index(-1),
        ))
      }
      "get-current-instance" => {
        params.expect_at_most(0)?;
        let instance = self
          .arbiter
          .lock()
          .current_instance()
          .map(str::to_string)
          .unwrap_or_default();
        Ok(Value::String(instance))
      }
      "get-current-name" => {
        params.expect_at_most(0)?;
        let current = self.arbiter.lock().current_instance().map(str::to_string);
        match current {
          Some(instance) => Ok(Value::String(self.backend.player_name(&instance)?)),
          None => Ok(Value::String(String::new())),
        }
      }
      "subscribe" => {
        params.expect_at_most(0)?;
        self.fanout.lock().subscribe(conn_id, event_tx.clone());
        log::debug!("Connection #{} subscribed to events", conn_id);
        Ok(Value::Bool(true))
      }
      other => Err(RpcError::MethodNotFound(other.to_string())),
    }
  }

  fn dispatch_player(&self, name: &str, params: Params<'_>) -> Result<Value, RpcError> {
    let instance = self
      .arbiter
      .lock()
      .current_instance()
      .map(str::to_string)
      .ok_or_else(|| RpcError::remote("no-current-player", "no player is currently available"))?;

    match name {
      "get-position" => {
        params.expect_at_most(0)?;
        Ok(json!(self.backend.position_us(&instance)? as f64 / MICROS_PER_SEC))
      }
      "set-position" => {
        params.expect_at_most(2)?;
        let offset = params.require_f64(0, "offset")?;
        let absolute = params.bool_or(1, "absolute", true)?;
        let offset_us = (offset * MICROS_PER_SEC) as i64;
        let target = if absolute {
          offset_us
        } else {
          self
            .backend
            .position_us(&instance)?
            .checked_add(offset_us)
            .ok_or_else(|| {
              RpcError::InvalidParams("seek offset out of range".to_string())
            })?
        };
        self.backend.set_position_us(&instance, target)?;
        Ok(json!(self.backend.position_us(&instance)? as f64 / MICROS_PER_SEC))
      }
      "get-volume" => {
        params.expect_at_most(0)?;
        Ok(json!(self.backend.volume(&instance)?))
      }
      "set-volume" => {
        params.expect_at_most(2)?;
        let level = params.require_f64(0, "level")?;
        let absolute = params.bool_or(1, "absolute", true)?;
        let target = if absolute {
          level
        } else {
          self.backend.volume(&instance)? + level
        };
        if !target.is_finite() {
          return Err(RpcError::InvalidParams("volume out of range".to_string()));
        }
        self.backend.set_volume(&instance, target)?;
        Ok(json!(self.backend.volume(&instance)?))
      }
      "get-status" => {
        params.expect_at_most(0)?;
        Ok(json!(self.backend.playback_status(&instance)?.as_str()))
      }
      "get-metadata-key" => {
        params.expect_at_most(1)?;
        let key = params.require_str(0, "key")?;
        let metadata = self.backend.metadata(&instance)?;
        Ok(
          metadata
            .get(key)
            .cloned()
            .unwrap_or_else(|| Value::String(String::new())),
        )
      }
      "get-all-metadata" => {
        params.expect_at_most(0)?;
        Ok(Value::Object(self.backend.metadata(&instance)?))
      }
      "get-loop-status" => {
        params.expect_at_most(0)?;
        Ok(json!(self.backend.loop_status(&instance)?.as_str()))
      }
      "set-loop-status" => {
        params.expect_at_most(1)?;
        let raw = params.require_str(0, "status")?;
        let status = LoopStatus::parse(raw).ok_or_else(|| {
          RpcError::InvalidParams(format!(
            "invalid loop status '{}', expected one of: none, track, playlist",
            raw
          ))
        })?;
        self.backend.set_loop_status(&instance, status)?;
        Ok(json!(self.backend.loop_status(&instance)?.as_str()))
      }
      "get-shuffled" => {
        params.expect_at_most(0)?;
        Ok(json!(self.backend.shuffled(&instance)?))
      }
      "set-shuffled" => {
        params.expect_at_most(1)?;
        let shuffled = params.require_bool(0, "status")?;
        self.backend.set_shuffled(&instance, shuffled)?;
        Ok(json!(self.backend.shuffled(&instance)?))
      }
      "play" | "pause" | "play-pause" | "stop" | "next" | "previous" => {
        params.expect_at_most(0)?;
        let command = match name {
          "play" => PlayerCommand::Play,
          "pause" => PlayerCommand::Pause,
          "play-pause" => PlayerCommand::PlayPause,
          "stop" => PlayerCommand::Stop,
          "next" => PlayerCommand::Next,
          _ => PlayerCommand::Previous,
        };
        self.backend.command(&instance, command)?;
        Ok(Value::Null)
      }
      "open" => {
        params.expect_at_most(1)?;
        let uri = params.require_str(0, "uri")?;
        self
          .backend
          .command(&instance, PlayerCommand::Open(uri.to_string()))?;
        Ok(Value::Null)
      }
      other => Err(RpcError::MethodNotFound(format!("player.{}", other))),
    }
  }
}

fn instance_or_null(instance: Option<String>) -> Value {
  match instance {
    Some(instance) => Value::String(instance),
    None => Value::Null,
  }
}
