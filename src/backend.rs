//! Player backend contract.
//!
//! The backend owns every player object and mutates them only from its own
//! run loop thread. Everything else in this crate holds instance ids and
//! reaches the backend through this trait: property getters/setters must be
//! fast and non-blocking because they are called directly from the
//! socket-serving loop, while lifecycle and property-change notifications
//! travel the other way through the [`EventSink`](crate::bridge::EventSink).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::bridge::EventSink;
use crate::error::BackendError;

/// Playback state of a single player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
  Playing,
  Paused,
  Stopped,
}

impl PlaybackStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      PlaybackStatus::Playing => "playing",
      PlaybackStatus::Paused => "paused",
      PlaybackStatus::Stopped => "stopped",
    }
  }
}

/// Loop mode of a single player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopStatus {
  None,
  Track,
  Playlist,
}

impl LoopStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      LoopStatus::None => "none",
      LoopStatus::Track => "track",
      LoopStatus::Playlist => "playlist",
    }
  }

  /// Parse a user-supplied loop status, case-insensitively.
  pub fn parse(s: &str) -> Option<Self> {
    match s.to_ascii_lowercase().as_str() {
      "none" => Some(LoopStatus::None),
      "track" => Some(LoopStatus::Track),
      "playlist" => Some(LoopStatus::Playlist),
      _ => None,
    }
  }
}

/// Native transport commands forwarded verbatim to a player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerCommand {
  Play,
  Pause,
  PlayPause,
  Stop,
  Next,
  Previous,
  Open(String),
}

/// Events emitted by the backend run loop.
///
/// Lifecycle events must be emitted *after* the backend has updated its
/// player set, so that `players()` already reflects the change when the
/// arbiter reacts.
#[derive(Debug, Clone)]
pub enum BackendEvent {
  PlayerAppeared {
    instance: String,
  },
  PlayerVanished {
    instance: String,
  },
  PlaybackChanged {
    instance: String,
    status: PlaybackStatus,
  },
  /// Property-change signal from a watched player. `signal` is the property
  /// name (`volume`, `metadata`, `seeked`, `shuffle`, `loop-status`) and
  /// `data` carries fully materialized JSON values.
  PlayerSignal {
    instance: String,
    signal: String,
    data: Vec<Value>,
  },
}

/// The player backend collaborator.
pub trait PlayerBackend: Send + Sync + 'static {
  /// Run the backend event loop on the calling thread until [`shutdown`]
  /// is invoked. All player state is owned and mutated here.
  ///
  /// [`shutdown`]: PlayerBackend::shutdown
  fn run(&self, events: EventSink);

  /// Ask the run loop to stop. Safe to call from any thread.
  fn shutdown(&self);

  /// Instance ids of all known players, in appearance order.
  fn players(&self) -> Vec<String>;

  /// Display name of a player (as opposed to its unique instance id).
  fn player_name(&self, instance: &str) -> Result<String, BackendError>;

  fn playback_status(&self, instance: &str) -> Result<PlaybackStatus, BackendError>;

  /// Playback position in microseconds.
  fn position_us(&self, instance: &str) -> Result<i64, BackendError>;

  fn set_position_us(&self, instance: &str, position: i64) -> Result<(), BackendError>;

  /// Volume as a fraction in [0, 1].
  fn volume(&self, instance: &str) -> Result<f64, BackendError>;

  fn set_volume(&self, instance: &str, level: f64) -> Result<(), BackendError>;

  fn metadata(&self, instance: &str) -> Result<Map<String, Value>, BackendError>;

  fn loop_status(&self, instance: &str) -> Result<LoopStatus, BackendError>;

  fn set_loop_status(&self, instance: &str, status: LoopStatus) -> Result<(), BackendError>;

  fn shuffled(&self, instance: &str) -> Result<bool, BackendError>;

  fn set_shuffled(&self, instance: &str, shuffled: bool) -> Result<(), BackendError>;

  /// Forward a native transport command to the player.
  fn command(&self, instance: &str, command: PlayerCommand) -> Result<(), BackendError>;

  /// Start routing the player's property-change signals into the event sink.
  /// Returns a token for [`unwatch`](PlayerBackend::unwatch).
  fn watch(&self, instance: &str) -> u64;

  /// Stop routing signals for a previously returned watch token.
  fn unwatch(&self, token: u64);
}

#[cfg(test)]
pub(crate) mod testing {
  //! In-memory backend used by the unit tests.

  use parking_lot::Mutex;

  use super::*;

  struct FakePlayer {
    instance: String,
    name: String,
    status: PlaybackStatus,
    position: i64,
    volume: f64,
    loop_status: LoopStatus,
    shuffled: bool,
    metadata: Map<String, Value>,
  }

  struct Inner {
    players: Vec<FakePlayer>,
    watches: Vec<(u64, String)>,
    next_token: u64,
    commands: Vec<(String, PlayerCommand)>,
  }

  pub(crate) struct FakeBackend {
    inner: Mutex<Inner>,
  }

  impl FakeBackend {
    pub(crate) fn new() -> Self {
      Self {
        inner: Mutex::new(Inner {
          players: Vec::new(),
          watches: Vec::new(),
          next_token: 1,
          commands: Vec::new(),
        }),
      }
    }

    pub(crate) fn add_player(&self, instance: &str, status: PlaybackStatus) {
      let name = instance.split('.').next().unwrap_or(instance).to_string();
      self.inner.lock().players.push(FakePlayer {
        instance: instance.to_string(),
        name,
        status,
        position: 0,
        volume: 0.5,
        loop_status: LoopStatus::None,
        shuffled: false,
        metadata: Map::new(),
      });
    }

    pub(crate) fn remove_player(&self, instance: &str) {
      self.inner.lock().players.retain(|p| p.instance != instance);
    }

    pub(crate) fn set_status(&self, instance: &str, status: PlaybackStatus) {
      let mut inner = self.inner.lock();
      if let Some(player) = inner.players.iter_mut().find(|p| p.instance == instance) {
        player.status = status;
      }
    }

    pub(crate) fn set_metadata(&self, instance: &str, metadata: Map<String, Value>) {
      let mut inner = self.inner.lock();
      if let Some(player) = inner.players.iter_mut().find(|p| p.instance == instance) {
        player.metadata = metadata;
      }
    }

    pub(crate) fn watched_instances(&self) -> Vec<String> {
      self
        .inner
        .lock()
        .watches
        .iter()
        .map(|(_, instance)| instance.clone())
        .collect()
    }

    pub(crate) fn recorded_commands(&self) -> Vec<(String, PlayerCommand)> {
      self.inner.lock().commands.clone()
    }

    fn with_player<T>(
      &self,
      instance: &str,
      f: impl FnOnce(&mut FakePlayer) -> T,
    ) -> Result<T, BackendError> {
      let mut inner = self.inner.lock();
      inner
        .players
        .iter_mut()
        .find(|p| p.instance == instance)
        .map(f)
        .ok_or_else(|| BackendError::UnknownPlayer(instance.to_string()))
    }
  }

  impl PlayerBackend for FakeBackend {
    fn run(&self, _events: EventSink) {}

    fn shutdown(&self) {}

    fn players(&self) -> Vec<String> {
      self.inner.lock().players.iter().map(|p| p.instance.clone()).collect()
    }

    fn player_name(&self, instance: &str) -> Result<String, BackendError> {
      self.with_player(instance, |p| p.name.clone())
    }

    fn playback_status(&self, instance: &str) -> Result<PlaybackStatus, BackendError> {
      self.with_player(instance, |p| p.status)
    }

    fn position_us(&self, instance: &str) -> Result<i64, BackendError> {
      self.with_player(instance, |p| p.position)
    }

    fn set_position_us(&self, instance: &str, position: i64) -> Result<(), BackendError> {
      self.with_player(instance, |p| p.position = position)
    }

    fn volume(&self, instance: &str) -> Result<f64, BackendError> {
      self.with_player(instance, |p| p.volume)
    }

    fn set_volume(&self, instance: &str, level: f64) -> Result<(), BackendError> {
      self.with_player(instance, |p| p.volume = level)
    }

    fn metadata(&self, instance: &str) -> Result<Map<String, Value>, BackendError> {
      self.with_player(instance, |p| p.metadata.clone())
    }

    fn loop_status(&self, instance: &str) -> Result<LoopStatus, BackendError> {
      self.with_player(instance, |p| p.loop_status)
    }

    fn set_loop_status(&self, instance: &str, status: LoopStatus) -> Result<(), BackendError> {
      self.with_player(instance, |p| p.loop_status = status)
    }

    fn shuffled(&self, instance: &str) -> Result<bool, BackendError> {
      self.with_player(instance, |p| p.shuffled)
    }

    fn set_shuffled(&self, instance: &str, shuffled: bool) -> Result<(), BackendError> {
      self.with_player(instance, |p| p.shuffled = shuffled)
    }

    fn command(&self, instance: &str, command: PlayerCommand) -> Result<(), BackendError> {
      self.with_player(instance, |_| ())?;
      self
        .inner
        .lock()
        .commands
        .push((instance.to_string(), command));
      Ok(())
    }

    fn watch(&self, instance: &str) -> u64 {
      let mut inner = self.inner.lock();
      let token = inner.next_token;
      inner.next_token += 1;
      inner.watches.push((token, instance.to_string()));
      token
    }

    fn unwatch(&self, token: u64) {
      self.inner.lock().watches.retain(|(t, _)| *t != token);
    }
  }
}
