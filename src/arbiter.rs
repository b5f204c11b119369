//! Current-player arbitration.
//!
//! Owns the current-player pointer and reacts to backend lifecycle and
//! playback events. Runs only on the socket-serving loop; the backend thread
//! reaches it exclusively through the bridge channel.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::backend::{PlaybackStatus, PlayerBackend};

/// Callback the arbiter publishes events through (wired to the fanout).
pub type PublishFn = Box<dyn Fn(&str, Map<String, Value>) + Send>;

pub struct Arbiter {
  backend: Arc<dyn PlayerBackend>,
  publish: PublishFn,
  current_index: usize,
  current: Option<String>,
  watch_token: Option<u64>,
}

impl Arbiter {
  pub fn new(backend: Arc<dyn PlayerBackend>, publish: PublishFn) -> Self {
    Self {
      backend,
      publish,
      current_index: 0,
      current: None,
      watch_token: None,
    }
  }

  /// Instance id of the current player, if any.
  pub fn current_instance(&self) -> Option<&str> {
    self.current.as_deref()
  }

  #[cfg(test)]
  pub(crate) fn current_index(&self) -> usize {
    self.current_index
  }

  fn is_active(&self, instance: Option<&str>) -> bool {
    matches!(
      instance.map(|i| self.backend.playback_status(i)),
      Some(Ok(PlaybackStatus::Playing))
    )
  }

  /// First player in appearance order whose status is playing.
  pub fn find_first_active_player(&self) -> Option<String> {
    self
      .backend
      .players()
      .into_iter()
      .find(|p| matches!(self.backend.playback_status(p), Ok(PlaybackStatus::Playing)))
  }

  /// Point at `player` (or nothing), re-wire property signals, and announce
  /// the change. The re-wire and the `player-change` event happen on every
  /// accepted call, so re-running with the same player refreshes its index
  /// and its signal wiring after the set has churned. A player that is no
  /// longer in the set is refused and the pointer is left alone.
  pub fn set_current_player(&mut self, player: Option<String>) {
    match &player {
      None => {
        log::debug!("Unsetting current player");
        self.current_index = 0;
        self.current = None;
      }
      Some(instance) => {
        // A stale event can name a player the backend has already dropped;
        // switching to it would leave the pointer dangling.
        let players = self.backend.players();
        let Some(index) = players.iter().position(|p| p == instance) else {
          log::warn!("Player {} is not in the set, ignoring switch", instance);
          return;
        };
        self.current_index = index;
        self.current = Some(instance.clone());
        log::debug!(
          "Current player set to [{}] = {}",
          self.current_index,
          instance
        );
      }
    }

    if let Some(token) = self.watch_token.take() {
      self.backend.unwatch(token);
    }
    if let Some(instance) = &self.current {
      self.watch_token = Some(self.backend.watch(instance));
    }

    let mut payload = Map::new();
    payload.insert(
      "instance".to_string(),
      Value::String(self.current.clone().unwrap_or_default()),
    );
    (self.publish)("player-change", payload);
  }

  /// Step the pointer by `delta` with wrap-around. Manual navigation always
  /// wins, regardless of which players are active. Returns the new current
  /// instance, or `None` when the set is empty.
  pub fn move_current_player_index(&mut self, delta: i64) -> Option<String> {
    let players = self.backend.players();
    if players.is_empty() {
      return None;
    }
    let len = players.len() as i64;
    let new_index = (self.current_index as i64 + delta).rem_euclid(len) as usize;
    self.set_current_player(Some(players[new_index].clone()));
    self.current.clone()
  }

  pub fn on_player_appeared(&mut self, instance: &str) {
    log::debug!("Player appeared: {}", instance);
    let active = self.find_first_active_player();

    if self.current.is_none() {
      let first = self.backend.players().first().cloned();
      self.set_current_player(active.or(first));
      return;
    }
    if !self.is_active(self.current.as_deref()) {
      if let Some(active) = active {
        self.set_current_player(Some(active));
        return;
      }
    }
    // Keep the current player; refresh its index and wiring.
    let keep = self.current.clone();
    self.set_current_player(keep);
  }

  pub fn on_player_vanished(&mut self, instance: &str) {
    log::debug!("Player vanished: {}", instance);

    if self.current.as_deref() != Some(instance) {
      let keep = self.current.clone();
      self.set_current_player(keep);
      return;
    }

    log::debug!("Current player has vanished");
    let players = self.backend.players();
    if players.is_empty() {
      self.set_current_player(None);
      return;
    }
    let fallback = players[self.current_index.min(players.len() - 1)].clone();
    let next = self.find_first_active_player().unwrap_or(fallback);
    self.set_current_player(Some(next));
  }

  pub fn on_playback_change(&mut self, instance: &str, status: PlaybackStatus) {
    if self.current.as_deref() == Some(instance) {
      let mut payload = Map::new();
      payload.insert(
        "data".to_string(),
        Value::Array(vec![Value::String(status.as_str().to_string())]),
      );
      (self.publish)("playback-status", payload);
    }

    // First-active wins: an already-playing current player is never
    // interrupted by another player starting.
    if self.is_active(self.current.as_deref()) {
      return;
    }
    if status == PlaybackStatus::Playing {
      self.set_current_player(Some(instance.to_string()));
      return;
    }
    if self.current.as_deref() == Some(instance) {
      if let Some(active) = self.find_first_active_player() {
        self.set_current_player(Some(active));
      }
    }
  }

  /// Forward a watched player's property signal. Signals from a player that
  /// is no longer current are stale and dropped.
  pub fn on_player_signal(&mut self, instance: &str, signal: &str, data: Vec<Value>) {
    if self.current.as_deref() != Some(instance) {
      return;
    }
    let mut payload = Map::new();
    payload.insert("data".to_string(), Value::Array(data));
    (self.publish)(signal, payload);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::testing::FakeBackend;
  use parking_lot::Mutex;

  type Published = Arc<Mutex<Vec<(String, Map<String, Value>)>>>;

  fn arbiter_with(backend: Arc<FakeBackend>) -> (Arbiter, Published) {
    let published: Published = Arc::new(Mutex::new(Vec::new()));
    let sink = published.clone();
    let publish: PublishFn = Box::new(move |name, payload| {
      sink.lock().push((name.to_string(), payload));
    });
    (Arbiter::new(backend, publish), published)
  }

  fn player_changes(published: &Published) -> Vec<String> {
    published
      .lock()
      .iter()
      .filter(|(name, _)| name == "player-change")
      .map(|(_, payload)| payload["instance"].as_str().unwrap().to_string())
      .collect()
  }

  fn assert_invariant(arbiter: &Arbiter, backend: &FakeBackend) {
    let players = backend.players();
    match arbiter.current_instance() {
      Some(current) => {
        assert!(arbiter.current_index() < players.len());
        assert_eq!(players[arbiter.current_index()], current);
      }
      None => {
        assert!(players.is_empty());
        assert_eq!(arbiter.current_index(), 0);
      }
    }
  }

  #[test]
  fn first_appearance_selects_it_even_when_inactive() {
    let backend = Arc::new(FakeBackend::new());
    let (mut arbiter, published) = arbiter_with(backend.clone());

    backend.add_player("a", PlaybackStatus::Stopped);
    arbiter.on_player_appeared("a");

    assert_eq!(arbiter.current_instance(), Some("a"));
    assert_eq!(player_changes(&published), vec!["a"]);
    assert_invariant(&arbiter, &backend);
  }

  #[test]
  fn appearance_prefers_first_active_player() {
    let backend = Arc::new(FakeBackend::new());
    let (mut arbiter, _published) = arbiter_with(backend.clone());

    backend.add_player("a", PlaybackStatus::Stopped);
    backend.add_player("b", PlaybackStatus::Playing);
    arbiter.on_player_appeared("b");

    assert_eq!(arbiter.current_instance(), Some("b"));
    assert_invariant(&arbiter, &backend);
  }

  #[test]
  fn inactive_current_yields_to_active_newcomer() {
    let backend = Arc::new(FakeBackend::new());
    let (mut arbiter, _published) = arbiter_with(backend.clone());

    backend.add_player("a", PlaybackStatus::Paused);
    arbiter.on_player_appeared("a");
    backend.add_player("b", PlaybackStatus::Playing);
    arbiter.on_player_appeared("b");

    assert_eq!(arbiter.current_instance(), Some("b"));
    assert_invariant(&arbiter, &backend);
  }

  #[test]
  fn active_current_survives_newcomers() {
    let backend = Arc::new(FakeBackend::new());
    let (mut arbiter, _published) = arbiter_with(backend.clone());

    backend.add_player("a", PlaybackStatus::Playing);
    arbiter.on_player_appeared("a");
    backend.add_player("b", PlaybackStatus::Playing);
    arbiter.on_player_appeared("b");

    assert_eq!(arbiter.current_instance(), Some("a"));
    assert_invariant(&arbiter, &backend);
  }

  #[test]
  fn vanish_of_non_current_keeps_pointer_and_refreshes_index() {
    let backend = Arc::new(FakeBackend::new());
    let (mut arbiter, _published) = arbiter_with(backend.clone());

    backend.add_player("a", PlaybackStatus::Stopped);
    arbiter.on_player_appeared("a");
    backend.add_player("b", PlaybackStatus::Stopped);
    arbiter.on_player_appeared("b");
    arbiter.set_current_player(Some("b".to_string()));
    assert_eq!(arbiter.current_index(), 1);

    backend.remove_player("a");
    arbiter.on_player_vanished("a");

    assert_eq!(arbiter.current_instance(), Some("b"));
    assert_eq!(arbiter.current_index(), 0);
    assert_invariant(&arbiter, &backend);
  }

  #[test]
  fn vanish_of_current_picks_positional_fallback() {
    let backend = Arc::new(FakeBackend::new());
    let (mut arbiter, _published) = arbiter_with(backend.clone());

    for p in ["a", "b", "c"] {
      backend.add_player(p, PlaybackStatus::Stopped);
      arbiter.on_player_appeared(p);
    }
    arbiter.set_current_player(Some("c".to_string()));

    backend.remove_player("c");
    arbiter.on_player_vanished("c");

    // old_index = 2, new_len = 2 -> min(2, 1) = 1 -> "b"
    assert_eq!(arbiter.current_instance(), Some("b"));
    assert_invariant(&arbiter, &backend);
  }

  #[test]
  fn vanish_of_current_prefers_active_over_positional() {
    let backend = Arc::new(FakeBackend::new());
    let (mut arbiter, _published) = arbiter_with(backend.clone());

    for (p, status) in [
      ("a", PlaybackStatus::Playing),
      ("b", PlaybackStatus::Stopped),
      ("c", PlaybackStatus::Stopped),
    ] {
      backend.add_player(p, status);
      arbiter.on_player_appeared(p);
    }
    arbiter.set_current_player(Some("c".to_string()));

    backend.remove_player("c");
    arbiter.on_player_vanished("c");

    assert_eq!(arbiter.current_instance(), Some("a"));
    assert_invariant(&arbiter, &backend);
  }

  #[test]
  fn vanish_of_last_player_clears_pointer() {
    let backend = Arc::new(FakeBackend::new());
    let (mut arbiter, published) = arbiter_with(backend.clone());

    backend.add_player("a", PlaybackStatus::Playing);
    arbiter.on_player_appeared("a");
    backend.remove_player("a");
    arbiter.on_player_vanished("a");

    assert_eq!(arbiter.current_instance(), None);
    assert_eq!(arbiter.current_index(), 0);
    assert_eq!(player_changes(&published), vec!["a", ""]);
    assert_invariant(&arbiter, &backend);
  }

  #[test]
  fn navigation_wraps_both_ways_regardless_of_activity() {
    let backend = Arc::new(FakeBackend::new());
    let (mut arbiter, _published) = arbiter_with(backend.clone());

    for (p, status) in [
      ("a", PlaybackStatus::Stopped),
      ("b", PlaybackStatus::Playing),
      ("c", PlaybackStatus::Stopped),
    ] {
      backend.add_player(p, status);
    }
    arbiter.set_current_player(Some("a".to_string()));

    assert_eq!(arbiter.move_current_player_index(1).as_deref(), Some("b"));
    arbiter.set_current_player(Some("a".to_string()));
    assert_eq!(arbiter.move_current_player_index(-1).as_deref(), Some("c"));
    assert_invariant(&arbiter, &backend);
  }

  #[test]
  fn navigation_on_empty_set_is_noop() {
    let backend = Arc::new(FakeBackend::new());
    let (mut arbiter, published) = arbiter_with(backend.clone());

    assert_eq!(arbiter.move_current_player_index(1), None);
    assert!(published.lock().is_empty());
    assert_invariant(&arbiter, &backend);
  }

  #[test]
  fn playing_transition_takes_over_inactive_current() {
    let backend = Arc::new(FakeBackend::new());
    let (mut arbiter, published) = arbiter_with(backend.clone());

    backend.add_player("a", PlaybackStatus::Paused);
    arbiter.on_player_appeared("a");
    backend.add_player("b", PlaybackStatus::Stopped);
    arbiter.on_player_appeared("b");
    published.lock().clear();

    backend.set_status("b", PlaybackStatus::Playing);
    arbiter.on_playback_change("b", PlaybackStatus::Playing);

    assert_eq!(arbiter.current_instance(), Some("b"));
    assert_eq!(player_changes(&published), vec!["b"]);
    assert_invariant(&arbiter, &backend);
  }

  #[test]
  fn playing_transition_never_interrupts_active_current() {
    let backend = Arc::new(FakeBackend::new());
    let (mut arbiter, _published) = arbiter_with(backend.clone());

    backend.add_player("a", PlaybackStatus::Playing);
    arbiter.on_player_appeared("a");
    backend.add_player("b", PlaybackStatus::Stopped);
    arbiter.on_player_appeared("b");

    backend.set_status("b", PlaybackStatus::Playing);
    arbiter.on_playback_change("b", PlaybackStatus::Playing);

    assert_eq!(arbiter.current_instance(), Some("a"));
    assert_invariant(&arbiter, &backend);
  }

  #[test]
  fn current_pausing_switches_to_another_active_player() {
    let backend = Arc::new(FakeBackend::new());
    let (mut arbiter, published) = arbiter_with(backend.clone());

    backend.add_player("a", PlaybackStatus::Playing);
    arbiter.on_player_appeared("a");
    backend.add_player("b", PlaybackStatus::Playing);
    arbiter.on_player_appeared("b");
    published.lock().clear();

    backend.set_status("a", PlaybackStatus::Paused);
    arbiter.on_playback_change("a", PlaybackStatus::Paused);

    assert_eq!(arbiter.current_instance(), Some("b"));
    // The pause of the then-current player is announced before the switch.
    let names: Vec<String> = published
      .lock()
      .iter()
      .map(|(name, _)| name.clone())
      .collect();
    assert_eq!(names, ["playback-status", "player-change"]);
    assert_invariant(&arbiter, &backend);
  }

  #[test]
  fn current_pausing_with_no_active_alternative_stays() {
    let backend = Arc::new(FakeBackend::new());
    let (mut arbiter, _published) = arbiter_with(backend.clone());

    backend.add_player("a", PlaybackStatus::Playing);
    arbiter.on_player_appeared("a");
    backend.add_player("b", PlaybackStatus::Stopped);
    arbiter.on_player_appeared("b");

    backend.set_status("a", PlaybackStatus::Paused);
    arbiter.on_playback_change("a", PlaybackStatus::Paused);

    assert_eq!(arbiter.current_instance(), Some("a"));
    assert_invariant(&arbiter, &backend);
  }

  #[test]
  fn playing_signal_from_an_already_removed_player_is_ignored() {
    let backend = Arc::new(FakeBackend::new());
    let (mut arbiter, published) = arbiter_with(backend.clone());

    backend.add_player("a", PlaybackStatus::Paused);
    arbiter.on_player_appeared("a");
    published.lock().clear();

    // The backend dropped "ghost" before its vanish event drained.
    arbiter.on_playback_change("ghost", PlaybackStatus::Playing);

    assert_eq!(arbiter.current_instance(), Some("a"));
    assert!(player_changes(&published).is_empty());
    assert_eq!(backend.watched_instances(), vec!["a"]);
    assert_invariant(&arbiter, &backend);
  }

  #[test]
  fn set_current_rewires_property_watches() {
    let backend = Arc::new(FakeBackend::new());
    let (mut arbiter, _published) = arbiter_with(backend.clone());

    backend.add_player("a", PlaybackStatus::Stopped);
    backend.add_player("b", PlaybackStatus::Stopped);
    arbiter.set_current_player(Some("a".to_string()));
    assert_eq!(backend.watched_instances(), vec!["a"]);

    arbiter.set_current_player(Some("b".to_string()));
    assert_eq!(backend.watched_instances(), vec!["b"]);

    arbiter.set_current_player(None);
    assert!(backend.watched_instances().is_empty());
  }

  #[test]
  fn signals_from_non_current_players_are_dropped() {
    let backend = Arc::new(FakeBackend::new());
    let (mut arbiter, published) = arbiter_with(backend.clone());

    backend.add_player("a", PlaybackStatus::Stopped);
    arbiter.set_current_player(Some("a".to_string()));
    published.lock().clear();

    arbiter.on_player_signal("b", "volume", vec![Value::from(0.5)]);
    assert!(published.lock().is_empty());

    arbiter.on_player_signal("a", "volume", vec![Value::from(0.5)]);
    let events = published.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, "volume");
    assert_eq!(events[0].1["data"], Value::Array(vec![Value::from(0.5)]));
  }

  #[test]
  fn pointer_invariant_holds_across_event_storm() {
    let backend = Arc::new(FakeBackend::new());
    let (mut arbiter, _published) = arbiter_with(backend.clone());

    backend.add_player("a", PlaybackStatus::Stopped);
    arbiter.on_player_appeared("a");
    assert_invariant(&arbiter, &backend);

    backend.add_player("b", PlaybackStatus::Playing);
    arbiter.on_player_appeared("b");
    assert_invariant(&arbiter, &backend);

    backend.set_status("b", PlaybackStatus::Stopped);
    arbiter.on_playback_change("b", PlaybackStatus::Stopped);
    assert_invariant(&arbiter, &backend);

    backend.add_player("c", PlaybackStatus::Paused);
    arbiter.on_player_appeared("c");
    assert_invariant(&arbiter, &backend);

    arbiter.move_current_player_index(2);
    assert_invariant(&arbiter, &backend);

    backend.remove_player("b");
    arbiter.on_player_vanished("b");
    assert_invariant(&arbiter, &backend);

    backend.set_status("a", PlaybackStatus::Playing);
    arbiter.on_playback_change("a", PlaybackStatus::Playing);
    assert_invariant(&arbiter, &backend);

    backend.remove_player("a");
    arbiter.on_player_vanished("a");
    assert_invariant(&arbiter, &backend);

    backend.remove_player("c");
    arbiter.on_player_vanished("c");
    assert_invariant(&arbiter, &backend);
    assert_eq!(arbiter.current_instance(), None);
  }
}
