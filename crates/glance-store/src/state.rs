use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use glance_runtime::FailureKind;

/// Visible state of a widget instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetState {
  /// Initial state, and the terminal state of removed, cancelled or finished
  /// one-shot instances.
  Stopped,
  /// A live recurring instance: executing now or waiting for its next tick.
  Running,
  /// Last run failed in a retryable way (bad request, timeout).
  Warning,
  /// Last run failed hard (upstream 5xx, fatal script abort).
  Error,
}

/// Read view of one instance: current state plus last execution metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSnapshot {
  pub state: WidgetState,
  pub last_execution_at: Option<DateTime<Utc>>,
  /// Payload of the last successful run; failures never overwrite it.
  pub last_payload: Option<String>,
  pub last_log: Option<String>,
}

impl Default for InstanceSnapshot {
  fn default() -> Self {
    Self {
      state: WidgetState::Stopped,
      last_execution_at: None,
      last_payload: None,
      last_log: None,
    }
  }
}

/// In-memory state machine for all widget instances.
///
/// Mutations for one instance are serialized by construction (a single
/// scheduler task drives each instance); the map lock only guards the short
/// record update, so reads and writes for different instances do not contend
/// beyond it.
#[derive(Default)]
pub struct InstanceStateStore {
  records: RwLock<HashMap<String, InstanceSnapshot>>,
}

impl InstanceStateStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Mark an instance as running. Idempotent: the double-invocation guard
  /// lives in the scheduler's task registry, not here.
  pub fn mark_running(&self, instance_id: &str) {
    let mut records = self.write();
    records.entry(instance_id.to_string()).or_default().state = WidgetState::Running;
  }

  /// Record a successful run. `terminal` stops the instance (one-shot, or a
  /// resulting delay of zero); otherwise it stays `Running` for the next tick.
  pub fn apply_success(
    &self,
    instance_id: &str,
    payload: &str,
    log: &str,
    when: DateTime<Utc>,
    terminal: bool,
  ) {
    let mut records = self.write();
    let record = records.entry(instance_id.to_string()).or_default();
    record.state = if terminal {
      WidgetState::Stopped
    } else {
      WidgetState::Running
    };
    record.last_execution_at = Some(when);
    record.last_payload = Some(payload.to_string());
    record.last_log = Some(log.to_string());
  }

  /// Record a failed run. Returns `false` when the update was dropped:
  /// an `Interrupted` result means the instance was cancelled out-of-band
  /// and must not be resurrected.
  pub fn apply_failure(
    &self,
    instance_id: &str,
    log: &str,
    when: DateTime<Utc>,
    kind: FailureKind,
  ) -> bool {
    let state = match kind {
      FailureKind::Remote | FailureKind::Fatal => WidgetState::Error,
      FailureKind::Request | FailureKind::Timeout => WidgetState::Warning,
      FailureKind::Interrupted => {
        debug!(instance_id, "dropping interrupted result");
        return false;
      }
    };

    let mut records = self.write();
    let record = records.entry(instance_id.to_string()).or_default();
    record.state = state;
    record.last_execution_at = Some(when);
    record.last_log = Some(log.to_string());
    true
  }

  /// Force an instance back to `Stopped` without touching its payload. Used
  /// at process startup so nothing left `Running` by a crash is ever observed
  /// as permanently running without a live task.
  pub fn reset(&self, instance_id: &str) {
    let mut records = self.write();
    if let Some(record) = records.get_mut(instance_id) {
      record.state = WidgetState::Stopped;
    }
  }

  /// [`reset`](Self::reset) applied to every known instance.
  pub fn reset_all(&self) {
    let mut records = self.write();
    for record in records.values_mut() {
      record.state = WidgetState::Stopped;
    }
  }

  /// Drop an instance entirely; used when it is removed from its grid.
  pub fn remove(&self, instance_id: &str) {
    self.write().remove(instance_id);
  }

  /// Read accessor for API rendering.
  pub fn snapshot(&self, instance_id: &str) -> Option<InstanceSnapshot> {
    self.read().get(instance_id).cloned()
  }

  /// Current state; unknown instances are `Stopped`.
  pub fn state(&self, instance_id: &str) -> WidgetState {
    self
      .read()
      .get(instance_id)
      .map(|r| r.state)
      .unwrap_or(WidgetState::Stopped)
  }

  fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, InstanceSnapshot>> {
    self.records.read().unwrap_or_else(|e| e.into_inner())
  }

  fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, InstanceSnapshot>> {
    self.records.write().unwrap_or_else(|e| e.into_inner())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn now() -> DateTime<Utc> {
    Utc::now()
  }

  #[test]
  fn unknown_instances_are_stopped() {
    let store = InstanceStateStore::new();
    assert_eq!(store.state("w1"), WidgetState::Stopped);
    assert!(store.snapshot("w1").is_none());
  }

  #[test]
  fn recurring_success_stays_running() {
    let store = InstanceStateStore::new();
    store.mark_running("w1");
    assert_eq!(store.state("w1"), WidgetState::Running);

    store.apply_success("w1", "{\"v\":1}", "ok", now(), false);
    let snapshot = store.snapshot("w1").unwrap();
    assert_eq!(snapshot.state, WidgetState::Running);
    assert_eq!(snapshot.last_payload.as_deref(), Some("{\"v\":1}"));
    assert!(snapshot.last_execution_at.is_some());
  }

  #[test]
  fn terminal_success_stops_the_instance() {
    let store = InstanceStateStore::new();
    store.mark_running("w1");
    store.apply_success("w1", "{}", "", now(), true);
    assert_eq!(store.state("w1"), WidgetState::Stopped);
  }

  #[test]
  fn failure_kinds_map_to_error_and_warning() {
    let store = InstanceStateStore::new();
    for (kind, expected) in [
      (FailureKind::Remote, WidgetState::Error),
      (FailureKind::Fatal, WidgetState::Error),
      (FailureKind::Request, WidgetState::Warning),
      (FailureKind::Timeout, WidgetState::Warning),
    ] {
      store.mark_running("w1");
      assert!(store.apply_failure("w1", "boom", now(), kind));
      assert_eq!(store.state("w1"), expected, "kind {kind}");
    }
  }

  #[test]
  fn interrupted_is_dropped_without_mutation() {
    let store = InstanceStateStore::new();
    store.mark_running("w1");
    store.apply_success("w1", "kept", "ok", now(), false);

    assert!(!store.apply_failure("w1", "cancelled", now(), FailureKind::Interrupted));
    let snapshot = store.snapshot("w1").unwrap();
    assert_eq!(snapshot.state, WidgetState::Running);
    assert_eq!(snapshot.last_payload.as_deref(), Some("kept"));
    assert_eq!(snapshot.last_log.as_deref(), Some("ok"));
  }

  #[test]
  fn failures_never_overwrite_the_last_payload() {
    let store = InstanceStateStore::new();
    store.apply_success("w1", "good", "", now(), false);
    store.apply_failure("w1", "boom", now(), FailureKind::Remote);
    let snapshot = store.snapshot("w1").unwrap();
    assert_eq!(snapshot.state, WidgetState::Error);
    assert_eq!(snapshot.last_payload.as_deref(), Some("good"));
    assert_eq!(snapshot.last_log.as_deref(), Some("boom"));
  }

  #[test]
  fn reset_clears_state_but_keeps_payload() {
    let store = InstanceStateStore::new();
    store.apply_success("w1", "data", "", now(), false);
    store.mark_running("w2");

    store.reset_all();
    assert_eq!(store.state("w1"), WidgetState::Stopped);
    assert_eq!(store.state("w2"), WidgetState::Stopped);
    assert_eq!(
      store.snapshot("w1").unwrap().last_payload.as_deref(),
      Some("data")
    );
  }

  #[test]
  fn concurrent_access_across_instances() {
    let store = std::sync::Arc::new(InstanceStateStore::new());
    let handles: Vec<_> = (0..8)
      .map(|i| {
        let store = store.clone();
        std::thread::spawn(move || {
          let id = format!("w{i}");
          for _ in 0..100 {
            store.mark_running(&id);
            store.apply_success(&id, "p", "l", Utc::now(), false);
            let _ = store.snapshot(&id);
          }
        })
      })
      .collect();
    for handle in handles {
      handle.join().unwrap();
    }
    for i in 0..8 {
      assert_eq!(store.state(&format!("w{i}")), WidgetState::Running);
    }
  }
}
