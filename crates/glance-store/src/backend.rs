use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use glance_widget::{ConfigMap, ParamSpec, WidgetDefinition};

use crate::state::WidgetState;

/// Event pushed to connected dashboard clients so they refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
  RefreshWidget,
  RefreshDashboard,
  Disconnect,
}

/// Error type for backend operations.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("backend error: {0}")]
  Other(String),
}

/// What the scheduler consumes from and reports to the CRUD/persistence
/// layer. Implementations decide where definitions and results actually live
/// (database, files, memory).
#[async_trait]
pub trait Backend: Send + Sync {
  /// Load the definition a widget instance is based on.
  async fn load_definition(&self, widget_id: &str) -> Result<WidgetDefinition, BackendError>;

  /// Load an instance's stored configuration (encrypted `key=value` lines)
  /// together with the parameter specs needed to interpret it.
  async fn load_config(
    &self,
    instance_id: &str,
  ) -> Result<(ConfigMap, Vec<ParamSpec>), BackendError>;

  /// Persist the outcome of one execution.
  async fn persist_result(
    &self,
    instance_id: &str,
    state: WidgetState,
    payload: Option<&str>,
    log: &str,
    executed_at: DateTime<Utc>,
  ) -> Result<(), BackendError>;

  /// Notify connected subscribers of the owning project.
  async fn notify(&self, project_token: &str, event: EventKind) -> Result<(), BackendError>;
}

/// One persisted execution result, as recorded by [`MemoryBackend`].
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedResult {
  pub instance_id: String,
  pub state: WidgetState,
  pub payload: Option<String>,
  pub log: String,
  pub executed_at: DateTime<Utc>,
}

/// In-memory backend for the CLI and for tests. Results and notifications are
/// recorded so callers can observe what the scheduler reported.
#[derive(Default)]
pub struct MemoryBackend {
  definitions: Mutex<HashMap<String, WidgetDefinition>>,
  configs: Mutex<HashMap<String, (ConfigMap, Vec<ParamSpec>)>>,
  results: Mutex<Vec<PersistedResult>>,
  events: Mutex<Vec<(String, EventKind)>>,
}

impl MemoryBackend {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert_definition(&self, definition: WidgetDefinition) {
    self
      .definitions
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .insert(definition.widget_id.clone(), definition);
  }

  pub fn insert_config(&self, instance_id: &str, config: ConfigMap, specs: Vec<ParamSpec>) {
    self
      .configs
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .insert(instance_id.to_string(), (config, specs));
  }

  /// Everything persisted so far, oldest first.
  pub fn results(&self) -> Vec<PersistedResult> {
    self
      .results
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .clone()
  }

  /// Notifications sent so far as `(project_token, event)` pairs.
  pub fn events(&self) -> Vec<(String, EventKind)> {
    self
      .events
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .clone()
  }
}

#[async_trait]
impl Backend for MemoryBackend {
  async fn load_definition(&self, widget_id: &str) -> Result<WidgetDefinition, BackendError> {
    self
      .definitions
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .get(widget_id)
      .cloned()
      .ok_or_else(|| BackendError::NotFound(format!("widget '{widget_id}'")))
  }

  async fn load_config(
    &self,
    instance_id: &str,
  ) -> Result<(ConfigMap, Vec<ParamSpec>), BackendError> {
    self
      .configs
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .get(instance_id)
      .cloned()
      .ok_or_else(|| BackendError::NotFound(format!("instance '{instance_id}'")))
  }

  async fn persist_result(
    &self,
    instance_id: &str,
    state: WidgetState,
    payload: Option<&str>,
    log: &str,
    executed_at: DateTime<Utc>,
  ) -> Result<(), BackendError> {
    self
      .results
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .push(PersistedResult {
        instance_id: instance_id.to_string(),
        state,
        payload: payload.map(str::to_owned),
        log: log.to_string(),
        executed_at,
      });
    Ok(())
  }

  async fn notify(&self, project_token: &str, event: EventKind) -> Result<(), BackendError> {
    self
      .events
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .push((project_token.to_string(), event));
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn memory_backend_records_results_and_events() {
    let backend = MemoryBackend::new();
    backend
      .persist_result("w1", WidgetState::Running, Some("{}"), "ok", Utc::now())
      .await
      .unwrap();
    backend
      .notify("p1", EventKind::RefreshWidget)
      .await
      .unwrap();

    let results = backend.results();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].instance_id, "w1");
    assert_eq!(backend.events(), vec![("p1".to_string(), EventKind::RefreshWidget)]);
  }

  #[tokio::test]
  async fn unknown_lookups_are_not_found() {
    let backend = MemoryBackend::new();
    assert!(matches!(
      backend.load_definition("missing").await,
      Err(BackendError::NotFound(_))
    ));
    assert!(matches!(
      backend.load_config("missing").await,
      Err(BackendError::NotFound(_))
    ));
  }
}
