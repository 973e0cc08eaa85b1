use serde::{Deserialize, Serialize};

use crate::config::ConfigMap;

/// One placed, configured occurrence of a widget definition on a dashboard
/// grid.
///
/// Identity is the opaque `instance_id`, stable for the instance's lifetime.
/// Execution state (current state, last payload/log/timestamp) lives in the
/// instance state store and is mutated exclusively by the scheduler; this
/// struct carries the parts owned by the CRUD layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetInstance {
  pub instance_id: String,
  /// The dashboard grid this instance belongs to. Grids are cancelled as a
  /// unit when deleted.
  pub grid_id: String,
  /// Token of the owning project, used to route subscriber notifications.
  pub project_token: String,
  /// The definition this instance is based on.
  pub widget_id: String,
  /// Instance configuration; `password`-typed values are encrypted at rest.
  #[serde(default)]
  pub config: ConfigMap,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub custom_style: Option<String>,
}
