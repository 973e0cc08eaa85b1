use serde::{Deserialize, Serialize};

use crate::config::ConfigMap;
use crate::param::ParamSpec;

/// The reusable script + parameter schema a widget instance is based on.
///
/// Immutable per script version: instances reference a definition, they never
/// mutate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetDefinition {
  pub widget_id: String,
  pub name: String,
  /// Script source executed on every refresh.
  pub script: String,
  /// Polling delay in seconds. `0` means run exactly once then stop.
  #[serde(default)]
  pub delay_secs: u64,
  /// Per-run timeout in seconds. `0` means no enforced timeout.
  #[serde(default)]
  pub timeout_secs: u64,
  #[serde(default)]
  pub params: Vec<ParamSpec>,
}

/// Errors raised while resolving an instance's configuration against the
/// definition's parameter specs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
  #[error("missing required parameter '{name}'")]
  MissingParameter { name: String },
}

impl WidgetDefinition {
  /// A one-shot widget executes exactly once and is never rescheduled.
  pub fn is_one_shot(&self) -> bool {
    self.delay_secs == 0
  }

  /// Resolve a supplied configuration against this definition's specs.
  ///
  /// Spec-declared parameters come first, in spec order, taking the supplied
  /// value or the spec default. A required parameter with neither is an error.
  /// Supplied keys outside the specs pass through after, in supplied order.
  pub fn resolve_config(&self, supplied: &ConfigMap) -> Result<ConfigMap, ConfigError> {
    let mut resolved = ConfigMap::new();

    for spec in &self.params {
      let value = supplied
        .get(&spec.name)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .or_else(|| spec.default_value.clone());

      match value {
        Some(value) => resolved.set(spec.name.clone(), value),
        None if spec.required => {
          return Err(ConfigError::MissingParameter {
            name: spec.name.clone(),
          });
        }
        None => {}
      }
    }

    for (key, value) in supplied.iter() {
      if !self.params.iter().any(|spec| spec.name == key) {
        resolved.set(key, value);
      }
    }

    Ok(resolved)
  }
}
