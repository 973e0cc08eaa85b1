use serde::{Deserialize, Serialize};

use crate::definition::WidgetDefinition;
use crate::instance::WidgetInstance;

/// A dashboard as loaded from a JSON file: the widget definitions it uses and
/// the placed instances. This is the CLI's input format; a database-backed
/// deployment assembles the same pieces through its own repositories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardDef {
  pub name: String,
  #[serde(default)]
  pub definitions: Vec<WidgetDefinition>,
  #[serde(default)]
  pub instances: Vec<WidgetInstance>,
}

impl DashboardDef {
  pub fn definition(&self, widget_id: &str) -> Option<&WidgetDefinition> {
    self.definitions.iter().find(|d| d.widget_id == widget_id)
  }

  pub fn instance(&self, instance_id: &str) -> Option<&WidgetInstance> {
    self.instances.iter().find(|i| i.instance_id == instance_id)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_a_dashboard_file() {
    let json = r#"{
      "name": "ops",
      "definitions": [{
        "widget_id": "clock",
        "name": "Clock",
        "script": "function run() return os.date() end",
        "delay_secs": 10,
        "params": [{"name": "tz", "type": "text", "default_value": "UTC"}]
      }],
      "instances": [{
        "instance_id": "w1",
        "grid_id": "g1",
        "project_token": "p1",
        "widget_id": "clock",
        "config": "tz=Europe/Paris"
      }]
    }"#;

    let dashboard: DashboardDef = serde_json::from_str(json).unwrap();
    assert_eq!(dashboard.definitions.len(), 1);
    let instance = dashboard.instance("w1").unwrap();
    assert_eq!(instance.config.get("tz"), Some("Europe/Paris"));
    assert!(dashboard.definition("clock").is_some());
    assert!(dashboard.definition("missing").is_none());
  }
}
