use serde::{Deserialize, Serialize};

/// The type of a widget parameter.
///
/// `Password` values are stored encrypted and are decrypted only at the moment
/// they are handed to the script runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
  Text,
  Number,
  Boolean,
  Password,
}

/// Specification of one widget parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
  pub name: String,
  #[serde(rename = "type")]
  pub param_type: ParamType,
  #[serde(default)]
  pub required: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub default_value: Option<String>,
}

impl ParamSpec {
  pub fn new(name: impl Into<String>, param_type: ParamType) -> Self {
    Self {
      name: name.into(),
      param_type,
      required: false,
      default_value: None,
    }
  }

  pub fn text(name: impl Into<String>) -> Self {
    Self::new(name, ParamType::Text)
  }

  pub fn password(name: impl Into<String>) -> Self {
    Self::new(name, ParamType::Password)
  }

  pub fn required(mut self) -> Self {
    self.required = true;
    self
  }

  pub fn with_default(mut self, value: impl Into<String>) -> Self {
    self.default_value = Some(value.into());
    self
  }

  /// Whether values of this parameter must be stored encrypted.
  pub fn is_secret(&self) -> bool {
    matches!(self.param_type, ParamType::Password)
  }
}
