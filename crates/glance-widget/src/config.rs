use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Ordered `key=value` configuration attached to a widget instance.
///
/// Entry order is insertion order and survives parsing, serialization and the
/// secret codec, so the serialized form diffs and logs stably. Keys are unique;
/// setting an existing key replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigMap {
  entries: Vec<(String, String)>,
}

impl ConfigMap {
  pub fn new() -> Self {
    Self::default()
  }

  /// Look up a value by key.
  pub fn get(&self, key: &str) -> Option<&str> {
    self
      .entries
      .iter()
      .find(|(k, _)| k == key)
      .map(|(_, v)| v.as_str())
  }

  /// Set a value, replacing an existing entry in place or appending.
  pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
    let key = key.into();
    let value = value.into();
    match self.entries.iter_mut().find(|(k, _)| *k == key) {
      Some(entry) => entry.1 = value,
      None => self.entries.push((key, value)),
    }
  }

  /// Iterate entries in insertion order.
  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Serialize to `key=value` lines, one entry per line, in order.
  pub fn to_lines(&self) -> String {
    self
      .entries
      .iter()
      .map(|(k, v)| format!("{}={}", k, v))
      .collect::<Vec<_>>()
      .join("\n")
  }
}

impl FromStr for ConfigMap {
  type Err = Infallible;

  /// Parse `key=value` lines. Blank lines and `#` comments are skipped; a line
  /// without `=` becomes a key with an empty value.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let mut map = ConfigMap::new();
    for line in s.lines() {
      let line = line.trim();
      if line.is_empty() || line.starts_with('#') {
        continue;
      }
      match line.split_once('=') {
        Some((key, value)) => map.set(key.trim(), value),
        None => map.set(line, ""),
      }
    }
    Ok(map)
  }
}

impl fmt::Display for ConfigMap {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.to_lines())
  }
}

impl FromIterator<(String, String)> for ConfigMap {
  fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
    let mut map = ConfigMap::new();
    for (k, v) in iter {
      map.set(k, v);
    }
    map
  }
}

// The wire form is the `key=value` text block, matching how CRUD collaborators
// store instance configuration.
impl Serialize for ConfigMap {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.to_lines())
  }
}

impl<'de> Deserialize<'de> for ConfigMap {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let text = String::deserialize(deserializer)?;
    text.parse().map_err(D::Error::custom)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_preserves_order() {
    let map: ConfigMap = "b=2\na=1\nc=3".parse().unwrap();
    let keys: Vec<&str> = map.iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec!["b", "a", "c"]);
    assert_eq!(map.to_lines(), "b=2\na=1\nc=3");
  }

  #[test]
  fn parse_skips_blanks_and_comments() {
    let map: ConfigMap = "# comment\n\nkey=value\n  \n".parse().unwrap();
    assert_eq!(map.len(), 1);
    assert_eq!(map.get("key"), Some("value"));
  }

  #[test]
  fn value_may_contain_equals() {
    let map: ConfigMap = "url=http://host/path?a=b".parse().unwrap();
    assert_eq!(map.get("url"), Some("http://host/path?a=b"));
  }

  #[test]
  fn set_replaces_in_place() {
    let mut map: ConfigMap = "a=1\nb=2".parse().unwrap();
    map.set("a", "9");
    assert_eq!(map.to_lines(), "a=9\nb=2");
  }

  #[test]
  fn serde_round_trip() {
    let map: ConfigMap = "city=Lyon\ntoken=abc".parse().unwrap();
    let json = serde_json::to_string(&map).unwrap();
    let back: ConfigMap = serde_json::from_str(&json).unwrap();
    assert_eq!(back, map);
  }
}
