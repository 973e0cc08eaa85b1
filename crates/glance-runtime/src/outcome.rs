use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification of a failed script execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
  /// The upstream endpoint answered with a server error (5xx).
  Remote,
  /// The request itself was bad: upstream 4xx, transport failure or a
  /// malformed call.
  Request,
  /// The script aborted explicitly, or could not be prepared at all.
  Fatal,
  /// The enforced deadline elapsed before the script returned.
  Timeout,
  /// The scheduler cancelled the run; the result must be discarded, never
  /// recorded.
  Interrupted,
}

impl fmt::Display for FailureKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      FailureKind::Remote => "remote",
      FailureKind::Request => "request",
      FailureKind::Fatal => "fatal",
      FailureKind::Timeout => "timeout",
      FailureKind::Interrupted => "interrupted",
    };
    f.write_str(name)
  }
}

/// Result of one script invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ExecutionOutcome {
  Success {
    /// Data payload merged into the display template, typically JSON.
    payload: String,
    #[serde(default)]
    log: String,
    /// The script's override of the next-run interval, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    next_run_in: Option<i64>,
  },
  Failure {
    #[serde(default)]
    log: String,
    kind: FailureKind,
  },
}

impl ExecutionOutcome {
  pub fn success(payload: impl Into<String>, log: impl Into<String>) -> Self {
    Self::Success {
      payload: payload.into(),
      log: log.into(),
      next_run_in: None,
    }
  }

  pub fn failure(kind: FailureKind, log: impl Into<String>) -> Self {
    Self::Failure {
      log: log.into(),
      kind,
    }
  }

  pub fn interrupted() -> Self {
    Self::failure(FailureKind::Interrupted, "")
  }

  pub fn log(&self) -> &str {
    match self {
      Self::Success { log, .. } | Self::Failure { log, .. } => log,
    }
  }

  /// The failure classification, `None` for a success.
  pub fn kind(&self) -> Option<FailureKind> {
    match self {
      Self::Success { .. } => None,
      Self::Failure { kind, .. } => Some(*kind),
    }
  }

  pub fn is_interrupted(&self) -> bool {
    self.kind() == Some(FailureKind::Interrupted)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn accessors_cover_both_variants() {
    let ok = ExecutionOutcome::success("{}", "fetched");
    assert_eq!(ok.kind(), None);
    assert_eq!(ok.log(), "fetched");
    assert!(!ok.is_interrupted());

    let failed = ExecutionOutcome::failure(FailureKind::Remote, "upstream 503");
    assert_eq!(failed.kind(), Some(FailureKind::Remote));
    assert!(ExecutionOutcome::interrupted().is_interrupted());
  }

  #[test]
  fn serde_tags_the_variant() {
    let json = serde_json::to_value(ExecutionOutcome::failure(FailureKind::Timeout, "")).unwrap();
    assert_eq!(json["result"], "failure");
    assert_eq!(json["kind"], "timeout");
  }
}
