use glance_runtime::FailureKind;

/// Structured failure raised from inside the VM: by the `*_error` helpers, by
/// the HTTP primitives after status classification, or by the interruption
/// hook. Travels through Lua as an external error and is recovered by
/// downcasting when the invocation returns.
#[derive(Debug, thiserror::Error)]
pub enum ScriptSignal {
  #[error("remote error: {0}")]
  Remote(String),

  #[error("request error: {0}")]
  Request(String),

  #[error("fatal error: {0}")]
  Fatal(String),

  #[error("timeout: {0}")]
  Timeout(String),

  #[error("execution interrupted")]
  Interrupted,
}

impl ScriptSignal {
  pub fn kind(&self) -> FailureKind {
    match self {
      ScriptSignal::Remote(_) => FailureKind::Remote,
      ScriptSignal::Request(_) => FailureKind::Request,
      ScriptSignal::Fatal(_) => FailureKind::Fatal,
      ScriptSignal::Timeout(_) => FailureKind::Timeout,
      ScriptSignal::Interrupted => FailureKind::Interrupted,
    }
  }
}

/// Map a VM error to a failure classification and a loggable message.
///
/// A [`ScriptSignal`] anywhere in the cause chain wins; anything else (syntax
/// errors, plain `error(...)` calls, type errors) is a fatal script failure.
pub fn classify(err: &mlua::Error) -> (FailureKind, String) {
  match find_signal(err) {
    Some(signal) => (signal.kind(), signal.to_string()),
    None => (FailureKind::Fatal, err.to_string()),
  }
}

fn find_signal(err: &mlua::Error) -> Option<&ScriptSignal> {
  match err {
    mlua::Error::CallbackError { cause, .. } => find_signal(cause),
    mlua::Error::WithContext { cause, .. } => find_signal(cause),
    mlua::Error::ExternalError(inner) => inner.downcast_ref::<ScriptSignal>(),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn signal_is_found_through_callback_wrapping() {
    let inner = mlua::Error::external(ScriptSignal::Remote("503".to_string()));
    let wrapped = mlua::Error::CallbackError {
      traceback: String::new(),
      cause: std::sync::Arc::new(inner),
    };
    let (kind, message) = classify(&wrapped);
    assert_eq!(kind, FailureKind::Remote);
    assert!(message.contains("503"));
  }

  #[test]
  fn plain_lua_errors_are_fatal() {
    let err = mlua::Error::RuntimeError("attempt to index a nil value".to_string());
    let (kind, _) = classify(&err);
    assert_eq!(kind, FailureKind::Fatal);
  }
}
