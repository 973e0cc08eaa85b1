use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use glance_widget::ConfigMap;

use crate::outcome::ExecutionOutcome;

/// Input required to execute one script invocation.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
  /// Widget instance this run belongs to.
  pub instance_id: String,
  /// Script source text.
  pub script: String,
  /// Resolved configuration; secrets are already decrypted.
  pub config: ConfigMap,
  /// Payload of the last successful run, exposed to the script.
  pub previous_payload: Option<String>,
}

/// Executes exactly one script invocation to completion under a caller-held
/// cancellation signal, and classifies the result.
///
/// Implementations must observe `cancel` within one loop iteration of the
/// running script, not only between statements, and must never share mutable
/// state between invocations beyond what the request carries.
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
  async fn execute(&self, request: ExecutionRequest, cancel: CancellationToken)
  -> ExecutionOutcome;
}
