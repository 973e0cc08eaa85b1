/// Errors surfaced by scheduler control operations.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
  /// A cancelled task did not unwind within the grace period. The task has
  /// been aborted; the instance state was reset regardless.
  #[error("instance '{instance_id}' did not stop within {waited_ms}ms")]
  CancelTimeout { instance_id: String, waited_ms: u128 },
}
