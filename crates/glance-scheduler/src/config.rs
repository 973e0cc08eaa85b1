use std::time::Duration;

/// Tuning knobs for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
  /// Maximum number of scripts executing at the same time. Waiting for a
  /// slot does not count against the script timeout.
  pub max_workers: usize,
  /// Floor applied to every refresh interval, including script-provided
  /// overrides, so a misbehaving script cannot busy-loop the pool.
  pub min_delay: Duration,
  /// Deadline applied to definitions that declare no timeout of their own.
  pub max_run: Duration,
  /// How long a cancel waits for the running task to unwind before giving up.
  pub cancel_grace: Duration,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      max_workers: 8,
      min_delay: Duration::from_secs(1),
      max_run: Duration::from_secs(3600),
      cancel_grace: Duration::from_secs(5),
    }
  }
}
