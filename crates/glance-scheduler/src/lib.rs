//! Glance Scheduler
//!
//! Drives widget instances on their refresh cadence. Each scheduled instance
//! owns one long-lived task that loops execute-then-sleep; actual script
//! invocations are throttled by a shared worker pool so a dashboard with many
//! widgets cannot saturate the process.
//!
//! The registry holds at most one task per instance, which is the
//! double-invocation guard: scheduling an already-scheduled instance cancels
//! and awaits the existing task before spawning its replacement, and
//! cancellation works by revoking the task's token and waiting for it to
//! unwind. A cancelled run never mutates state or persists a result.

mod config;
mod cycle;
mod error;
mod scheduler;

pub use config::SchedulerConfig;
pub use error::SchedulerError;
pub use scheduler::Scheduler;
