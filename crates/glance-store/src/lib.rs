//! Glance Store
//!
//! Per-instance execution state and the seams to the CRUD/persistence layer.
//!
//! [`InstanceStateStore`] holds the visible state machine of every widget
//! instance (`stopped → running → {stopped, warning, error}`). It is mutated
//! only by the scheduler and read by external consumers (API, websocket push).
//!
//! The [`Backend`] trait defines what this subsystem consumes from and reports
//! to its collaborators: loading definitions and stored configuration,
//! persisting execution results, and notifying dashboard subscribers.

mod backend;
mod state;

pub use backend::{Backend, BackendError, EventKind, MemoryBackend, PersistedResult};
pub use state::{InstanceSnapshot, InstanceStateStore, WidgetState};
