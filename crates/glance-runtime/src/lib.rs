//! Glance Runtime
//!
//! Runtime abstraction for widget script execution. The scheduler drives any
//! [`ScriptExecutor`] (an embedded interpreter, a subprocess, a WASM sandbox)
//! through this seam; swapping the concrete engine never touches the
//! scheduler.
//!
//! Classification is part of the executor contract: every failure mode maps
//! into an [`ExecutionOutcome`], nothing escapes as a transport-level error.

mod executor;
mod outcome;

pub use executor::{ExecutionRequest, ScriptExecutor};
pub use outcome::{ExecutionOutcome, FailureKind};
