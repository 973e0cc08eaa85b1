//! Glance Runtime Lua
//!
//! Lua implementation of the [`ScriptExecutor`] seam. Each invocation runs on
//! a fresh VM with no state shared between runs; the only inputs are the
//! resolved configuration, the instance id and the previous payload, injected
//! as globals before the chunk is evaluated.
//!
//! Cancellation is cooperative but does not rely on the script: an
//! instruction-count hook polls the caller's token every few thousand VM
//! instructions, so a cancel is observed mid-loop, not only between
//! statements. HTTP primitives additionally race each request against the
//! token, covering scripts blocked on network I/O.
//!
//! [`ScriptExecutor`]: glance_runtime::ScriptExecutor

mod executor;
mod signal;

pub use executor::LuaExecutor;
