//! dockside library
//!
//! Runs operations of a prebuilt executable, directly or inside an ephemeral
//! container with an optional sidecar on a private network, and tears down
//! every container and network it created on every exit path.

pub mod config;
pub mod container;
pub mod environment;
pub mod error;
pub mod invocation;
pub mod logging;
pub mod output;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Result, RunnerError};
pub use invocation::{Invocation, InvocationOutcome};
