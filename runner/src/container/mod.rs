//! Container management module for dockside
//!
//! Handles all interactions with the container runtime:
//! - Starting the main and sidecar containers and the private network
//! - Executing operations directly or inside the main container
//! - Tearing everything down again

mod cleanup;
mod executor;
mod manager;
pub mod runtime;
pub mod session;

pub use cleanup::{cleanup_all, CleanupReport};
pub use executor::{mounted_binary_path, ExecutionRequest, ExecutionResult, ExecutionTarget, Executor};
pub use manager::{ContainerManager, DEFAULT_STOP_GRACE_SECONDS};
pub use runtime::{CliRuntime, ContainerRuntime};
pub use session::{ContainerHandle, ContainerRole, NetworkHandle, Session};
