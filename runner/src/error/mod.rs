//! Error types for dockside
//!
//! Runtime failures of the invoked binary (nonzero exit, fatal marker) are not
//! errors: they travel inline in [`crate::container::ExecutionResult`].

use thiserror::Error;

/// Errors that abort the current phase of an invocation
#[derive(Debug, Error)]
pub enum RunnerError {
    /// A required input (binary path, token, network) is missing
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The external process could not be started or awaited
    #[error("Failed to run {program}: {message}")]
    Spawn { program: String, message: String },

    /// The container runtime reported a failure for a lifecycle call
    #[error("Container runtime call `{command}` failed: {stderr}")]
    Runtime { command: String, stderr: String },
}

impl RunnerError {
    pub fn configuration(message: impl Into<String>) -> Self {
        RunnerError::Configuration(message.into())
    }

    /// Short machine-readable code, used in structured logs
    pub fn code(&self) -> &'static str {
        match self {
            RunnerError::Configuration(_) => "CONFIGURATION",
            RunnerError::Spawn { .. } => "SPAWN",
            RunnerError::Runtime { .. } => "RUNTIME",
        }
    }
}

pub type Result<T, E = RunnerError> = std::result::Result<T, E>;
