//! Configuration module for dockside
//!
//! Supports configuration via:
//! - TOML/YAML/JSON config files (`dockside.*` in the working directory, or an explicit path)
//! - Environment variables (`DOCKSIDE__` prefix, `__` as the nesting separator)
//! - Command line arguments, applied on top by the binary

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Mount point of the binary's directory inside the main container
pub const BINARY_MOUNT_POINT: &str = "/opt/dockside/bin";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Container runtime binary; resolved from PATH when unset
    #[serde(default)]
    pub runtime_path: Option<PathBuf>,

    /// Path to the acquired executable
    #[serde(default)]
    pub binary_path: Option<PathBuf>,

    /// Token handed to the executable through the environment
    #[serde(default)]
    pub token: Option<String>,

    /// Fail before setup when no token is configured
    #[serde(default)]
    pub require_token: bool,

    /// Operations to run, in order
    #[serde(default)]
    pub operations: Vec<OperationConfig>,

    /// Values supplied explicitly by the caller
    #[serde(default)]
    pub action: ActionConfig,

    /// Values supplied by the surrounding context; explicit values win
    #[serde(default)]
    pub context: ContextConfig,

    /// Execution settings
    #[serde(default)]
    pub execution: ExecutionConfig,
}

/// One named operation with its flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationConfig {
    pub name: String,

    #[serde(default)]
    pub flags: Vec<String>,
}

/// Explicit container settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionConfig {
    #[serde(default)]
    pub docker_image: Option<String>,

    /// Extra `run` options, whitespace separated
    #[serde(default)]
    pub docker_options: Option<String>,

    #[serde(default)]
    pub sidecar_image: Option<String>,

    #[serde(default)]
    pub sidecar_options: Option<String>,
}

/// Container settings supplied by the context configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default)]
    pub docker_image: Option<String>,

    #[serde(default)]
    pub docker_options: Option<String>,

    #[serde(default)]
    pub sidecar_image: Option<String>,

    #[serde(default)]
    pub sidecar_options: Option<String>,

    /// Alias of the sidecar on the private network
    #[serde(default)]
    pub network_alias: Option<String>,

    /// Variables set by value in the main container
    #[serde(default)]
    pub docker_env: HashMap<String, String>,

    /// Variables set by value in the sidecar container
    #[serde(default)]
    pub sidecar_env: HashMap<String, String>,
}

/// Execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Substring marking a fatal output line
    #[serde(default = "default_fatal_marker")]
    pub fatal_marker: String,

    /// Prefix prepended to fatal lines in the emitted output
    #[serde(default = "default_error_prefix")]
    pub error_prefix: String,

    /// Echo child output to this process's stdout/stderr
    #[serde(default = "default_true")]
    pub echo_output: bool,

    /// Grace period for `stop` before the runtime force-kills
    #[serde(default = "default_stop_grace")]
    pub stop_grace_seconds: u64,

    /// Bytes buffered for one line before it is flushed in pieces
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_fatal_marker() -> String {
    "[FATAL]".to_string()
}

fn default_error_prefix() -> String {
    "::error::".to_string()
}

fn default_true() -> bool {
    true
}

fn default_stop_grace() -> u64 {
    crate::container::DEFAULT_STOP_GRACE_SECONDS
}

fn default_max_line_length() -> usize {
    crate::output::DEFAULT_MAX_LINE_LENGTH
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            fatal_marker: default_fatal_marker(),
            error_prefix: default_error_prefix(),
            echo_output: true,
            stop_grace_seconds: default_stop_grace(),
            max_line_length: default_max_line_length(),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            runtime_path: None,
            binary_path: None,
            token: None,
            require_token: false,
            operations: Vec::new(),
            action: ActionConfig::default(),
            context: ContextConfig::default(),
            execution: ExecutionConfig::default(),
        }
    }
}

/// Pick the first non-empty value, explicit before contextual
pub fn resolve<'a>(explicit: Option<&'a str>, contextual: Option<&'a str>) -> Option<&'a str> {
    explicit
        .filter(|v| !v.trim().is_empty())
        .or_else(|| contextual.filter(|v| !v.trim().is_empty()))
}

/// Split a whitespace-separated option string into arguments
pub fn split_options(options: Option<&str>) -> Vec<String> {
    options
        .map(|o| o.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

impl RunnerConfig {
    /// Load configuration from file and environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // Try to load .env file if present
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&RunnerConfig::default())?)
            .add_source(config::File::with_name("dockside").required(false));

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("DOCKSIDE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let runner_config: RunnerConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        runner_config.validate()?;

        Ok(runner_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.execution.fatal_marker.is_empty() {
            anyhow::bail!("Fatal marker cannot be empty");
        }

        if self.execution.max_line_length == 0 {
            anyhow::bail!("Maximum line length must be positive");
        }

        if let Some(op) = self.operations.iter().find(|op| op.name.trim().is_empty()) {
            anyhow::bail!("Operation name cannot be empty (flags: {:?})", op.flags);
        }

        Ok(())
    }

    /// Resolve the container runtime binary (docker first, then podman)
    pub fn resolve_runtime_path(&self) -> PathBuf {
        if let Some(ref path) = self.runtime_path {
            return path.clone();
        }

        which::which("docker")
            .or_else(|_| which::which("podman"))
            .unwrap_or_else(|_| PathBuf::from("docker"))
    }

    /// Image of the sidecar, if one is requested
    pub fn sidecar_image(&self) -> Option<&str> {
        resolve(
            self.action.sidecar_image.as_deref(),
            self.context.sidecar_image.as_deref(),
        )
    }
}
