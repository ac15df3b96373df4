//! dockside - run a prebuilt executable's operations in ephemeral containers
//!
//! Loads configuration, applies command line overrides and runs one
//! invocation. The process exits with the first failing operation's code.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use dockside::config::{OperationConfig, RunnerConfig};
use dockside::container::CliRuntime;
use dockside::invocation::TOKEN_ENV;
use dockside::logging::init_logging;
use dockside::Invocation;

#[derive(Parser)]
#[command(name = "dockside")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the executable
    #[arg(short, long)]
    binary: Option<PathBuf>,

    /// Main container image
    #[arg(long)]
    image: Option<String>,

    /// Sidecar container image
    #[arg(long)]
    sidecar_image: Option<String>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,

    /// Operation to run instead of the configured ones
    operation: Option<String>,

    /// Flags passed to the operation
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    flags: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = RunnerConfig::load(cli.config.as_deref())?;
    apply_overrides(&mut config, cli);
    config
        .validate()
        .context("Invalid configuration after command line overrides")?;

    init_logging(&config.log_level)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        operations = config.operations.len(),
        "Starting dockside"
    );

    let mut runtime = CliRuntime::new(config.resolve_runtime_path());
    if let Some(ref token) = config.token {
        runtime = runtime.with_env(TOKEN_ENV, token.clone());
    }

    let workdir = std::env::current_dir().context("Failed to read the working directory")?;
    let mut invocation = Invocation::new(config, Arc::new(runtime), workdir);

    match invocation.run().await {
        Ok(outcome) => {
            let code = outcome.exit_code();
            info!(exit_code = code, "dockside finished");
            Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
        }
        Err(e) => {
            error!(error = %e, "dockside failed");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn apply_overrides(config: &mut RunnerConfig, cli: Cli) {
    if let Some(binary) = cli.binary {
        config.binary_path = Some(binary);
    }
    if let Some(image) = cli.image {
        config.action.docker_image = Some(image);
    }
    if let Some(image) = cli.sidecar_image {
        config.action.sidecar_image = Some(image);
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    if let Some(name) = cli.operation {
        config.operations = vec![OperationConfig {
            name,
            flags: cli.flags,
        }];
    }
}
