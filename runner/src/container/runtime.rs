//! Container runtime calls (docker or podman CLI)

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, RunnerError};

/// Lifecycle calls issued against the external container runtime
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// `run <args...>`; returns whatever the runtime printed on stdout
    async fn run_container(&self, args: Vec<String>) -> Result<String>;

    /// `network create <name>`; `None` means created, `Some` carries the
    /// runtime's report when the network was not created by this call
    async fn create_network(&self, name: &str) -> Result<Option<String>>;

    /// `network remove <id>`; `Some` carries anything the runtime reported
    async fn remove_network(&self, id: &str) -> Result<Option<String>>;

    /// `stop --time=<grace> <id>`
    async fn stop_container(&self, id: &str, grace_seconds: u64) -> Result<()>;
}

/// [`ContainerRuntime`] backed by the docker (or podman) command line
pub struct CliRuntime {
    program: PathBuf,
    env: Vec<(String, String)>,
}

impl CliRuntime {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            env: Vec::new(),
        }
    }

    /// Set a variable on every runtime call, so `--env NAME` can forward it
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    async fn call(&self, args: &[String]) -> Result<std::process::Output> {
        debug!(program = %self.program.display(), args = ?args, "Container runtime call");

        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        cmd.output().await.map_err(|e| RunnerError::Spawn {
            program: self.program.display().to_string(),
            message: e.to_string(),
        })
    }
}

fn runtime_error(args: &[String], output: &std::process::Output) -> RunnerError {
    RunnerError::Runtime {
        command: args.join(" "),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

#[async_trait]
impl ContainerRuntime for CliRuntime {
    async fn run_container(&self, args: Vec<String>) -> Result<String> {
        let mut full = vec!["run".to_string()];
        full.extend(args);

        let output = self.call(&full).await?;
        if !output.status.success() {
            return Err(runtime_error(&full, &output));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn create_network(&self, name: &str) -> Result<Option<String>> {
        let args = vec!["network".to_string(), "create".to_string(), name.to_string()];
        let output = self.call(&args).await?;

        if output.status.success() {
            return Ok(None);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.contains("already exists") {
            return Ok(Some(stderr));
        }

        Err(runtime_error(&args, &output))
    }

    async fn remove_network(&self, id: &str) -> Result<Option<String>> {
        let args = vec!["network".to_string(), "remove".to_string(), id.to_string()];
        let output = self.call(&args).await?;

        if !output.status.success() {
            return Err(runtime_error(&args, &output));
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Ok((!stderr.is_empty()).then_some(stderr))
    }

    async fn stop_container(&self, id: &str, grace_seconds: u64) -> Result<()> {
        let args = vec![
            "stop".to_string(),
            format!("--time={}", grace_seconds),
            id.to_string(),
        ];
        let output = self.call(&args).await?;

        if !output.status.success() {
            return Err(runtime_error(&args, &output));
        }

        Ok(())
    }
}
