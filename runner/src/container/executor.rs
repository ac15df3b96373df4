//! Operation execution, on the host or inside the main container

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tokio_util::codec::FramedRead;
use tracing::{debug, error, info, warn};

use crate::config::{ExecutionConfig, BINARY_MOUNT_POINT};
use crate::error::{Result, RunnerError};
use crate::output::{Line, LineClassifier};

/// Where an operation runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionTarget {
    Local,
    /// Through `exec` in a running container
    Container(String),
}

impl fmt::Display for ExecutionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionTarget::Local => f.write_str("local"),
            ExecutionTarget::Container(id) => write!(f, "container {}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub operation: String,
    pub flags: Vec<String>,
    pub target: ExecutionTarget,
}

/// Captured outcome of one operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Captured stdout, fatal lines rewritten
    pub output: String,
    /// Captured stderr, fatal lines rewritten
    pub error: String,
    pub exit_code: i32,
    /// Lines carrying the fatal marker, verbatim, from either stream
    pub fatal_lines: Vec<String>,
}

impl ExecutionResult {
    pub fn fatal_detected(&self) -> bool {
        !self.fatal_lines.is_empty()
    }

    pub fn is_failure(&self) -> bool {
        self.exit_code != 0 || self.fatal_detected()
    }
}

#[derive(Debug, Clone, Copy)]
enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

struct Capture {
    stdout: String,
    stderr: String,
    fatal: Vec<String>,
    /// Cleared after the first failed write to the host streams
    echo: bool,
}

impl Capture {
    fn new(echo: bool) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            fatal: Vec::new(),
            echo,
        }
    }
}

/// Runs operations of the acquired binary
pub struct Executor {
    /// Acquired executable
    binary_path: Option<PathBuf>,

    /// Container runtime, used for `exec`
    runtime_path: PathBuf,

    settings: ExecutionConfig,

    /// Variables set on locally spawned processes
    env: Vec<(String, String)>,
}

impl Executor {
    pub fn new(binary_path: Option<PathBuf>, runtime_path: PathBuf, settings: ExecutionConfig) -> Self {
        Self {
            binary_path,
            runtime_path,
            settings,
            env: Vec::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Program and argument vector for a request
    pub fn build_command(&self, request: &ExecutionRequest) -> Result<(PathBuf, Vec<String>)> {
        let binary = self.binary_path.as_ref().ok_or_else(|| {
            RunnerError::configuration("Binary path must be resolved before running an operation")
        })?;

        let mut args = Vec::with_capacity(request.flags.len() + 4);
        let program = match &request.target {
            ExecutionTarget::Local => binary.clone(),
            ExecutionTarget::Container(container_id) => {
                args.push("exec".to_string());
                args.push(container_id.clone());
                args.push(mounted_binary_path(binary)?);
                self.runtime_path.clone()
            }
        };

        args.push(request.operation.clone());
        args.extend(request.flags.iter().cloned());

        Ok((program, args))
    }

    /// Run one operation to completion, classifying its output as it streams
    pub async fn execute_operation(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        let (program, args) = self.build_command(request)?;

        info!(
            operation = %request.operation,
            target = %request.target,
            "Running operation"
        );
        debug!(program = %program.display(), args = ?args, "Spawning");

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| spawn_error(&program, &e.to_string(), &[]))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let capture = match (stdout, stderr) {
            (Some(stdout), Some(stderr)) => self.consume(stdout, stderr).await,
            _ => {
                return Err(spawn_error(&program, "Failed to capture process output", &[]));
            }
        };

        let status = child
            .wait()
            .await
            .map_err(|e| spawn_error(&program, &e.to_string(), &capture.fatal))?;
        let exit_code = exit_code(status);

        let result = ExecutionResult {
            output: capture.stdout,
            error: capture.stderr,
            exit_code,
            fatal_lines: capture.fatal,
        };

        info!(
            operation = %request.operation,
            exit_code = result.exit_code,
            fatal_detected = result.fatal_detected(),
            "Operation completed"
        );

        Ok(result)
    }

    /// Drain both streams concurrently until each reaches end of file
    async fn consume<O, E>(&self, stdout: O, stderr: E) -> Capture
    where
        O: AsyncRead + Unpin,
        E: AsyncRead + Unpin,
    {
        let classifier = LineClassifier::new_with_max_length(
            self.settings.fatal_marker.clone(),
            self.settings.max_line_length,
        );
        let mut stdout_lines = FramedRead::new(stdout, classifier.clone());
        let mut stderr_lines = FramedRead::new(stderr, classifier);
        let mut host_stdout = tokio::io::stdout();
        let mut host_stderr = tokio::io::stderr();

        let mut capture = Capture::new(self.settings.echo_output);
        let mut stdout_done = false;
        let mut stderr_done = false;

        while !(stdout_done && stderr_done) {
            tokio::select! {
                line = stdout_lines.next(), if !stdout_done => match line {
                    Some(Ok(line)) => {
                        self.record(line, StreamKind::Stdout, &mut capture, &mut host_stdout).await;
                    }
                    Some(Err(e)) => {
                        warn!("Error reading stdout: {}", e);
                        stdout_done = true;
                    }
                    None => stdout_done = true,
                },
                line = stderr_lines.next(), if !stderr_done => match line {
                    Some(Ok(line)) => {
                        self.record(line, StreamKind::Stderr, &mut capture, &mut host_stderr).await;
                    }
                    Some(Err(e)) => {
                        warn!("Error reading stderr: {}", e);
                        stderr_done = true;
                    }
                    None => stderr_done = true,
                },
            }
        }

        capture
    }

    async fn record<W>(&self, line: Line, kind: StreamKind, capture: &mut Capture, echo: &mut W)
    where
        W: AsyncWrite + Unpin,
    {
        let rendered = line.render(&self.settings.error_prefix);

        if line.is_fatal() {
            let text = line.into_text();
            error!(stream = kind.as_str(), line = %text, "Fatal marker detected in output");
            capture.fatal.push(text);
        }

        if capture.echo {
            if let Err(e) = echo_line(echo, &rendered).await {
                debug!(stream = kind.as_str(), error = %e, "Echo to host failed; no longer echoing");
                capture.echo = false;
            }
        }

        match kind {
            StreamKind::Stdout => capture.stdout.push_str(&rendered),
            StreamKind::Stderr => capture.stderr.push_str(&rendered),
        }
    }
}

async fn echo_line<W>(echo: &mut W, rendered: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    echo.write_all(rendered.as_bytes()).await?;
    echo.flush().await
}

/// Path of the binary inside the main container
pub fn mounted_binary_path(binary: &Path) -> Result<String> {
    let name = binary.file_name().ok_or_else(|| {
        RunnerError::configuration(format!("Binary path {} has no file name", binary.display()))
    })?;

    Ok(format!("{}/{}", BINARY_MOUNT_POINT, name.to_string_lossy()))
}

fn spawn_error(program: &Path, cause: &str, fatal: &[String]) -> RunnerError {
    let message = if fatal.is_empty() {
        cause.to_string()
    } else {
        format!("{}; fatal output: {}", cause, fatal.join("\n"))
    };

    RunnerError::Spawn {
        program: program.display().to_string(),
        message,
    }
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}
