//! One invocation: setup, execution, cleanup
//!
//! Cleanup runs on every exit path. Errors from setup or execution are
//! returned after cleanup; a panic is caught, cleanup runs, and the panic is
//! resumed.

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{error, info, warn};

use crate::config::RunnerConfig;
use crate::container::{
    cleanup_all, CleanupReport, ContainerManager, ContainerRuntime, ExecutionRequest,
    ExecutionResult, ExecutionTarget, Executor, Session,
};
use crate::error::{Result, RunnerError};

/// Variable carrying the configured token into the binary's environment
pub const TOKEN_ENV: &str = "DOCKSIDE_TOKEN";

/// What an invocation produced
#[derive(Debug)]
pub struct InvocationOutcome {
    /// Results in execution order; stops at the first failure
    pub results: Vec<ExecutionResult>,
    pub cleanup: CleanupReport,
}

impl InvocationOutcome {
    /// Process exit code: the first failing operation's code, 1 when it only
    /// tripped the fatal marker, otherwise 0
    pub fn exit_code(&self) -> i32 {
        match self.results.iter().find(|r| r.is_failure()) {
            Some(result) if result.exit_code != 0 => result.exit_code,
            Some(_) => 1,
            None => 0,
        }
    }
}

pub struct Invocation {
    config: RunnerConfig,
    manager: ContainerManager,
    executor: Executor,
    session: Session,
}

impl Invocation {
    pub fn new(config: RunnerConfig, runtime: Arc<dyn ContainerRuntime>, workdir: PathBuf) -> Self {
        let manager = ContainerManager::new(runtime, config.binary_path.clone(), workdir);

        let mut executor = Executor::new(
            config.binary_path.clone(),
            config.resolve_runtime_path(),
            config.execution.clone(),
        );
        if let Some(ref token) = config.token {
            executor = executor.with_env(TOKEN_ENV, token.clone());
        }

        Self {
            config,
            manager,
            executor,
            session: Session::new(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Run every configured operation, then tear down
    pub async fn run(&mut self) -> Result<InvocationOutcome> {
        let primary = AssertUnwindSafe(self.setup_and_execute())
            .catch_unwind()
            .await;

        let cleanup = cleanup_all(
            &self.manager,
            &mut self.session,
            self.config.execution.stop_grace_seconds,
        )
        .await;
        if !cleanup.is_clean() {
            warn!(warnings = ?cleanup.warnings, "Cleanup finished with warnings");
        }

        match primary {
            Ok(Ok(results)) => Ok(InvocationOutcome { results, cleanup }),
            Ok(Err(e)) => {
                error!(code = e.code(), error = %e, "Invocation failed");
                Err(e)
            }
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    async fn setup_and_execute(&mut self) -> Result<Vec<ExecutionResult>> {
        self.check_token()?;
        self.setup().await?;
        self.execute().await
    }

    fn check_token(&self) -> Result<()> {
        let missing = self
            .config
            .token
            .as_deref()
            .map(|t| t.trim().is_empty())
            .unwrap_or(true);

        if self.config.require_token && missing {
            return Err(RunnerError::configuration("A token is required but none is configured"));
        }

        Ok(())
    }

    /// Network, then sidecar, then main container
    async fn setup(&mut self) -> Result<()> {
        let action = &self.config.action;
        let context = &self.config.context;

        if let Some(sidecar_image) = self.config.sidecar_image() {
            self.manager.create_network(&mut self.session).await?;
            self.manager
                .start_sidecar_container(&mut self.session, action, context, Some(sidecar_image))
                .await?;
        }

        self.manager
            .start_main_container(&mut self.session, action, context)
            .await?;

        Ok(())
    }

    async fn execute(&mut self) -> Result<Vec<ExecutionResult>> {
        let target = match self.session.main() {
            Some(main) => ExecutionTarget::Container(main.id.clone()),
            None => ExecutionTarget::Local,
        };

        let mut results = Vec::with_capacity(self.config.operations.len());
        for operation in &self.config.operations {
            let request = ExecutionRequest {
                operation: operation.name.clone(),
                flags: operation.flags.clone(),
                target: target.clone(),
            };

            let result = self.executor.execute_operation(&request).await?;
            let failed = result.is_failure();
            results.push(result);

            if failed {
                warn!(operation = %operation.name, "Operation failed; skipping the rest");
                break;
            }
        }

        info!(completed = results.len(), "Execution phase finished");
        Ok(results)
    }
}
