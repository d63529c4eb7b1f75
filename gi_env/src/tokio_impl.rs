//! Production implementation of CommandRunner using Tokio.

use crate::error::EnvError;
use crate::runner::CommandRunner;
use crate::types::{CommandOutput, CommandSpec};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};

/// Production runner backed by `tokio::process`.
///
/// The orchestrator is synchronous, so the runner owns a small
/// current-thread runtime and blocks on each command. Timed-out
/// children are killed (`kill_on_drop`). Must not be called from inside
/// another Tokio runtime.
pub struct TokioRunner {
    runtime: Runtime,

    /// Applied to specs that carry no timeout of their own
    default_timeout: Option<Duration>,
}

impl TokioRunner {
    /// Creates a new TokioRunner without a default timeout.
    pub fn new() -> Result<Self, EnvError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| EnvError::RuntimeError(e.to_string()))?;
        Ok(Self {
            runtime,
            default_timeout: None,
        })
    }

    /// Creates an Arc-wrapped runner for sharing.
    pub fn shared() -> Result<Arc<Self>, EnvError> {
        Ok(Arc::new(Self::new()?))
    }

    /// Sets the timeout used when a spec has none.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    async fn run_async(spec: &CommandSpec, timeout: Option<Duration>) -> Result<CommandOutput, EnvError> {
        let mut cmd = tokio::process::Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(|e| EnvError::spawn(spec, e))?;
        let wait = child.wait_with_output();

        let output = match timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| EnvError::timeout(spec, limit.as_millis() as u64))?,
            None => wait.await,
        }
        .map_err(|e| EnvError::IoError(format!("{}: {}", spec, e)))?;

        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

impl CommandRunner for TokioRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, EnvError> {
        let timeout = spec.timeout.or(self.default_timeout);
        self.runtime.block_on(Self::run_async(spec, timeout))
    }
}
