//! Error types for the external-command abstraction.

use thiserror::Error;

/// Errors that can occur while running an external command.
///
/// A command that runs to completion with a non-zero exit status is *not*
/// an `EnvError`; the status is reported in [`crate::CommandOutput`] and the
/// caller decides what it means.
#[derive(Debug, Error)]
pub enum EnvError {
    /// The program could not be started (missing binary, bad cwd, ...)
    #[error("Spawn error: {0}")]
    SpawnError(String),

    /// Waiting for the process or collecting its output failed
    #[error("I/O error: {0}")]
    IoError(String),

    /// The runtime backing the runner could not be created
    #[error("Runtime error: {0}")]
    RuntimeError(String),

    /// Command exceeded its timeout and was killed
    #[error("Timeout after {timeout_ms}ms: {command}")]
    Timeout { command: String, timeout_ms: u64 },
}

impl EnvError {
    /// Creates a spawn error.
    pub fn spawn(command: impl std::fmt::Display, cause: impl std::fmt::Display) -> Self {
        Self::SpawnError(format!("{}: {}", command, cause))
    }

    /// Creates a timeout error.
    pub fn timeout(command: impl std::fmt::Display, timeout_ms: u64) -> Self {
        Self::Timeout {
            command: command.to_string(),
            timeout_ms,
        }
    }
}
