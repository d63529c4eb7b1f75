//! Errors surfaced by the operator commands.

use gi_core::OrchestratorError;
use gi_env::EnvError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("No simulation with key '{0}' in this set")]
    UnknownKey(String),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error("Command runner: {0}")]
    Env(#[from] EnvError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, AdminError>;
