//! Error taxonomy of the orchestrator.

use crate::state::SimState;
use gi_env::EnvError;
use thiserror::Error;

/// Errors raised by orbit setup, body resolution and lifecycle transitions.
///
/// Lifecycle operations that fail also move the simulation into the
/// absorbing [`SimState::Error`] state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrchestratorError {
    /// An external tool (compile, displace, merge, attribute write, submit)
    /// exited with a non-zero status
    #[error("External command failed (status {status}): {command}: {output}")]
    ExternalCommandFailure {
        command: String,
        status: i32,
        output: String,
    },

    /// An external tool exceeded its timeout
    #[error("External command timed out after {timeout_ms}ms: {command}")]
    CommandTimeout { command: String, timeout_ms: u64 },

    /// Operation invoked from an incompatible derived state
    #[error("Cannot {operation} from state '{from}'")]
    InvalidStateTransition {
        from: SimState,
        operation: &'static str,
    },

    /// The catalog holds no consistent target/impactor pair
    #[error("No matching bodies: {0}")]
    NoMatchingBodies(String),

    /// Out-of-domain physical input
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl OrchestratorError {
    /// Creates an invalid parameter error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    /// Creates an I/O error that names the path involved.
    pub fn io(path: impl AsRef<std::path::Path>, err: std::io::Error) -> Self {
        Self::Io(format!("{}: {}", path.as_ref().display(), err))
    }
}

impl From<EnvError> for OrchestratorError {
    fn from(err: EnvError) -> Self {
        match err {
            EnvError::Timeout {
                command,
                timeout_ms,
            } => Self::CommandTimeout {
                command,
                timeout_ms,
            },
            other => Self::Io(other.to_string()),
        }
    }
}

impl From<std::io::Error> for OrchestratorError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<sled::Error> for OrchestratorError {
    fn from(err: sled::Error) -> Self {
        Self::Catalog(err.to_string())
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_maps_to_distinct_kind() {
        let err: OrchestratorError = EnvError::timeout("make sph", 1500).into();
        assert_eq!(
            err,
            OrchestratorError::CommandTimeout {
                command: "make sph".to_string(),
                timeout_ms: 1500,
            }
        );
    }

    #[test]
    fn test_spawn_maps_to_io() {
        let err: OrchestratorError = EnvError::SpawnError("nope".to_string()).into();
        assert!(matches!(err, OrchestratorError::Io(_)));
    }

    #[test]
    fn test_transition_message() {
        let err = OrchestratorError::InvalidStateTransition {
            from: SimState::Unprepared,
            operation: "submit",
        };
        assert_eq!(err.to_string(), "Cannot submit from state 'unprepared'");
    }
}
