//! Command runner abstraction.

use crate::error::EnvError;
use crate::types::{CommandOutput, CommandSpec};

/// The central interface for running external programs.
///
/// # Implementations
///
/// - **Production**: `TokioRunner` - real processes with enforced timeouts
/// - **Scripted**: `ScriptedRunner` - recorded calls, canned answers
///
/// # Contract
///
/// `run` blocks until the command finishes. It returns `Ok` whenever the
/// program ran to completion, whatever its exit status; `Err` is reserved
/// for commands that could not be started or that timed out.
pub trait CommandRunner: Send + Sync {
    /// Runs the command and collects its output.
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, EnvError>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, EnvError> {
        (**self).run(spec)
    }
}

impl<R: CommandRunner + ?Sized> CommandRunner for Box<R> {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, EnvError> {
        (**self).run(spec)
    }
}
