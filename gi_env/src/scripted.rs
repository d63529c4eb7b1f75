//! Scripted implementation of CommandRunner for deterministic tests.

use crate::error::EnvError;
use crate::runner::CommandRunner;
use crate::types::{CommandOutput, CommandSpec};
use std::sync::Mutex;

type Handler = Box<dyn Fn(&CommandSpec) -> Result<CommandOutput, EnvError> + Send + Sync>;

/// Runner that never spawns anything.
///
/// Every call is recorded; the answer comes from a handler closure, which
/// may also emulate side effects (e.g. create the file a tool would write).
pub struct ScriptedRunner {
    handler: Handler,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    /// A runner answering every command with exit status 0.
    pub fn succeeding() -> Self {
        Self::with_handler(|_| Ok(CommandOutput::ok()))
    }

    /// A runner answering with the given handler.
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&CommandSpec) -> Result<CommandOutput, EnvError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A runner that fails (status 1) every command whose program is `program`.
    pub fn failing_program(program: &str) -> Self {
        let program = program.to_string();
        Self::with_handler(move |spec| {
            if spec.program == program {
                Ok(CommandOutput::failed(1, format!("{} failed", program)))
            } else {
                Ok(CommandOutput::ok())
            }
        })
    }

    /// All commands seen so far, in order.
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    /// Number of commands seen so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Programs invoked, in order.
    pub fn programs(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.program).collect()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, EnvError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(spec.clone());
        }
        (self.handler)(spec)
    }
}
