//! Giant Impact Environment Abstraction Layer
//!
//! This crate isolates every side effect the orchestrator delegates to the
//! outside world: particle-file tools, the build step for the integrator
//! binary and the batch scheduler's submission command.
//!
//! # Core Concept: Typed Commands
//!
//! External programs are described by a [`CommandSpec`] (program, argument
//! list, working directory, timeout) and executed through a
//! [`CommandRunner`]. No shell is ever involved, so arguments are never
//! re-tokenized or interpolated.
//!
//! - **Production**: [`TokioRunner`] spawns real processes and enforces timeouts
//! - **Scripted**: [`ScriptedRunner`] records commands and answers them from a
//!   handler, for deterministic tests of the lifecycle
//!
//! # Example
//!
//! ```ignore
//! use gi_env::{CommandRunner, CommandSpec, TokioRunner};
//!
//! let runner = TokioRunner::new()?;
//! let out = runner.run(&CommandSpec::new("make").arg("sph").cwd("/src"))?;
//! assert!(out.success());
//! ```

mod error;
mod runner;
mod scripted;
mod tokio_impl;
mod types;

pub use error::EnvError;
pub use runner::CommandRunner;
pub use scripted::ScriptedRunner;
pub use tokio_impl::TokioRunner;
pub use types::{CommandOutput, CommandSpec};
