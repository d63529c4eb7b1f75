//! Giant Impact Admin - operator surface of the orchestrator
//!
//! Thin layer over [`gi_core`]: command handlers that the `gi-admin` binary
//! dispatches to, and the JSON status report.
//!
//! # Usage
//!
//! ```ignore
//! use gi_admin::commands;
//! use gi_env::TokioRunner;
//!
//! let runner = TokioRunner::new()?;
//! let mut set = commands::load_set("giset.json".as_ref())?;
//! for (key, state) in commands::step(&mut set, &runner, None)? {
//!     println!("{} {}", key, state);
//! }
//! ```

pub mod commands;
mod error;
pub mod report;

pub use commands::{OrbitQuery, Transition};
pub use error::{AdminError, Result};
pub use report::{SetReport, SimEntry};
