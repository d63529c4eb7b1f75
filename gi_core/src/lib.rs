//! Giant Impact Core - orchestration of two-body collision simulations
//!
//! This library turns a grid of impact parameters into ready-to-run N-body
//! simulations and tracks them through an external batch scheduler:
//! 1. **Orbit**: two-body conic setup from impact speed and angle ([`TwoBody`])
//! 2. **Bodies**: finest-resolution consistent target/impactor pair from a
//!    catalog of precomputed bodies ([`BodyResolver`], [`SledBodyCatalog`])
//! 3. **Lifecycle**: a per-simulation state machine re-derived from the
//!    filesystem on every query ([`Simulation`], [`SimulationSet`])

pub mod body;
pub mod catalog;
pub mod config;
pub mod constants;
pub mod error;
pub mod lifecycle;
pub mod orbit;
pub mod params;
pub mod predicate;
pub mod resolver;
pub mod simset;
pub mod state;

// Re-export key types for convenience
pub use body::Body;
pub use catalog::{BodyCatalog, MemoryCatalog, SledBodyCatalog};
pub use config::{SimSetConfig, SubmitArg, SubmitTemplate, ToolsConfig};
pub use error::{OrchestratorError, Result};
pub use lifecycle::{BinaryCache, DumpRecord, ImpactSetup, Simulation, TimeScales};
pub use orbit::{OrbitBranch, OrbitSolution, TwoBody, PARABOLIC_THRESHOLD};
pub use params::SimParams;
pub use predicate::{GridPoint, Predicate};
pub use resolver::{BodyPair, BodyRequest, BodyResolver};
pub use simset::SimulationSet;
pub use state::{derive_state, JobRecord, NextAction, SchedulerStatus, SimState, JOB_RECORD};
