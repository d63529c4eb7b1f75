//! Lifecycle states and their derivation from the filesystem.
//!
//! # Core Concept
//!
//! The filesystem is the only durable record of a simulation. Whether a
//! simulation is `prepared` is re-derived from its working directory on
//! every query, so a restarted orchestrator picks up where it left off.
//! Everything after submission (job name and id, the last scheduler report,
//! finalization) is kept in a [`JobRecord`] next to the simulation files.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use std::str::FromStr;
use tracing::warn;

/// Job record file, relative to the working directory.
pub const JOB_RECORD: &str = "job.json";

/// Lifecycle state of one simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimState {
    Unprepared,
    Prepared,
    Submitted,
    Queued,
    Running,
    Finished,
    Finalized,
    /// Absorbing; only `reset` leaves it
    Error,
}

impl SimState {
    /// What driving the simulation does next.
    pub fn next_action(&self) -> NextAction {
        match self {
            SimState::Unprepared => NextAction::Prepare,
            SimState::Prepared => NextAction::Submit,
            SimState::Running => NextAction::Postprocess,
            SimState::Finished => NextAction::Finalize,
            SimState::Submitted | SimState::Queued | SimState::Finalized | SimState::Error => {
                NextAction::Nothing
            }
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, SimState::Error)
    }

    /// True once the job has been handed to the scheduler.
    pub fn is_submitted(&self) -> bool {
        matches!(
            self,
            SimState::Submitted
                | SimState::Queued
                | SimState::Running
                | SimState::Finished
                | SimState::Finalized
        )
    }
}

impl fmt::Display for SimState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SimState::Unprepared => "unprepared",
            SimState::Prepared => "prepared",
            SimState::Submitted => "submitted",
            SimState::Queued => "queued",
            SimState::Running => "running",
            SimState::Finished => "finished",
            SimState::Finalized => "finalized",
            SimState::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// The action implied by a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    Prepare,
    Submit,
    Postprocess,
    Finalize,
    Nothing,
}

/// Status reported by the batch scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerStatus {
    Queued,
    Run,
    Finished,
}

impl SchedulerStatus {
    pub fn state(&self) -> SimState {
        match self {
            SchedulerStatus::Queued => SimState::Queued,
            SchedulerStatus::Run => SimState::Running,
            SchedulerStatus::Finished => SimState::Finished,
        }
    }
}

impl FromStr for SchedulerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(SchedulerStatus::Queued),
            "run" => Ok(SchedulerStatus::Run),
            "finished" => Ok(SchedulerStatus::Finished),
            other => Err(format!(
                "unknown scheduler status '{}' (expected queued, run or finished)",
                other
            )),
        }
    }
}

/// Derives `prepared` or `unprepared` from a working directory.
///
/// Prepared means the directory exists and holds every file in
/// `required_files` (matched by file name).
pub fn derive_state<S: AsRef<str>>(dir: &Path, required_files: &[S]) -> SimState {
    if !dir.is_dir() {
        return SimState::Unprepared;
    }
    let complete = required_files
        .iter()
        .all(|name| dir.join(name.as_ref()).exists());
    if complete {
        SimState::Prepared
    } else {
        SimState::Unprepared
    }
}

/// What the scheduler side of the lifecycle left in a working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub state: SimState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

impl JobRecord {
    /// Reads the record of `dir`.
    ///
    /// A missing record is `None`; an unreadable one is logged and treated
    /// as missing.
    pub fn load(dir: &Path) -> Option<Self> {
        let path = dir.join(JOB_RECORD);
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Cannot read {}: {}", path.display(), e);
                return None;
            }
        };
        match serde_json::from_str(&json) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Ignoring malformed {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Writes the record into `dir`, replacing any previous one.
    pub fn store(&self, dir: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(dir.join(JOB_RECORD))?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    /// Deletes the record of `dir`, if any.
    pub fn remove(dir: &Path) -> io::Result<()> {
        match fs::remove_file(dir.join(JOB_RECORD)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}
