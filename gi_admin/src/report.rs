//! JSON status report of a simulation set.
//!
//! Written for operators and CI; one entry per simulation plus counts per state.

use gi_core::{SimState, Simulation, SimulationSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// One simulation in the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimEntry {
    pub key: String,
    pub state: SimState,
    pub dir: PathBuf,

    /// Target mass [Earth masses]
    pub mtar: f64,
    /// Impactor mass [Earth masses]
    pub mimp: f64,
    /// Impact angle [deg]
    pub impa: f64,
    /// Impact velocity [escape velocities]
    pub vimprel: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,

    /// Time scale [s], when the setup succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tscal: Option<f64>,
    /// Start time [s], when the setup succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t0: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl SimEntry {
    /// Snapshot of one simulation; re-derives its state first.
    pub fn capture(sim: &mut Simulation) -> Self {
        let state = sim.state();
        let params = sim.params();
        let times = sim.setup().map(|s| s.times);
        Self {
            key: params.key(),
            state,
            dir: sim.dir().to_path_buf(),
            mtar: params.mtar,
            mimp: params.mimp,
            impa: params.impa,
            vimprel: params.vimprel,
            job_id: sim.job_id().map(str::to_string),
            job_name: sim.job_name().map(str::to_string),
            tscal: times.map(|t| t.tscal),
            t0: times.map(|t| t.t0),
            last_error: sim.last_error().map(|e| e.to_string()),
        }
    }
}

/// Complete set report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetReport {
    /// Set name
    pub name: String,

    /// UNIX time of the snapshot [s]
    pub generated_at: u64,

    pub total: usize,

    /// Number of simulations per state
    pub counts: BTreeMap<String, usize>,

    /// Simulations in construction order
    pub simulations: Vec<SimEntry>,
}

impl SetReport {
    /// Snapshots every simulation of the set.
    pub fn collect(set: &mut SimulationSet) -> Self {
        let name = set.config().name.clone();
        let keys = set.keys().to_vec();

        let mut simulations = Vec::with_capacity(keys.len());
        for key in &keys {
            if let Some(sim) = set.get_mut(key) {
                simulations.push(SimEntry::capture(sim));
            }
        }

        let mut counts = BTreeMap::new();
        for entry in &simulations {
            *counts.entry(entry.state.to_string()).or_insert(0) += 1;
        }

        Self {
            name,
            generated_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            total: simulations.len(),
            counts,
            simulations,
        }
    }

    /// Number of simulations in `state`.
    pub fn count(&self, state: SimState) -> usize {
        self.counts.get(&state.to_string()).copied().unwrap_or(0)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &Path) -> std::io::Result<()> {
        let json = self.to_json()?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
