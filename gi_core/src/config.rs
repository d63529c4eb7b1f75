//! Simulation set configuration.
//!
//! Loaded from JSON. Every field except the parameter grid has a default,
//! so a minimal file only lists the grid, the catalog and the directories.

use crate::constants::GRAV_CONST;
use crate::error::{OrchestratorError, Result};
use crate::predicate::Predicate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// SUBMISSION TEMPLATE
// =============================================================================

/// One argument of the submission command.
///
/// Placeholders replace a whole argument; nothing is spliced into strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SubmitArg {
    Literal(String),
    /// `$NOCPUS`
    Cpus,
    /// `$SIMNAME`
    JobName,
    /// `$BINARY`
    Binary,
    /// `$SAVETIME`
    SaveTime,
    /// `$STOPTIME`
    StopTime,
    /// `$RUNARGS` (expands to zero or more arguments)
    RunArgs,
}

impl From<String> for SubmitArg {
    fn from(s: String) -> Self {
        match s.as_str() {
            "$NOCPUS" => SubmitArg::Cpus,
            "$SIMNAME" => SubmitArg::JobName,
            "$BINARY" => SubmitArg::Binary,
            "$SAVETIME" => SubmitArg::SaveTime,
            "$STOPTIME" => SubmitArg::StopTime,
            "$RUNARGS" => SubmitArg::RunArgs,
            _ => SubmitArg::Literal(s),
        }
    }
}

impl From<SubmitArg> for String {
    fn from(arg: SubmitArg) -> Self {
        arg.to_string()
    }
}

impl fmt::Display for SubmitArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitArg::Literal(s) => write!(f, "{}", s),
            SubmitArg::Cpus => write!(f, "$NOCPUS"),
            SubmitArg::JobName => write!(f, "$SIMNAME"),
            SubmitArg::Binary => write!(f, "$BINARY"),
            SubmitArg::SaveTime => write!(f, "$SAVETIME"),
            SubmitArg::StopTime => write!(f, "$STOPTIME"),
            SubmitArg::RunArgs => write!(f, "$RUNARGS"),
        }
    }
}

/// Values substituted into a [`SubmitTemplate`].
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitValues<'a> {
    pub cpus: u32,
    pub job_name: &'a str,
    pub binary: &'a str,
    pub save_time: f64,
    pub stop_time: f64,
    pub run_args: &'a [String],
}

/// Batch scheduler submission command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitTemplate {
    pub program: String,
    #[serde(default)]
    pub args: Vec<SubmitArg>,
}

impl SubmitTemplate {
    /// Builds the concrete argument list.
    pub fn render(&self, values: &SubmitValues<'_>) -> Vec<String> {
        let mut out = Vec::with_capacity(self.args.len());
        for arg in &self.args {
            match arg {
                SubmitArg::Literal(s) => out.push(s.clone()),
                SubmitArg::Cpus => out.push(values.cpus.to_string()),
                SubmitArg::JobName => out.push(values.job_name.to_string()),
                SubmitArg::Binary => out.push(values.binary.to_string()),
                SubmitArg::SaveTime => out.push(values.save_time.to_string()),
                SubmitArg::StopTime => out.push(values.stop_time.to_string()),
                SubmitArg::RunArgs => out.extend(values.run_args.iter().cloned()),
            }
        }
        out
    }
}

impl Default for SubmitTemplate {
    fn default() -> Self {
        let args = ["-N", "$SIMNAME", "-pe", "smp", "$NOCPUS", "-cwd", "$BINARY", "$SAVETIME", "$STOPTIME", "$RUNARGS"];
        Self {
            program: "qsub".to_string(),
            args: args.iter().map(|a| SubmitArg::from(a.to_string())).collect(),
        }
    }
}

// =============================================================================
// EXTERNAL TOOLS
// =============================================================================

/// Particle-file tools and build settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Shifts a particle file by a position and velocity
    pub displace: String,
    /// Merges two particle files
    pub combine: String,
    /// Writes a file attribute
    pub write_attr: String,
    /// Reads a file attribute
    pub read_attr: String,
    /// Build tool for the integrator binary
    pub make: String,
    /// Particle file extension
    pub extension: String,
    /// Added to impactor particle ids to keep them distinct
    pub impactor_id_offset: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            displace: "h5part_displace".to_string(),
            combine: "h5part_combine".to_string(),
            write_attr: "h5part_writeattr".to_string(),
            read_attr: "h5part_readattr".to_string(),
            make: "make".to_string(),
            extension: "h5part".to_string(),
            impactor_id_offset: 2_000_000,
        }
    }
}

// =============================================================================
// SIMULATION SET
// =============================================================================

/// Configuration shared by every simulation of a set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimSetConfig {
    /// Set name, prefix of job names
    pub name: String,
    /// Directory holding the `sim_<key>` directories
    pub base_dir: PathBuf,
    /// Orchestrator log file (stderr when unset)
    pub log_file: Option<PathBuf>,

    /// Sled body catalog
    pub bodies_db: PathBuf,
    /// Relative tolerance used by the body resolver
    pub body_tolerance: f64,
    /// Body temperature [K]
    pub temperature: f64,
    /// Gravitational constant
    pub grav_const: f64,
    /// Initial separation in contact radii
    pub rel_sep: f64,

    /// Target masses [Earth masses]
    pub target_masses: Vec<f64>,
    /// Impactor masses [Earth masses]
    pub impactor_masses: Vec<f64>,
    /// Impact angles [deg]
    pub impact_angles: Vec<f64>,
    /// Impact velocities [escape velocities]
    pub velocities: Vec<f64>,
    /// Grid filter
    pub filter: Predicate,

    /// Files copied into every simulation directory
    pub aux_files: Vec<PathBuf>,
    /// Integrator binary name
    pub binary: String,
    /// Prebuilt binary; skips compilation when set
    pub binary_file: Option<PathBuf>,
    /// Source tree containing the build
    pub source_dir: PathBuf,
    /// Build target
    pub make_target: String,

    /// Extra attributes written to the initial-condition file
    pub attributes: Vec<(String, String)>,

    /// Stop time in time-scale units
    pub stop_scale: f64,
    /// Start-time rounding interval in time-scale units
    pub dump_scale: f64,
    /// Expected number of dumps
    pub dump_count: u32,

    pub cpus: u32,
    pub run_args: Vec<String>,
    pub submit: SubmitTemplate,

    pub tools: ToolsConfig,
    /// Applied to every external command (0 disables)
    pub command_timeout_secs: u64,
}

impl Default for SimSetConfig {
    fn default() -> Self {
        Self {
            name: "giset".to_string(),
            base_dir: PathBuf::from("sims"),
            log_file: None,
            bodies_db: PathBuf::from("bodies.db"),
            body_tolerance: 0.05,
            temperature: 0.0,
            grav_const: GRAV_CONST,
            rel_sep: 5.0,
            target_masses: Vec::new(),
            impactor_masses: Vec::new(),
            impact_angles: Vec::new(),
            velocities: Vec::new(),
            filter: Predicate::Always,
            aux_files: Vec::new(),
            binary: "sph".to_string(),
            binary_file: None,
            source_dir: PathBuf::from("src"),
            make_target: "sph".to_string(),
            attributes: Vec::new(),
            stop_scale: 100.0,
            dump_scale: 1.0,
            dump_count: 100,
            cpus: 8,
            run_args: Vec::new(),
            submit: SubmitTemplate::default(),
            tools: ToolsConfig::default(),
            command_timeout_secs: 3600,
        }
    }
}

impl SimSetConfig {
    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SimSetConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| OrchestratorError::io(path, e))?;
        Self::from_json_str(&text)
            .map_err(|e| OrchestratorError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("body_tolerance", self.body_tolerance),
            ("grav_const", self.grav_const),
            ("stop_scale", self.stop_scale),
            ("dump_scale", self.dump_scale),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(OrchestratorError::Config(format!("{} must be positive", name)));
            }
        }
        if !(self.rel_sep.is_finite() && self.rel_sep >= 1.0) {
            return Err(OrchestratorError::Config("rel_sep must be >= 1".to_string()));
        }
        if self.dump_count == 0 {
            return Err(OrchestratorError::Config("dump_count must be positive".to_string()));
        }
        if self.binary.is_empty() {
            return Err(OrchestratorError::Config("binary must be set".to_string()));
        }
        Ok(())
    }

    /// Timeout for external commands, if any.
    pub fn command_timeout(&self) -> Option<Duration> {
        (self.command_timeout_secs > 0).then(|| Duration::from_secs(self.command_timeout_secs))
    }

    /// Name of the merged initial-condition file.
    pub fn initial_file_name(&self) -> String {
        format!("initial.{}", self.tools.extension)
    }

    /// Files that must exist in a prepared simulation directory.
    pub fn required_files(&self) -> Vec<String> {
        let mut files: Vec<String> = self
            .aux_files
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect();
        files.push(self.binary.clone());
        files.push(self.initial_file_name());
        files
    }
}
