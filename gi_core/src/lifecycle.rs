//! The "LIFECYCLE" Engine - one simulation from setup to finalization
//!
//! # Core Concept
//!
//! ```text
//! unprepared -> prepared -> submitted -> queued -> running -> finished -> finalized
//!      \____________\___________\__________\_________\__________\----> error
//! ```
//!
//! Every operation first re-derives the state from the working directory
//! (see [`derive_state`] and [`JobRecord`]), so the in-memory state is only
//! a cache and a fresh process resumes a submitted job where the last one
//! left it. Errors are absorbing: once a simulation fails,
//! every operation except [`Simulation::reset`] returns `error` without
//! side effects.
//!
//! Side effects go through two channels: plain file copies use `std::fs`,
//! everything else (particle tools, the build, the scheduler) runs as a
//! [`CommandSpec`] through a [`CommandRunner`].

use crate::body::Body;
use crate::config::{SimSetConfig, SubmitValues};
use crate::constants::DEG_TO_RAD;
use crate::error::{OrchestratorError, Result};
use crate::orbit::{sci, OrbitSolution, TwoBody};
use crate::params::SimParams;
use crate::resolver::{BodyPair, BodyResolver};
use crate::state::{derive_state, JobRecord, NextAction, SchedulerStatus, SimState, JOB_RECORD};
use gi_env::{CommandOutput, CommandRunner, CommandSpec};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

/// Per-simulation event log, relative to the working directory.
pub const SETUP_LOG: &str = "setup.log";

/// Orbit diagnostic log, relative to the working directory.
pub const ORBIT_LOG: &str = "gi_setup.log";

// =============================================================================
// SETUP
// =============================================================================

/// Time scales derived from the orbit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeScales {
    /// Contact radius over escape speed [s]
    pub tscal: f64,
    /// Time from placement to contact (negative) [s]
    pub t_init: f64,
    /// Interval the start time is rounded to [s]
    pub tdump: f64,
    /// Start time: the last multiple of `tdump` not after `t_init` [s]
    pub t0: f64,
    /// Integration stop time [s]
    pub stop_time: f64,
    /// Dump interval handed to the integrator, whole minutes [s]
    pub save_time: f64,
}

impl TimeScales {
    pub fn new(tscal: f64, t_init: f64, config: &SimSetConfig) -> Self {
        let tdump = tscal * config.dump_scale;
        let t0 = t_init - t_init.rem_euclid(tdump);
        let stop_time = tscal * config.stop_scale;
        let save_time = (stop_time / (60.0 * f64::from(config.dump_count))).round() * 60.0;

        Self {
            tscal,
            t_init,
            tdump,
            t0,
            stop_time,
            save_time,
        }
    }
}

/// Everything computed before touching the filesystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactSetup {
    pub bodies: BodyPair,
    pub orbit: OrbitSolution,
    pub times: TimeScales,
}

impl ImpactSetup {
    /// Resolves the body pair and solves the orbit.
    ///
    /// Fails with `NoMatchingBodies` instead of solving with missing bodies.
    pub fn compute(params: &SimParams, bodies: &[Body]) -> Result<Self> {
        let config = &params.config;
        let resolver = BodyResolver::new(config.body_tolerance);
        let pair = resolver
            .select(bodies, params.target_request(), params.impactor_request())
            .ok_or_else(|| {
                OrchestratorError::NoMatchingBodies(format!(
                    "no consistent target/impactor pair for {}",
                    params.key()
                ))
            })?;

        let two_body = TwoBody::new(
            pair.target.mass,
            pair.impactor.mass,
            pair.target.radius,
            pair.impactor.radius,
            config.grav_const,
        )?;
        let v_impact = params.vimprel * two_body.escape_velocity();
        let orbit = two_body.solve(v_impact, params.impa * DEG_TO_RAD, config.rel_sep)?;
        let times = TimeScales::new(two_body.time_scale(), orbit.t_init, config);

        Ok(Self {
            bodies: pair,
            orbit,
            times,
        })
    }

    /// Attributes written into the initial-condition file, in order.
    pub fn attributes(&self, config: &SimSetConfig) -> Vec<(String, String)> {
        let mut attrs = config.attributes.clone();
        attrs.push(("time".to_string(), format!("{:e}", self.times.t0)));
        attrs.push(("gravconst".to_string(), format!("{:e}", config.grav_const)));
        attrs.push(("tscal".to_string(), format!("{:e}", self.times.tscal)));
        attrs
    }
}

// =============================================================================
// SUPPORT
// =============================================================================

/// Appends timestamped lines to `setup.log` once the directory exists.
#[derive(Debug, Clone)]
pub struct SetupLog {
    path: PathBuf,
}

impl SetupLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, msg: &str) {
        if msg.is_empty() {
            return;
        }
        debug!("{}: {}", self.path.display(), msg);

        let dir_exists = self.path.parent().map(Path::is_dir).unwrap_or(false);
        if !dir_exists {
            return;
        }
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| writeln!(f, "{}:   {}", stamp, msg));
        if let Err(e) = written {
            warn!("Cannot write {}: {}", self.path.display(), e);
        }
    }
}

/// Integrator binary shared by every simulation of a set.
///
/// Built at most once per cache; a configured `binary_file` bypasses it.
#[derive(Debug, Clone, Default)]
pub struct BinaryCache {
    path: Option<PathBuf>,
}

impl BinaryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The binary built so far, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn resolve(
        &mut self,
        runner: &dyn CommandRunner,
        config: &SimSetConfig,
        log: &SetupLog,
    ) -> Result<PathBuf> {
        if let Some(file) = &config.binary_file {
            return Ok(file.clone());
        }
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }

        let build = CommandSpec::new(&config.tools.make)
            .arg(&config.make_target)
            .cwd(&config.source_dir);
        run_checked(runner, build, config.command_timeout(), log)?;
        log.write("binary compiled");
        info!("Built {} in {}", config.binary, config.source_dir.display());

        let path = config.source_dir.join(&config.binary);
        self.path = Some(path.clone());
        Ok(path)
    }
}

/// Runs a command and turns a non-zero exit into `ExternalCommandFailure`.
fn run_checked(
    runner: &dyn CommandRunner,
    spec: CommandSpec,
    timeout: Option<Duration>,
    log: &SetupLog,
) -> Result<CommandOutput> {
    let spec = match timeout {
        Some(t) => spec.timeout(t),
        None => spec,
    };
    let command = spec.to_string();
    debug!("Running: {}", command);

    let output = runner.run(&spec)?;
    let text = output.combined();
    log.write(&text);

    if !output.success() {
        return Err(OrchestratorError::ExternalCommandFailure {
            command,
            status: output.status,
            output: text,
        });
    }
    Ok(output)
}

fn vector_arg(v: &Vector3<f64>) -> String {
    format!("[{},{},{}]", sci(v.x, 6), sci(v.y, 6), sci(v.z, 6))
}

/// A dump file and its simulation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DumpRecord {
    pub path: PathBuf,
    /// `None` when the time attribute could not be read
    pub time: Option<f64>,
}

// =============================================================================
// SIMULATION
// =============================================================================

/// One simulation and its lifecycle.
pub struct Simulation {
    params: SimParams,

    /// `base_dir/sim_<key>`
    dir: PathBuf,

    /// Body pair and orbit, or why they could not be determined
    setup: Result<ImpactSetup>,

    /// Cached state; see [`Simulation::state`]
    state: SimState,

    /// Set by `reset`: report `unprepared` until the next prepare
    redo: bool,

    job_id: Option<String>,
    job_name: Option<String>,
    last_error: Option<OrchestratorError>,

    log: SetupLog,
}

impl Simulation {
    /// Creates the simulation and resolves its setup against `bodies`.
    ///
    /// A setup failure (no matching bodies, invalid orbit) puts the
    /// simulation into `error` immediately.
    pub fn new(params: SimParams, bodies: &[Body]) -> Self {
        let dir = params.config.base_dir.join(format!("sim_{}", params.key()));
        let log = SetupLog::new(dir.join(SETUP_LOG));
        let setup = ImpactSetup::compute(&params, bodies);

        let mut sim = Self {
            params,
            dir,
            setup,
            state: SimState::Unprepared,
            redo: false,
            job_id: None,
            job_name: None,
            last_error: None,
            log,
        };

        if let Err(e) = &sim.setup {
            let e = e.clone();
            sim.fail(e);
        }
        sim.refresh();
        sim
    }

    pub fn key(&self) -> String {
        self.params.key()
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn setup(&self) -> Option<&ImpactSetup> {
        self.setup.as_ref().ok()
    }

    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    /// Scheduler job name, once submitted.
    pub fn job_name(&self) -> Option<&str> {
        self.job_name.as_deref()
    }

    /// The error that moved the simulation into `error`.
    pub fn last_error(&self) -> Option<&OrchestratorError> {
        self.last_error.as_ref()
    }

    /// State as of the last query, without touching the filesystem.
    pub fn cached_state(&self) -> SimState {
        self.state
    }

    /// Current state, re-derived from the working directory.
    pub fn state(&mut self) -> SimState {
        self.refresh()
    }

    fn config(&self) -> Arc<SimSetConfig> {
        Arc::clone(&self.params.config)
    }

    /// Reconciles the cached state with the filesystem.
    ///
    /// Missing files always mean `unprepared`. With complete files a job
    /// record left by an earlier process restores the submitted state it
    /// names; otherwise an `unprepared` cache is promoted to `prepared`.
    /// A pending reset ignores both.
    fn refresh(&mut self) -> SimState {
        if self.state.is_error() {
            return self.state;
        }
        let required = self.params.config.required_files();
        match derive_state(&self.dir, &required) {
            SimState::Prepared if self.redo => {}
            SimState::Prepared => match JobRecord::load(&self.dir) {
                Some(record) if record.state.is_submitted() && !self.state.is_submitted() => {
                    self.adopt(record)
                }
                _ => {
                    if self.state == SimState::Unprepared {
                        self.state = SimState::Prepared;
                    }
                }
            },
            _ => self.state = SimState::Unprepared,
        }
        self.state
    }

    fn adopt(&mut self, record: JobRecord) {
        self.state = record.state;
        if record.job_name.is_some() {
            self.job_name = record.job_name;
        }
        if record.job_id.is_some() {
            self.job_id = record.job_id;
        }
    }

    /// Writes the job record for the cached state.
    fn persist(&self) -> Result<()> {
        let record = JobRecord {
            state: self.state,
            job_name: self.job_name.clone(),
            job_id: self.job_id.clone(),
        };
        record
            .store(&self.dir)
            .map_err(|e| OrchestratorError::io(self.dir.join(JOB_RECORD), e))
    }

    /// Like `persist`, for updates that cannot fail the simulation.
    fn persist_or_warn(&self) {
        if !self.dir.is_dir() {
            return;
        }
        if let Err(e) = self.persist() {
            warn!("{}: {}", self.params.key(), e);
        }
    }

    /// Enters `error` and hands the error back for propagation.
    fn fail(&mut self, err: OrchestratorError) -> OrchestratorError {
        error!("{}: {}", self.params.key(), err);
        self.log.write(&format!("error: {}", err));
        self.state = SimState::Error;
        self.last_error = Some(err.clone());
        err
    }

    fn run(&self, runner: &dyn CommandRunner, spec: CommandSpec) -> Result<CommandOutput> {
        run_checked(runner, spec, self.params.config.command_timeout(), &self.log)
    }

    // -------------------------------------------------------------------------
    // Transitions
    // -------------------------------------------------------------------------

    /// unprepared -> prepared: builds the working directory.
    pub fn prepare(&mut self, runner: &dyn CommandRunner, cache: &mut BinaryCache) -> Result<SimState> {
        let state = self.refresh();
        if state.is_error() {
            return Ok(state);
        }
        if state != SimState::Unprepared {
            return Err(self.fail(OrchestratorError::InvalidStateTransition {
                from: state,
                operation: "prepare",
            }));
        }

        match self.build_directory(runner, cache) {
            Ok(()) => {
                self.redo = false;
                self.state = SimState::Prepared;
                self.log.write("prepared state");
                info!("{}: prepared in {}", self.params.key(), self.dir.display());
                Ok(self.state)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn build_directory(&self, runner: &dyn CommandRunner, cache: &mut BinaryCache) -> Result<()> {
        let setup = self.setup.as_ref().map_err(Clone::clone)?;
        let config = self.config();
        let dir = &self.dir;

        fs::create_dir_all(dir).map_err(|e| OrchestratorError::io(dir, e))?;

        for aux in &config.aux_files {
            let name = aux.file_name().ok_or_else(|| {
                OrchestratorError::Config(format!("auxiliary file {} has no file name", aux.display()))
            })?;
            fs::copy(aux, dir.join(name)).map_err(|e| OrchestratorError::io(aux, e))?;
        }
        self.log.write("auxiliary files copied");

        JobRecord::remove(dir).map_err(|e| OrchestratorError::io(dir, e))?;

        let initial = dir.join(config.initial_file_name());
        if initial.exists() {
            fs::remove_file(&initial).map_err(|e| OrchestratorError::io(&initial, e))?;
        }

        let orbit_log = dir.join(ORBIT_LOG);
        fs::write(&orbit_log, setup.orbit.log()).map_err(|e| OrchestratorError::io(&orbit_log, e))?;
        self.log.write("giant impact calculated");

        let ext = &config.tools.extension;
        let target_file = dir.join(format!("tarb.{}", ext));
        let impactor_file = dir.join(format!("impb.{}", ext));
        let orbit = &setup.orbit;

        self.stage_body(
            runner,
            &setup.bodies.target.file,
            &target_file,
            (&orbit.pos_target, &orbit.vel_target),
            None,
        )?;
        self.stage_body(
            runner,
            &setup.bodies.impactor.file,
            &impactor_file,
            (&orbit.pos_impactor, &orbit.vel_impactor),
            Some(config.tools.impactor_id_offset),
        )?;

        let combine = CommandSpec::new(&config.tools.combine)
            .arg("-a")
            .path_arg(&target_file)
            .arg("-b")
            .path_arg(&impactor_file)
            .arg("-o")
            .path_arg(&initial);
        self.run(runner, combine)?;

        for staged in [&target_file, &impactor_file] {
            fs::remove_file(staged).map_err(|e| OrchestratorError::io(staged, e))?;
        }

        for (key, value) in setup.attributes(&config) {
            let write = CommandSpec::new(&config.tools.write_attr)
                .arg("-i")
                .path_arg(&initial)
                .arg("-k")
                .arg(key)
                .arg("-v")
                .arg(value);
            self.run(runner, write)?;
        }

        let binary = cache.resolve(runner, &config, &self.log)?;
        let dest = dir.join(&config.binary);
        fs::copy(&binary, &dest).map_err(|e| OrchestratorError::io(&binary, e))?;

        Ok(())
    }

    /// Copies a body file and shifts it onto its initial orbit.
    fn stage_body(
        &self,
        runner: &dyn CommandRunner,
        source: &Path,
        staged: &Path,
        (pos, vel): (&Vector3<f64>, &Vector3<f64>),
        id_offset: Option<u64>,
    ) -> Result<()> {
        let config = &self.params.config;
        fs::copy(source, staged).map_err(|e| OrchestratorError::io(source, e))?;

        let mut displace = CommandSpec::new(&config.tools.displace)
            .arg("-i")
            .path_arg(staged)
            .arg("--pos")
            .arg(vector_arg(pos))
            .arg("--vel")
            .arg(vector_arg(vel));
        if let Some(offset) = id_offset {
            displace = displace.arg("--id").arg(offset.to_string());
        }
        self.run(runner, displace)?;
        Ok(())
    }

    /// prepared -> submitted: hands the job to the batch scheduler.
    ///
    /// From any other state this fails without running anything.
    pub fn submit(&mut self, runner: &dyn CommandRunner) -> Result<SimState> {
        let state = self.refresh();
        if state.is_error() {
            return Ok(state);
        }
        if state != SimState::Prepared {
            return Err(self.fail(OrchestratorError::InvalidStateTransition {
                from: state,
                operation: "submit",
            }));
        }
        let times = match &self.setup {
            Ok(setup) => setup.times,
            Err(e) => {
                let e = e.clone();
                return Err(self.fail(e));
            }
        };

        let config = self.config();
        let job_name = format!("{}_{}", config.name, self.params.key());
        self.log.write(&format!("tscal = {}", sci(times.tscal, 3)));
        self.log.write(&format!("tstop = {}", sci(times.stop_time, 3)));

        let args = config.submit.render(&SubmitValues {
            cpus: config.cpus,
            job_name: &job_name,
            binary: &config.binary,
            save_time: times.save_time,
            stop_time: times.stop_time,
            run_args: &config.run_args,
        });
        let spec = CommandSpec::new(&config.submit.program)
            .args(args)
            .cwd(&self.dir);

        if let Err(e) = self.run(runner, spec) {
            return Err(self.fail(e));
        }
        self.state = SimState::Submitted;
        self.log.write(&format!("job \"{}\" submitted", job_name));
        info!("{}: submitted as {}", self.params.key(), job_name);
        self.job_name = Some(job_name);
        match self.persist() {
            Ok(()) => Ok(self.state),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Applies a scheduler status report. Ignored in `error`.
    pub fn set_status(&mut self, status: SchedulerStatus) -> SimState {
        if self.state.is_error() {
            return self.state;
        }
        self.state = status.state();
        debug!("{}: scheduler reports {}", self.params.key(), self.state);
        self.persist_or_warn();
        self.state
    }

    /// Records the scheduler's job identifier.
    pub fn set_job_id(&mut self, id: impl Into<String>) {
        let id = id.into();
        self.log.write(&format!("scheduler set job id to {}", id));
        self.job_id = Some(id);
        if self.state.is_submitted() {
            self.persist_or_warn();
        }
    }

    /// Hook for running simulations. Does nothing yet.
    pub fn postprocess(&mut self) -> Result<SimState> {
        match self.refresh() {
            SimState::Error => Ok(SimState::Error),
            SimState::Running => Ok(SimState::Running),
            SimState::Finished => {
                let job = self.job_id.as_deref().unwrap_or("unknown");
                self.log.write(&format!("scheduler reported finished state, was job {}", job));
                Ok(SimState::Finished)
            }
            other => Err(self.fail(OrchestratorError::InvalidStateTransition {
                from: other,
                operation: "postprocess",
            })),
        }
    }

    /// finished -> finalized.
    pub fn finalize(&mut self) -> Result<SimState> {
        match self.refresh() {
            SimState::Error => Ok(SimState::Error),
            SimState::Finished => {
                self.state = SimState::Finalized;
                if let Err(e) = self.persist() {
                    return Err(self.fail(e));
                }
                self.log.write("finalized simulation");
                info!("{}: finalized", self.params.key());
                Ok(self.state)
            }
            other => Err(self.fail(OrchestratorError::InvalidStateTransition {
                from: other,
                operation: "finalize",
            })),
        }
    }

    /// Forces the simulation back to `unprepared`, clearing any error and
    /// the job record.
    pub fn reset(&mut self) -> SimState {
        self.state = SimState::Unprepared;
        self.redo = true;
        self.last_error = None;
        self.job_name = None;
        self.job_id = None;
        if let Err(e) = JobRecord::remove(&self.dir) {
            warn!("{}: cannot remove job record: {}", self.params.key(), e);
        }
        self.log.write("reset to unprepared");
        info!("{}: reset", self.params.key());
        self.state
    }

    /// Performs whatever the current state calls for.
    pub fn step(&mut self, runner: &dyn CommandRunner, cache: &mut BinaryCache) -> Result<SimState> {
        match self.refresh().next_action() {
            NextAction::Prepare => self.prepare(runner, cache),
            NextAction::Submit => self.submit(runner),
            NextAction::Postprocess => self.postprocess(),
            NextAction::Finalize => self.finalize(),
            NextAction::Nothing => Ok(self.state),
        }
    }

    // -------------------------------------------------------------------------
    // Output
    // -------------------------------------------------------------------------

    /// Dump files in the working directory, sorted by name, with their times.
    pub fn dumps(&self, runner: &dyn CommandRunner) -> Result<Vec<DumpRecord>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let suffix = format!(".{}", self.params.config.tools.extension);

        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(|e| OrchestratorError::io(&self.dir, e))? {
            let entry = entry.map_err(|e| OrchestratorError::io(&self.dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("dump") && name.ends_with(&suffix) {
                paths.push(entry.path());
            }
        }
        paths.sort();

        Ok(paths
            .into_iter()
            .map(|path| {
                let time = self.dump_time(runner, &path);
                DumpRecord { path, time }
            })
            .collect())
    }

    fn dump_time(&self, runner: &dyn CommandRunner, path: &Path) -> Option<f64> {
        let config = &self.params.config;
        let mut spec = CommandSpec::new(&config.tools.read_attr)
            .arg("-k")
            .arg("time")
            .arg("-i")
            .path_arg(path);
        if let Some(t) = config.command_timeout() {
            spec = spec.timeout(t);
        }

        match runner.run(&spec) {
            Ok(out) if out.success() => out
                .stdout
                .split_whitespace()
                .nth(1)
                .and_then(|s| s.parse::<f64>().ok())
                .filter(|t| t.is_finite()),
            Ok(out) => {
                warn!("No time attribute in {}: {}", path.display(), out.combined());
                None
            }
            Err(e) => {
                warn!("Cannot read time of {}: {}", path.display(), e);
                None
            }
        }
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("key", &self.params.key())
            .field("dir", &self.dir)
            .field("state", &self.state)
            .field("job_id", &self.job_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{EARTH_MASS, EARTH_RADIUS};
    use crate::predicate::GridPoint;
    use approx::assert_relative_eq;
    use gi_env::{EnvError, ScriptedRunner};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    struct Fixture {
        root: TempDir,
        config: Arc<SimSetConfig>,
        bodies: Vec<Body>,
    }

    fn body(name: &str, mass: f64, radius: f64, root: &Path) -> Body {
        let file = root.join(format!("{}.h5part", name));
        fs::write(&file, name).unwrap();
        Body {
            name: name.to_string(),
            mass,
            radius,
            smoothing_length: 1.0e7,
            temperature: 0.0,
            file,
            composition: BTreeMap::new(),
        }
    }

    fn fixture_with(edit: impl FnOnce(&mut SimSetConfig, &Path)) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let path = root.path();
        fs::write(path.join("eos.tab"), "eos").unwrap();
        fs::write(path.join("sph"), "#!/bin/sh\n").unwrap();

        let mut config = SimSetConfig {
            name: "test".to_string(),
            base_dir: path.join("sims"),
            aux_files: vec![path.join("eos.tab")],
            binary_file: Some(path.join("sph")),
            cpus: 4,
            run_args: vec!["--restart".to_string()],
            ..SimSetConfig::default()
        };
        edit(&mut config, path);

        let bodies = vec![
            body("earth", EARTH_MASS, EARTH_RADIUS, path),
            body("theia", 0.1 * EARTH_MASS, 0.5 * EARTH_RADIUS, path),
        ];
        Fixture {
            root,
            config: Arc::new(config),
            bodies,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(|_, _| {})
    }

    impl Fixture {
        fn sim(&self, impa: f64) -> Simulation {
            let point = GridPoint {
                mtar: 1.0,
                mimp: 0.1,
                impa,
                vimprel: 1.1,
            };
            Simulation::new(SimParams::new(point, Arc::clone(&self.config)), &self.bodies)
        }
    }

    /// Emulates the particle tools: the merge writes its output file.
    fn tool_runner() -> ScriptedRunner {
        ScriptedRunner::with_handler(|spec| {
            if spec.program == "h5part_combine" {
                if let Some(out) = spec.flag_value("-o") {
                    fs::write(out, "merged").map_err(|e| EnvError::IoError(e.to_string()))?;
                }
            }
            Ok(CommandOutput::ok())
        })
    }

    #[test]
    fn test_full_lifecycle() {
        let fx = fixture();
        let runner = tool_runner();
        let mut cache = BinaryCache::new();
        let mut sim = fx.sim(30.0);

        assert_eq!(sim.state(), SimState::Unprepared);
        assert_eq!(sim.prepare(&runner, &mut cache).unwrap(), SimState::Prepared);

        let dir = sim.dir().to_path_buf();
        for file in ["eos.tab", "sph", "initial.h5part", SETUP_LOG, ORBIT_LOG] {
            assert!(dir.join(file).exists(), "{} missing", file);
        }
        assert!(!dir.join("tarb.h5part").exists());
        assert!(!dir.join("impb.h5part").exists());
        assert!(fs::read_to_string(dir.join(ORBIT_LOG)).unwrap().contains("vinf"));

        assert_eq!(
            runner.programs(),
            vec![
                "h5part_displace",
                "h5part_displace",
                "h5part_combine",
                "h5part_writeattr",
                "h5part_writeattr",
                "h5part_writeattr",
            ]
        );
        let calls = runner.calls();
        assert_eq!(calls[0].flag_value("--id"), None);
        assert_eq!(calls[1].flag_value("--id"), Some("2000000"));
        assert_eq!(calls[5].flag_value("-k"), Some("tscal"));

        assert_eq!(sim.submit(&runner).unwrap(), SimState::Submitted);
        let submit = runner.calls().pop().unwrap();
        assert_eq!(submit.program, "qsub");
        assert_eq!(submit.cwd.as_deref(), Some(dir.as_path()));
        assert_eq!(submit.flag_value("-N"), Some(format!("test_{}", sim.key()).as_str()));
        assert_eq!(submit.flag_value("smp"), Some("4"));
        assert_eq!(submit.args.last().map(String::as_str), Some("--restart"));

        sim.set_job_id("4711");
        assert_eq!(sim.set_status(SchedulerStatus::Queued), SimState::Queued);
        assert_eq!(sim.step(&runner, &mut cache).unwrap(), SimState::Queued);
        assert_eq!(sim.set_status(SchedulerStatus::Run), SimState::Running);
        assert_eq!(sim.step(&runner, &mut cache).unwrap(), SimState::Running);
        assert_eq!(sim.set_status(SchedulerStatus::Finished), SimState::Finished);
        assert_eq!(sim.step(&runner, &mut cache).unwrap(), SimState::Finalized);

        let log = fs::read_to_string(dir.join(SETUP_LOG)).unwrap();
        assert!(log.contains("prepared state"));
        assert!(log.contains("submitted"));
        assert!(log.contains("job id to 4711"));
        assert!(log.contains("finalized simulation"));
    }

    #[test]
    fn test_deleted_directory_rederived_unprepared() {
        let fx = fixture();
        let runner = tool_runner();
        let mut sim = fx.sim(30.0);

        sim.prepare(&runner, &mut BinaryCache::new()).unwrap();
        assert_eq!(sim.submit(&runner).unwrap(), SimState::Submitted);

        fs::remove_dir_all(sim.dir()).unwrap();
        assert_eq!(sim.state(), SimState::Unprepared);
    }

    #[test]
    fn test_submit_from_unprepared_runs_nothing() {
        let fx = fixture();
        let runner = ScriptedRunner::succeeding();
        let mut sim = fx.sim(30.0);

        let err = sim.submit(&runner).unwrap_err();
        assert_eq!(
            err,
            OrchestratorError::InvalidStateTransition {
                from: SimState::Unprepared,
                operation: "submit",
            }
        );
        assert_eq!(runner.call_count(), 0);
        assert_eq!(sim.state(), SimState::Error);

        // absorbing: further operations are silent no-ops
        assert_eq!(sim.submit(&runner).unwrap(), SimState::Error);
        assert_eq!(sim.prepare(&runner, &mut BinaryCache::new()).unwrap(), SimState::Error);
        assert_eq!(runner.call_count(), 0);
    }

    #[test]
    fn test_tool_failure_enters_error() {
        let fx = fixture();
        let runner = ScriptedRunner::failing_program("h5part_displace");
        let mut sim = fx.sim(30.0);

        let err = sim.prepare(&runner, &mut BinaryCache::new()).unwrap_err();
        match &err {
            OrchestratorError::ExternalCommandFailure { command, status, .. } => {
                assert!(command.starts_with("h5part_displace -i"));
                assert_eq!(*status, 1);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(runner.call_count(), 1);
        assert_eq!(sim.last_error(), Some(&err));
        assert_eq!(sim.set_status(SchedulerStatus::Run), SimState::Error);

        let log = fs::read_to_string(sim.dir().join(SETUP_LOG)).unwrap();
        assert!(log.contains("error: External command failed"));

        assert_eq!(sim.reset(), SimState::Unprepared);
        assert_eq!(sim.last_error(), None);
    }

    #[test]
    fn test_no_matching_bodies_is_an_error() {
        let fx = fixture();
        let runner = ScriptedRunner::succeeding();
        let point = GridPoint {
            mtar: 1.0,
            mimp: 0.3,
            impa: 30.0,
            vimprel: 1.1,
        };
        let mut sim = Simulation::new(SimParams::new(point, Arc::clone(&fx.config)), &fx.bodies);

        assert_eq!(sim.state(), SimState::Error);
        assert!(matches!(sim.last_error(), Some(OrchestratorError::NoMatchingBodies(_))));
        assert!(sim.setup().is_none());

        assert_eq!(sim.step(&runner, &mut BinaryCache::new()).unwrap(), SimState::Error);
        assert_eq!(runner.call_count(), 0);
        assert!(!sim.dir().exists());
    }

    #[test]
    fn test_restart_rederives_prepared() {
        let fx = fixture();
        let runner = tool_runner();
        let mut sim = fx.sim(30.0);
        sim.prepare(&runner, &mut BinaryCache::new()).unwrap();

        let mut again = fx.sim(30.0);
        assert_eq!(again.state(), SimState::Prepared);
        assert_eq!(again.step(&runner, &mut BinaryCache::new()).unwrap(), SimState::Submitted);
    }

    #[test]
    fn test_restart_resumes_submitted_job() {
        let fx = fixture();
        let runner = tool_runner();
        let mut sim = fx.sim(30.0);
        sim.prepare(&runner, &mut BinaryCache::new()).unwrap();
        sim.submit(&runner).unwrap();
        sim.set_job_id("4711");
        let submits = runner.call_count();

        let mut again = fx.sim(30.0);
        assert_eq!(again.state(), SimState::Submitted);
        assert_eq!(again.job_id(), Some("4711"));
        assert_eq!(again.job_name(), sim.job_name());
        assert_eq!(again.step(&runner, &mut BinaryCache::new()).unwrap(), SimState::Submitted);
        assert_eq!(runner.call_count(), submits);

        assert_eq!(again.set_status(SchedulerStatus::Finished), SimState::Finished);

        // finalize from a fresh process
        let mut third = fx.sim(30.0);
        assert_eq!(third.state(), SimState::Finished);
        assert_eq!(third.finalize().unwrap(), SimState::Finalized);

        let mut fourth = fx.sim(30.0);
        assert_eq!(fourth.state(), SimState::Finalized);
        assert_eq!(fourth.step(&runner, &mut BinaryCache::new()).unwrap(), SimState::Finalized);
        assert_eq!(runner.call_count(), submits);
        assert_eq!(fourth.job_id(), Some("4711"));
    }

    #[test]
    fn test_reset_clears_job_record() {
        let fx = fixture();
        let runner = tool_runner();
        let mut sim = fx.sim(30.0);
        sim.prepare(&runner, &mut BinaryCache::new()).unwrap();
        sim.submit(&runner).unwrap();
        assert!(sim.dir().join(JOB_RECORD).exists());

        sim.reset();
        assert!(!sim.dir().join(JOB_RECORD).exists());
        assert_eq!(sim.job_name(), None);

        let mut again = fx.sim(30.0);
        assert_eq!(again.state(), SimState::Prepared);
    }

    #[test]
    fn test_reset_forces_redo() {
        let fx = fixture();
        let runner = tool_runner();
        let mut cache = BinaryCache::new();
        let mut sim = fx.sim(30.0);
        sim.prepare(&runner, &mut cache).unwrap();
        sim.submit(&runner).unwrap();

        assert_eq!(sim.reset(), SimState::Unprepared);
        assert_eq!(sim.state(), SimState::Unprepared);

        let before = runner.call_count();
        assert_eq!(sim.step(&runner, &mut cache).unwrap(), SimState::Prepared);
        assert!(runner.call_count() > before);
        assert_eq!(sim.state(), SimState::Prepared);
    }

    #[test]
    fn test_prepare_twice_is_rejected() {
        let fx = fixture();
        let runner = tool_runner();
        let mut cache = BinaryCache::new();
        let mut sim = fx.sim(30.0);
        sim.prepare(&runner, &mut cache).unwrap();

        let err = sim.prepare(&runner, &mut cache).unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::InvalidStateTransition {
                from: SimState::Prepared,
                ..
            }
        ));
    }

    #[test]
    fn test_binary_built_once_per_cache() {
        let fx = fixture_with(|cfg, root| {
            let src = root.join("src");
            fs::create_dir_all(&src).unwrap();
            fs::write(src.join("sph"), "binary").unwrap();
            cfg.binary_file = None;
            cfg.source_dir = src;
        });
        let runner = tool_runner();
        let mut cache = BinaryCache::new();

        let mut a = fx.sim(30.0);
        let mut b = fx.sim(45.0);
        a.prepare(&runner, &mut cache).unwrap();
        b.prepare(&runner, &mut cache).unwrap();

        let builds: Vec<CommandSpec> = runner
            .calls()
            .into_iter()
            .filter(|c| c.program == "make")
            .collect();
        assert_eq!(builds.len(), 1);
        assert_eq!(builds[0].args, vec!["sph"]);
        assert_eq!(builds[0].cwd.as_deref(), Some(fx.root.path().join("src").as_path()));
        assert_eq!(cache.path(), Some(fx.root.path().join("src").join("sph").as_path()));
        assert_eq!(fs::read_to_string(b.dir().join("sph")).unwrap(), "binary");
    }

    #[test]
    fn test_failed_build_enters_error() {
        let fx = fixture_with(|cfg, root| {
            cfg.binary_file = None;
            cfg.source_dir = root.to_path_buf();
        });
        let runner = ScriptedRunner::with_handler(|spec| {
            if spec.program == "make" {
                return Ok(CommandOutput::failed(2, "no rule to make target"));
            }
            if let Some(out) = spec.flag_value("-o") {
                fs::write(out, "merged").map_err(|e| EnvError::IoError(e.to_string()))?;
            }
            Ok(CommandOutput::ok())
        });
        let mut cache = BinaryCache::new();
        let mut sim = fx.sim(30.0);

        assert!(sim.prepare(&runner, &mut cache).is_err());
        assert_eq!(sim.state(), SimState::Error);
        assert_eq!(cache.path(), None);
    }

    #[test]
    fn test_timeout_is_distinct_error() {
        let fx = fixture();
        let runner = ScriptedRunner::with_handler(|spec| {
            Err(EnvError::timeout(spec, spec.timeout.map(|t| t.as_millis() as u64).unwrap_or(0)))
        });
        let mut sim = fx.sim(30.0);

        let err = sim.prepare(&runner, &mut BinaryCache::new()).unwrap_err();
        assert!(matches!(err, OrchestratorError::CommandTimeout { timeout_ms: 3_600_000, .. }));
    }

    #[test]
    fn test_finalize_requires_finished() {
        let fx = fixture();
        let runner = tool_runner();
        let mut sim = fx.sim(30.0);
        sim.prepare(&runner, &mut BinaryCache::new()).unwrap();
        sim.submit(&runner).unwrap();

        assert!(sim.finalize().is_err());
        assert_eq!(sim.state(), SimState::Error);
        assert_eq!(sim.set_status(SchedulerStatus::Finished), SimState::Error);
    }

    #[test]
    fn test_dumps_with_times() {
        let fx = fixture();
        let mut sim = fx.sim(30.0);
        sim.prepare(&tool_runner(), &mut BinaryCache::new()).unwrap();
        for name in ["dump_0001.h5part", "dump_0000.h5part", "notes.txt", "dump_0002.txt"] {
            fs::write(sim.dir().join(name), "").unwrap();
        }

        let runner = ScriptedRunner::with_handler(|spec| {
            match spec.flag_value("-i") {
                Some(path) if path.ends_with("dump_0001.h5part") => {
                    Ok(CommandOutput::with_stdout("time 1.25e3\n"))
                }
                _ => Ok(CommandOutput::failed(1, "attribute not found")),
            }
        });
        let dumps = sim.dumps(&runner).unwrap();

        assert_eq!(dumps.len(), 2);
        assert!(dumps[0].path.ends_with("dump_0000.h5part"));
        assert_eq!(dumps[0].time, None);
        assert_eq!(dumps[1].time, Some(1250.0));
        assert!(runner.programs().iter().all(|p| p == "h5part_readattr"));
    }

    #[test]
    fn test_time_scales() {
        let config = SimSetConfig::default();
        let times = TimeScales::new(100.0, -5488.7, &config);

        assert_relative_eq!(times.tdump, 100.0);
        assert_relative_eq!(times.t0, -5500.0, epsilon = 1e-9);
        assert_relative_eq!(times.stop_time, 10_000.0);
        assert_relative_eq!(times.save_time, 120.0);
    }

    #[test]
    fn test_setup_attributes() {
        let fx = fixture_with(|cfg, _| {
            cfg.attributes = vec![("eos".to_string(), "tillotson".to_string())];
        });
        let sim = fx.sim(30.0);
        let setup = sim.setup().unwrap();

        let attrs = setup.attributes(&fx.config);
        let keys: Vec<&str> = attrs.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["eos", "time", "gravconst", "tscal"]);
        assert!(setup.times.t0 <= setup.times.t_init);
        assert!(setup.times.t_init < 0.0);
        assert_eq!(setup.bodies.target.name, "earth");
    }
}
