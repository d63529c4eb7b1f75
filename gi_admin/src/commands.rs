//! Operator command handlers.
//!
//! Handlers work on an already constructed set and a command runner, so the
//! binary only parses arguments and prints results.

use crate::error::{AdminError, Result};
use crate::report::SetReport;
use gi_core::constants::{DEG_TO_RAD, EARTH_MASS, EARTH_RADIUS, GRAV_CONST};
use gi_core::{
    Body, BodyCatalog, DumpRecord, OrbitSolution, SchedulerStatus, SimSetConfig, SimState,
    SimulationSet, SledBodyCatalog, TwoBody,
};
use gi_env::CommandRunner;
use std::path::Path;
use tracing::{info, warn};

/// Loads the configuration, opens the catalog and builds the set.
pub fn load_set(config_path: &Path) -> Result<SimulationSet> {
    let config = SimSetConfig::from_json_file(config_path)?;
    info!("{} loaded", config_path.display());

    std::fs::create_dir_all(&config.base_dir)?;
    let catalog = SledBodyCatalog::open(&config.bodies_db)?;
    Ok(SimulationSet::build(config, &catalog)?)
}

/// Key and re-derived state of every simulation.
pub fn list(set: &mut SimulationSet) -> Vec<(String, SimState)> {
    set.states()
}

/// Drives one simulation, or all of them when `key` is `None`.
///
/// A failure in a sweep is logged and shows up as `error`; a single
/// simulation's failure is returned.
pub fn step(
    set: &mut SimulationSet,
    runner: &dyn CommandRunner,
    key: Option<&str>,
) -> Result<Vec<(String, SimState)>> {
    match key {
        Some(key) => {
            let state = set
                .step(key, runner)
                .ok_or_else(|| AdminError::UnknownKey(key.to_string()))??;
            Ok(vec![(key.to_string(), state)])
        }
        None => Ok(set
            .step_all(runner)
            .into_iter()
            .map(|(key, outcome)| {
                let state = outcome.unwrap_or_else(|e| {
                    warn!("{}: {}", key, e);
                    SimState::Error
                });
                (key, state)
            })
            .collect()),
    }
}

/// An explicit lifecycle operation on one simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Prepare,
    Submit,
    Finalize,
    Reset,
    /// Apply a scheduler status, then drive once
    Status(SchedulerStatus),
}

pub fn apply(
    set: &mut SimulationSet,
    runner: &dyn CommandRunner,
    key: &str,
    transition: Transition,
) -> Result<SimState> {
    let outcome = set
        .with_sim(key, |sim, cache| match transition {
            Transition::Prepare => sim.prepare(runner, cache),
            Transition::Submit => sim.submit(runner),
            Transition::Finalize => sim.finalize(),
            Transition::Reset => Ok(sim.reset()),
            Transition::Status(status) => {
                sim.set_status(status);
                sim.step(runner, cache)
            }
        })
        .ok_or_else(|| AdminError::UnknownKey(key.to_string()))?;
    Ok(outcome?)
}

pub fn set_job_id(set: &mut SimulationSet, key: &str, id: &str) -> Result<()> {
    let sim = set
        .get_mut(key)
        .ok_or_else(|| AdminError::UnknownKey(key.to_string()))?;
    sim.set_job_id(id);
    Ok(())
}

pub fn dumps(set: &SimulationSet, runner: &dyn CommandRunner, key: &str) -> Result<Vec<DumpRecord>> {
    let sim = set
        .get(key)
        .ok_or_else(|| AdminError::UnknownKey(key.to_string()))?;
    Ok(sim.dumps(runner)?)
}

/// Ad-hoc orbit inputs in Earth units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrbitQuery {
    pub mtar: f64,
    pub mimp: f64,
    pub rtar: f64,
    pub rimp: f64,
    /// Impact angle [deg]
    pub impa: f64,
    /// Impact speed [escape velocities]
    pub vimprel: f64,
    pub relsep: f64,
}

impl Default for OrbitQuery {
    fn default() -> Self {
        Self {
            mtar: 1.0,
            mimp: 0.1,
            rtar: 1.0,
            rimp: 0.5,
            impa: 45.0,
            vimprel: 1.0,
            relsep: 5.0,
        }
    }
}

pub fn orbit(query: &OrbitQuery) -> Result<OrbitSolution> {
    let two_body = TwoBody::new(
        query.mtar * EARTH_MASS,
        query.mimp * EARTH_MASS,
        query.rtar * EARTH_RADIUS,
        query.rimp * EARTH_RADIUS,
        GRAV_CONST,
    )?;
    let v_impact = query.vimprel * two_body.escape_velocity();
    Ok(two_body.solve(v_impact, query.impa * DEG_TO_RAD, query.relsep)?)
}

/// Imports a JSON list of bodies into the catalog at `db`.
pub fn catalog_import(db: &Path, json_file: &Path) -> Result<usize> {
    let json = std::fs::read_to_string(json_file)?;
    let catalog = SledBodyCatalog::open(db)?;
    let count = catalog.import_json(&json)?;
    info!("Imported {} bodies into {}", count, db.display());
    Ok(count)
}

pub fn catalog_list(db: &Path) -> Result<Vec<Body>> {
    let catalog = SledBodyCatalog::open(db)?;
    Ok(catalog.bodies()?)
}

/// Collects the status report and writes it to `out` when given.
pub fn report(set: &mut SimulationSet, out: Option<&Path>) -> Result<SetReport> {
    let report = SetReport::collect(set);
    if let Some(path) = out {
        report.write_to_file(path)?;
        info!("Report written to {}", path.display());
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gi_core::{MemoryCatalog, OrbitBranch};
    use gi_env::ScriptedRunner;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn body(name: &str, mass: f64, radius: f64) -> Body {
        Body {
            name: name.to_string(),
            mass,
            radius,
            smoothing_length: 1.0e7,
            temperature: 0.0,
            file: PathBuf::from(format!("/nonexistent/{}.h5part", name)),
            composition: BTreeMap::new(),
        }
    }

    fn set(base: &Path) -> SimulationSet {
        let catalog = MemoryCatalog::from_bodies(vec![
            body("earth", EARTH_MASS, EARTH_RADIUS),
            body("theia", 0.1 * EARTH_MASS, 0.5 * EARTH_RADIUS),
        ]);
        let config = SimSetConfig {
            base_dir: base.to_path_buf(),
            target_masses: vec![1.0],
            impactor_masses: vec![0.1],
            impact_angles: vec![30.0, 60.0],
            velocities: vec![1.1],
            ..SimSetConfig::default()
        };
        SimulationSet::build(config, &catalog).unwrap()
    }

    #[test]
    fn test_unknown_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = set(dir.path());
        let runner = ScriptedRunner::succeeding();

        let err = apply(&mut set, &runner, "nope", Transition::Submit).unwrap_err();
        assert!(matches!(err, AdminError::UnknownKey(k) if k == "nope"));
        assert!(step(&mut set, &runner, Some("nope")).is_err());
        assert!(set_job_id(&mut set, "nope", "1").is_err());
    }

    #[test]
    fn test_submit_unprepared_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = set(dir.path());
        let runner = ScriptedRunner::succeeding();
        let key = set.keys()[0].clone();

        let err = apply(&mut set, &runner, &key, Transition::Submit).unwrap_err();
        assert!(matches!(
            err,
            AdminError::Orchestrator(gi_core::OrchestratorError::InvalidStateTransition { .. })
        ));
        assert_eq!(runner.call_count(), 0);

        assert_eq!(apply(&mut set, &runner, &key, Transition::Reset).unwrap(), SimState::Unprepared);
        let states = list(&mut set);
        assert_eq!(states.len(), 2);
        assert!(states.iter().all(|(_, s)| *s == SimState::Unprepared));
    }

    #[test]
    fn test_status_is_ignored_after_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = set(dir.path());
        let runner = ScriptedRunner::succeeding();
        let key = set.keys()[1].clone();

        // body files are missing, so preparing fails
        assert!(step(&mut set, &runner, Some(&key)).is_err());
        let state = apply(&mut set, &runner, &key, Transition::Status(SchedulerStatus::Run)).unwrap();
        assert_eq!(state, SimState::Error);
    }

    #[test]
    fn test_sweep_reports_failures_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = set(dir.path());
        let runner = ScriptedRunner::succeeding();

        let states = step(&mut set, &runner, None).unwrap();
        assert_eq!(states.len(), 2);
        assert!(states.iter().all(|(_, s)| *s == SimState::Error));
        assert!(set.iter().all(|s| s.last_error().is_some()));
    }

    #[test]
    fn test_job_id_shows_in_report() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = set(dir.path());
        let key = set.keys()[0].clone();
        set_job_id(&mut set, &key, "991").unwrap();

        let out = dir.path().join("status.json");
        let report = report(&mut set, Some(&out)).unwrap();

        assert_eq!(report.simulations[0].job_id.as_deref(), Some("991"));
        assert!(out.exists());
    }

    #[test]
    fn test_orbit_reference_impact() {
        let query = OrbitQuery {
            vimprel: 1.1,
            impa: 30.0,
            ..OrbitQuery::default()
        };
        let solution = orbit(&query).unwrap();

        assert_eq!(solution.branch, OrbitBranch::Hyperbolic);
        assert!((solution.eccentricity - 1.119866063420086).abs() < 1e-9);
        assert!(solution.t_init < 0.0);
        assert!(solution.log().contains("vesc"));
    }

    #[test]
    fn test_orbit_rejects_grazing_angle() {
        let query = OrbitQuery {
            impa: 90.0,
            ..OrbitQuery::default()
        };
        assert!(orbit(&query).is_err());
    }

    #[test]
    fn test_catalog_import_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("bodies.db");
        let json_file = dir.path().join("bodies.json");
        let bodies = vec![body("b", 2.0, 1.0), body("a", 1.0, 1.0)];
        std::fs::write(&json_file, serde_json::to_string(&bodies).unwrap()).unwrap();

        assert_eq!(catalog_import(&db, &json_file).unwrap(), 2);

        let names: Vec<String> = catalog_list(&db).unwrap().into_iter().map(|b| b.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_lifecycle_across_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let db = root.join("bodies.db");
        {
            let catalog = SledBodyCatalog::open(&db).unwrap();
            for (name, mass, radius) in [("earth", 1.0, 1.0), ("theia", 0.1, 0.5)] {
                let mut b = body(name, mass * EARTH_MASS, radius * EARTH_RADIUS);
                b.file = root.join(format!("{}.h5part", name));
                std::fs::write(&b.file, name).unwrap();
                catalog.insert(&b).unwrap();
            }
        }
        std::fs::write(root.join("sph"), "binary").unwrap();
        let config = serde_json::json!({
            "name": "reload",
            "base_dir": root.join("sims"),
            "bodies_db": db,
            "binary_file": root.join("sph"),
            "target_masses": [1.0],
            "impactor_masses": [0.1],
            "impact_angles": [30.0],
            "velocities": [1.1]
        });
        let config_path = root.join("giset.json");
        std::fs::write(&config_path, config.to_string()).unwrap();

        let runner = ScriptedRunner::with_handler(|spec| {
            if let Some(out) = spec.flag_value("-o") {
                std::fs::write(out, "merged")
                    .map_err(|e| gi_env::EnvError::IoError(e.to_string()))?;
            }
            Ok(gi_env::CommandOutput::ok())
        });
        let submits = || runner.programs().iter().filter(|p| *p == "qsub").count();

        // every block is one command-line invocation
        let key = {
            let mut set = load_set(&config_path).unwrap();
            assert_eq!(step(&mut set, &runner, None).unwrap()[0].1, SimState::Prepared);
            set.keys()[0].clone()
        };
        {
            let mut set = load_set(&config_path).unwrap();
            assert_eq!(step(&mut set, &runner, Some(&key)).unwrap()[0].1, SimState::Submitted);
        }
        {
            let mut set = load_set(&config_path).unwrap();
            set_job_id(&mut set, &key, "4711").unwrap();
        }
        {
            let mut set = load_set(&config_path).unwrap();
            assert_eq!(step(&mut set, &runner, None).unwrap()[0].1, SimState::Submitted);
            assert_eq!(submits(), 1);
        }
        {
            let mut set = load_set(&config_path).unwrap();
            let status = Transition::Status(SchedulerStatus::Finished);
            assert_eq!(apply(&mut set, &runner, &key, status).unwrap(), SimState::Finalized);
        }

        let mut set = load_set(&config_path).unwrap();
        let report = report(&mut set, None).unwrap();
        assert_eq!(report.simulations[0].state, SimState::Finalized);
        assert_eq!(report.simulations[0].job_id.as_deref(), Some("4711"));
        assert_eq!(step(&mut set, &runner, None).unwrap()[0].1, SimState::Finalized);
        assert_eq!(submits(), 1);
    }

    #[test]
    fn test_load_set_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("bodies.db");
        {
            let catalog = SledBodyCatalog::open(&db).unwrap();
            catalog.insert(&body("earth", EARTH_MASS, EARTH_RADIUS)).unwrap();
            catalog.insert(&body("theia", 0.1 * EARTH_MASS, 0.5 * EARTH_RADIUS)).unwrap();
        }
        let config = serde_json::json!({
            "name": "cli",
            "base_dir": dir.path().join("sims"),
            "bodies_db": db,
            "target_masses": [1.0],
            "impactor_masses": [0.1],
            "impact_angles": [30.0, 45.0],
            "velocities": [1.1],
            "filter": { "op": "compare", "var": "impa", "cmp": "lt", "value": 40.0 }
        });
        let config_path = dir.path().join("giset.json");
        std::fs::write(&config_path, config.to_string()).unwrap();

        let mut set = load_set(&config_path).unwrap();

        assert_eq!(set.keys(), &["mtar001.000_mimp000.100_impa30.0_vimp01.1".to_string()]);
        assert!(dir.path().join("sims").is_dir());
        assert_eq!(list(&mut set)[0].1, SimState::Unprepared);
    }
}
