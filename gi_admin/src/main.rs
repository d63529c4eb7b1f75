//! Giant Impact Admin CLI
//!
//! Prepare, submit and track the simulations of one set.

use clap::{Parser, Subcommand};
use gi_admin::commands::{self, OrbitQuery, Transition};
use gi_admin::{AdminError, Result};
use gi_core::{SchedulerStatus, SimSetConfig, SimState};
use gi_env::TokioRunner;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, error};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Giant impact simulation set administration
#[derive(Parser, Debug)]
#[command(name = "gi-admin")]
#[command(about = "Prepare, submit and track giant impact simulations", long_about = None)]
struct Args {
    /// Simulation set configuration (JSON)
    #[arg(short, long, default_value = "giset.json")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for scripts
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List simulations and their states
    List,

    /// Perform the next action of one or all simulations
    Step {
        #[arg(long)]
        key: Option<String>,
    },

    /// Prepare a simulation directory
    Prepare { key: String },

    /// Submit a prepared simulation
    Submit { key: String },

    /// Finalize a finished simulation
    Finalize { key: String },

    /// Force a simulation back to unprepared
    Reset { key: String },

    /// Apply a scheduler status (queued, run, finished) and drive once
    Status { key: String, status: SchedulerStatus },

    /// Record the scheduler job id
    JobId { key: String, id: String },

    /// List dump files and their times
    Dumps { key: String },

    /// Solve an impact orbit for ad-hoc inputs (Earth units)
    Orbit(OrbitArgs),

    /// Manage the body catalog
    Catalog {
        /// Catalog database (defaults to the configured one)
        #[arg(long)]
        db: Option<PathBuf>,

        #[command(subcommand)]
        action: CatalogAction,
    },

    /// Write the JSON status report
    Report {
        /// Output file (stdout when omitted)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum CatalogAction {
    /// Import bodies from a JSON list
    Import { file: PathBuf },
    /// List stored bodies
    List,
}

#[derive(clap::Args, Debug)]
struct OrbitArgs {
    /// Target mass [Earth masses]
    #[arg(long, default_value_t = 1.0)]
    mtar: f64,
    /// Impactor mass [Earth masses]
    #[arg(long, default_value_t = 0.1)]
    mimp: f64,
    /// Target radius [Earth radii]
    #[arg(long, default_value_t = 1.0)]
    rtar: f64,
    /// Impactor radius [Earth radii]
    #[arg(long, default_value_t = 0.5)]
    rimp: f64,
    /// Impact angle [deg]
    #[arg(long, default_value_t = 45.0)]
    impa: f64,
    /// Impact speed [escape velocities]
    #[arg(long, default_value_t = 1.0)]
    vimprel: f64,
    /// Initial separation [contact radii]
    #[arg(long, default_value_t = 5.0)]
    relsep: f64,
}

impl From<&OrbitArgs> for OrbitQuery {
    fn from(a: &OrbitArgs) -> Self {
        Self {
            mtar: a.mtar,
            mimp: a.mimp,
            rtar: a.rtar,
            rimp: a.rimp,
            impa: a.impa,
            vimprel: a.vimprel,
            relsep: a.relsep,
        }
    }
}

fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = FmtSubscriber::builder().with_env_filter(filter);

    let installed = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let subscriber = builder.with_writer(Mutex::new(file)).with_ansi(false).finish();
            tracing::subscriber::set_global_default(subscriber)
        }
        None => {
            let subscriber = builder.with_writer(std::io::stderr).finish();
            tracing::subscriber::set_global_default(subscriber)
        }
    };
    installed.map_err(|e| AdminError::Logging(e.to_string()))
}

fn print_states(json: bool, states: &[(String, SimState)]) -> Result<()> {
    if json {
        let entries: Vec<serde_json::Value> = states
            .iter()
            .map(|(key, state)| serde_json::json!({ "key": key, "state": state }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for (key, state) in states {
            println!("{:<45} {}", key, state);
        }
    }
    Ok(())
}

fn run_orbit(json: bool, args: &OrbitArgs) -> Result<()> {
    let solution = commands::orbit(&OrbitQuery::from(args))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&solution)?);
    } else {
        println!("{}", solution.log());
    }
    Ok(())
}

fn run_catalog(args: &Args, db: Option<&Path>, action: &CatalogAction) -> Result<()> {
    let db = match db {
        Some(db) => db.to_path_buf(),
        None => SimSetConfig::from_json_file(&args.config)?.bodies_db,
    };
    match action {
        CatalogAction::Import { file } => {
            let count = commands::catalog_import(&db, file)?;
            println!("{} bodies imported", count);
        }
        CatalogAction::List => {
            let bodies = commands::catalog_list(&db)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&bodies)?);
            } else {
                for b in &bodies {
                    println!(
                        "{:<30} m={:.4e} r={:.4e} h={:.4e} T={:.1}",
                        b.name, b.mass, b.radius, b.smoothing_length, b.temperature
                    );
                }
            }
        }
    }
    Ok(())
}

fn run_set_command(args: &Args) -> Result<()> {
    let mut set = commands::load_set(&args.config)?;
    let runner = TokioRunner::shared()?;
    let runner = runner.as_ref();

    let transition = |key: &str, t: Transition, set: &mut gi_core::SimulationSet| -> Result<()> {
        let state = commands::apply(set, runner, key, t)?;
        print_states(args.json, &[(key.to_string(), state)])
    };

    match &args.command {
        Command::List => print_states(args.json, &commands::list(&mut set)),
        Command::Step { key } => {
            let states = commands::step(&mut set, runner, key.as_deref())?;
            print_states(args.json, &states)
        }
        Command::Prepare { key } => transition(key, Transition::Prepare, &mut set),
        Command::Submit { key } => transition(key, Transition::Submit, &mut set),
        Command::Finalize { key } => transition(key, Transition::Finalize, &mut set),
        Command::Reset { key } => transition(key, Transition::Reset, &mut set),
        Command::Status { key, status } => transition(key, Transition::Status(*status), &mut set),
        Command::JobId { key, id } => commands::set_job_id(&mut set, key, id),
        Command::Dumps { key } => {
            let dumps = commands::dumps(&set, runner, key)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&dumps)?);
            } else {
                for d in &dumps {
                    let time = d.time.map(|t| format!("{:.6e}", t)).unwrap_or_else(|| "nan".to_string());
                    println!("{}  {}", d.path.display(), time);
                }
            }
            Ok(())
        }
        Command::Report { out } => {
            let report = commands::report(&mut set, out.as_deref())?;
            if out.is_none() {
                println!("{}", report.to_json()?);
            }
            Ok(())
        }
        Command::Orbit(_) | Command::Catalog { .. } => Ok(()),
    }
}

fn run(args: &Args) -> Result<()> {
    match &args.command {
        Command::Orbit(orbit) => run_orbit(args.json, orbit),
        Command::Catalog { db, action } => run_catalog(args, db.as_deref(), action),
        _ => run_set_command(args),
    }
}

fn main() {
    let args = Args::parse();

    // The set log file is optional; a broken config is reported by the command itself.
    let log_file = SimSetConfig::from_json_file(&args.config)
        .ok()
        .and_then(|c| c.log_file);
    if let Err(e) = init_logging(args.verbose, log_file.as_deref()) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
    debug!("{:?}", args);

    if let Err(e) = run(&args) {
        error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
