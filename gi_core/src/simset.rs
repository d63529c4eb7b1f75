//! A grid of simulations sharing one configuration.

use crate::body::Body;
use crate::catalog::BodyCatalog;
use crate::config::SimSetConfig;
use crate::error::Result;
use crate::lifecycle::{BinaryCache, Simulation};
use crate::params::SimParams;
use crate::predicate::GridPoint;
use crate::state::SimState;
use gi_env::CommandRunner;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Simulations keyed by parameter key, in construction order.
///
/// Owns the binary cache, so the integrator is built at most once per set.
pub struct SimulationSet {
    config: Arc<SimSetConfig>,
    sims: BTreeMap<String, Simulation>,
    /// Keys in construction order
    order: Vec<String>,
    cache: BinaryCache,
}

impl SimulationSet {
    /// An empty set; see [`SimulationSet::populate`].
    pub fn new(config: SimSetConfig) -> Self {
        Self {
            config: Arc::new(config),
            sims: BTreeMap::new(),
            order: Vec::new(),
            cache: BinaryCache::new(),
        }
    }

    /// Builds and populates a set from the catalog.
    pub fn build(config: SimSetConfig, catalog: &dyn BodyCatalog) -> Result<Self> {
        let mut set = Self::new(config);
        set.populate(catalog)?;
        Ok(set)
    }

    pub fn config(&self) -> &Arc<SimSetConfig> {
        &self.config
    }

    /// Cartesian product of the grid, target mass outermost and velocity innermost.
    pub fn grid(&self) -> Vec<GridPoint> {
        let c = &self.config;
        let mut points = Vec::new();
        for &mtar in &c.target_masses {
            for &mimp in &c.impactor_masses {
                for &impa in &c.impact_angles {
                    for &vimprel in &c.velocities {
                        points.push(GridPoint {
                            mtar,
                            mimp,
                            impa,
                            vimprel,
                        });
                    }
                }
            }
        }
        points
    }

    /// Adds a simulation for every grid point passing the configured filter.
    ///
    /// Existing keys are kept untouched. Returns how many were added.
    pub fn populate(&mut self, catalog: &dyn BodyCatalog) -> Result<usize> {
        let filter = self.config.filter.clone();
        self.populate_with(catalog, |p| filter.eval(p))
    }

    /// Like [`SimulationSet::populate`], with a caller-supplied filter.
    pub fn populate_with<F>(&mut self, catalog: &dyn BodyCatalog, filter: F) -> Result<usize>
    where
        F: Fn(&GridPoint) -> bool,
    {
        let bodies = catalog.bodies()?;
        if bodies.is_empty() {
            warn!("Body catalog is empty");
        }
        Ok(self.populate_from(&bodies, filter))
    }

    fn populate_from<F>(&mut self, bodies: &[Body], filter: F) -> usize
    where
        F: Fn(&GridPoint) -> bool,
    {
        let mut added = 0;
        for point in self.grid() {
            if !filter(&point) {
                continue;
            }
            let params = SimParams::new(point, Arc::clone(&self.config));
            let key = params.key();
            if self.sims.contains_key(&key) {
                continue;
            }
            self.sims.insert(key.clone(), Simulation::new(params, bodies));
            self.order.push(key);
            added += 1;
        }
        info!("Set '{}': {} simulations ({} new)", self.config.name, self.sims.len(), added);
        added
    }

    pub fn len(&self) -> usize {
        self.sims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sims.is_empty()
    }

    /// Keys in construction order.
    pub fn keys(&self) -> &[String] {
        &self.order
    }

    pub fn get(&self, key: &str) -> Option<&Simulation> {
        self.sims.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Simulation> {
        self.sims.get_mut(key)
    }

    /// Simulations in construction order.
    pub fn iter(&self) -> impl Iterator<Item = &Simulation> {
        self.order.iter().filter_map(move |k| self.sims.get(k))
    }

    /// Re-derived state of every simulation, in construction order.
    pub fn states(&mut self) -> Vec<(String, SimState)> {
        let mut out = Vec::with_capacity(self.order.len());
        for key in &self.order {
            if let Some(sim) = self.sims.get_mut(key) {
                out.push((key.clone(), sim.state()));
            }
        }
        out
    }

    /// Runs `f` on one simulation together with the set's binary cache.
    pub fn with_sim<T>(
        &mut self,
        key: &str,
        f: impl FnOnce(&mut Simulation, &mut BinaryCache) -> T,
    ) -> Option<T> {
        let sim = self.sims.get_mut(key)?;
        Some(f(sim, &mut self.cache))
    }

    /// Drives one simulation a single step.
    pub fn step(&mut self, key: &str, runner: &dyn CommandRunner) -> Option<Result<SimState>> {
        self.with_sim(key, |sim, cache| sim.step(runner, cache))
    }

    /// Drives every simulation a single step, in construction order.
    ///
    /// A failure leaves its simulation in `error` and does not stop the sweep.
    pub fn step_all(&mut self, runner: &dyn CommandRunner) -> Vec<(String, Result<SimState>)> {
        let mut out = Vec::with_capacity(self.order.len());
        for key in &self.order {
            if let Some(sim) = self.sims.get_mut(key) {
                out.push((key.clone(), sim.step(runner, &mut self.cache)));
            }
        }
        out
    }
}
