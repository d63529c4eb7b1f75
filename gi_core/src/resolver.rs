//! Target/impactor pairing from the body catalog.

use crate::body::Body;
use crate::catalog::BodyCatalog;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Requested physical properties of one body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyRequest {
    /// Mass [g]
    pub mass: f64,
    /// Temperature [K]
    pub temperature: f64,
}

/// A resolved target/impactor pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyPair {
    pub target: Body,
    pub impactor: Body,
}

/// Selects the best-matching body pair for a simulation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyResolver {
    /// Relative tolerance for mass, temperature and smoothing length
    pub tolerance: f64,
}

impl BodyResolver {
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }

    /// Picks the finest-resolution consistent pair from `bodies`.
    ///
    /// Candidates must match mass and temperature within the tolerance;
    /// a pair is consistent when the impactor's smoothing length is within
    /// the tolerance of the target's. Among consistent pairs the one with
    /// the smallest target smoothing length wins. Ties keep catalog order.
    /// Returns `None` when no pair qualifies.
    pub fn select(&self, bodies: &[Body], target: BodyRequest, impactor: BodyRequest) -> Option<BodyPair> {
        let tol = self.tolerance;
        let targets: Vec<&Body> = bodies
            .iter()
            .filter(|b| b.is_similar(target.mass, target.temperature, tol))
            .collect();
        let impactors: Vec<&Body> = bodies
            .iter()
            .filter(|b| b.is_similar(impactor.mass, impactor.temperature, tol))
            .collect();
        debug!(
            "{} target and {} impactor candidates",
            targets.len(),
            impactors.len()
        );

        let mut pairs: Vec<(&Body, &Body)> = targets
            .iter()
            .flat_map(|t| impactors.iter().map(move |i| (*t, *i)))
            .filter(|(t, i)| t.resolution_matches(i, tol))
            .collect();

        info!("found {} matching body pairs", pairs.len());

        pairs.sort_by(|a, b| a.0.smoothing_length.total_cmp(&b.0.smoothing_length));
        pairs.first().map(|(t, i)| BodyPair {
            target: (*t).clone(),
            impactor: (*i).clone(),
        })
    }

    /// Reads the catalog and selects a pair.
    pub fn resolve(
        &self,
        catalog: &dyn BodyCatalog,
        target: BodyRequest,
        impactor: BodyRequest,
    ) -> Result<Option<BodyPair>> {
        let bodies = catalog.bodies()?;
        Ok(self.select(&bodies, target, impactor))
    }
}
