//! Precomputed equilibrium body models.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Catalog entry for one relaxed particle body.
///
/// Created offline; read-only to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Body {
    /// Catalog key
    pub name: String,

    /// Mass [g]
    pub mass: f64,

    /// Radius [cm]
    pub radius: f64,

    /// SPH smoothing length [cm]
    pub smoothing_length: f64,

    /// Temperature [K]
    pub temperature: f64,

    /// Particle data file
    pub file: PathBuf,

    /// Material name -> mass fraction
    #[serde(default)]
    pub composition: BTreeMap<String, f64>,
}

/// |actual - requested| / |requested|, or |actual| when nothing was requested.
pub fn relative_difference(actual: f64, requested: f64) -> f64 {
    if requested == 0.0 {
        actual.abs()
    } else {
        ((actual - requested) / requested).abs()
    }
}

impl Body {
    /// Mass and temperature both within `tolerance` (relative) of the request.
    pub fn is_similar(&self, mass: f64, temperature: f64, tolerance: f64) -> bool {
        relative_difference(self.mass, mass) < tolerance
            && relative_difference(self.temperature, temperature) < tolerance
    }

    /// Smoothing lengths agree within `tolerance`, relative to `self`.
    pub fn resolution_matches(&self, other: &Body, tolerance: f64) -> bool {
        relative_difference(other.smoothing_length, self.smoothing_length) < tolerance
    }
}
