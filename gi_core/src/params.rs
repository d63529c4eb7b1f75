//! One point in impact parameter space.

use crate::config::SimSetConfig;
use crate::constants::EARTH_MASS;
use crate::predicate::GridPoint;
use crate::resolver::BodyRequest;
use std::sync::Arc;

/// Parameters of a single simulation plus the shared set configuration.
#[derive(Debug, Clone)]
pub struct SimParams {
    /// Impactor mass [Earth masses]
    pub mimp: f64,
    /// Target mass [Earth masses]
    pub mtar: f64,
    /// Impact angle [deg]
    pub impa: f64,
    /// Impact velocity [escape velocities]
    pub vimprel: f64,
    /// Body temperature [K]
    pub temp: f64,

    pub config: Arc<SimSetConfig>,
}

impl SimParams {
    pub fn new(point: GridPoint, config: Arc<SimSetConfig>) -> Self {
        Self {
            mimp: point.mimp,
            mtar: point.mtar,
            impa: point.impa,
            vimprel: point.vimprel,
            temp: config.temperature,
            config,
        }
    }

    /// Canonical identifier, e.g. `mtar001.000_mimp000.100_impa30.0_vimp01.1`.
    ///
    /// The printed precision is the equality granularity: values that only
    /// differ beyond it share a key.
    pub fn key(&self) -> String {
        format_key(self.mtar, self.mimp, self.impa, self.vimprel)
    }

    pub fn point(&self) -> GridPoint {
        GridPoint {
            mtar: self.mtar,
            mimp: self.mimp,
            impa: self.impa,
            vimprel: self.vimprel,
        }
    }

    /// Catalog request for the target body.
    pub fn target_request(&self) -> BodyRequest {
        BodyRequest {
            mass: self.mtar * EARTH_MASS,
            temperature: self.temp,
        }
    }

    /// Catalog request for the impactor body.
    pub fn impactor_request(&self) -> BodyRequest {
        BodyRequest {
            mass: self.mimp * EARTH_MASS,
            temperature: self.temp,
        }
    }
}

pub fn format_key(mtar: f64, mimp: f64, impa: f64, vimprel: f64) -> String {
    format!(
        "mtar{:07.3}_mimp{:07.3}_impa{:04.1}_vimp{:04.1}",
        mtar, mimp, impa, vimprel
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(mtar: f64, mimp: f64, impa: f64, vimprel: f64) -> SimParams {
        SimParams::new(
            GridPoint {
                mtar,
                mimp,
                impa,
                vimprel,
            },
            Arc::new(SimSetConfig::default()),
        )
    }

    #[test]
    fn test_key_format() {
        assert_eq!(
            params(1.0, 0.1, 30.0, 1.1).key(),
            "mtar001.000_mimp000.100_impa30.0_vimp01.1"
        );
        assert_eq!(
            params(12.5, 0.125, 5.0, 3.0).key(),
            "mtar012.500_mimp000.125_impa05.0_vimp03.0"
        );
    }

    #[test]
    fn test_key_collides_below_precision() {
        assert_eq!(
            params(1.0, 0.1, 30.0, 1.1).key(),
            params(1.0001, 0.1002, 30.04, 1.1001).key()
        );
        assert_ne!(params(1.0, 0.1, 30.0, 1.1).key(), params(1.0, 0.1, 30.1, 1.1).key());
    }

    #[test]
    fn test_requests_in_grams() {
        let p = params(1.0, 0.1, 30.0, 1.1);
        assert_eq!(p.target_request().mass, EARTH_MASS);
        assert_eq!(p.impactor_request().mass, 0.1 * EARTH_MASS);
        assert_eq!(p.target_request().temperature, p.temp);
    }
}
