//! Physical constants (cgs) used to turn grid parameters into physical values.

/// Gravitational constant [cm^3 g^-1 s^-2]
pub const GRAV_CONST: f64 = 6.67429e-8;

/// Earth mass [g]
pub const EARTH_MASS: f64 = 5.97360e27;

/// Earth radius [cm]
pub const EARTH_RADIUS: f64 = 6.37814e8;

/// Angular momentum of the Earth-Moon system [g cm^2 s^-1] (Canup 2001)
pub const EARTH_MOON_ANGULAR_MOMENTUM: f64 = 3.4e41;

pub const RAD_TO_DEG: f64 = 180.0 / std::f64::consts::PI;
pub const DEG_TO_RAD: f64 = std::f64::consts::PI / 180.0;
