//! The "ORBIT" Engine - two-body conic setup of a giant impact
//!
//! Turns high-level impact parameters (impact speed, impact angle, initial
//! separation) into initial position and velocity vectors for target and
//! impactor, plus the time from initial placement to first contact.
//!
//! Three entry points all reduce to [`TwoBody::solve`]:
//! - `solve(vimp, impa, relsep)` - impact speed and angle at contact
//! - `solve_vinf(vinf, l_impact, relsep)` - asymptotic speed and angular momentum
//! - `solve_state(r, v)` - an explicit relative state vector
//!
//! # Geometry
//!
//! The relative orbit lies in the x/y plane. At contact the impactor sits on
//! the +y axis relative to the target. Times are measured from contact, so
//! the initial placement has a negative time and the (virtual) periapsis a
//! positive one.

use crate::constants::{EARTH_MOON_ANGULAR_MOMENTUM, RAD_TO_DEG};
use crate::error::{OrchestratorError, Result};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI};
use std::fmt::{self, Write};

/// Width of the near-parabolic band in eccentricity.
///
/// For `e <= 1 + PARABOLIC_THRESHOLD` the hyperbolic time-of-flight formula
/// loses precision (it divides by `sqrt(e^2 - 1)`), so the parabolic closed
/// form is used instead. At the boundary both agree to well under 1%.
pub const PARABOLIC_THRESHOLD: f64 = 1.0e-3;

/// Impact angles below this [rad] are treated as head-on.
///
/// Closer to zero the virtual periapsis collapses onto the origin and the
/// conic time-of-flight formulas divide by (almost) zero.
pub const RADIAL_ANGLE_THRESHOLD: f64 = 1.0e-6;

// =============================================================================
// TIME OF FLIGHT
// =============================================================================

/// Which closed form produced the time of flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrbitBranch {
    /// e > 1 + threshold
    Hyperbolic,
    /// e <= 1 + threshold (Barker's equation)
    Parabolic,
    /// Zero impact angle: one-dimensional free fall
    Radial,
}

impl std::fmt::Display for OrbitBranch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OrbitBranch::Hyperbolic => "hyperbolic",
            OrbitBranch::Parabolic => "parabolic",
            OrbitBranch::Radial => "radial",
        };
        write!(f, "{}", name)
    }
}

/// Time since periapsis on a hyperbola.
///
/// `rp` is the periapsis distance, `gm` the gravitational parameter and
/// `theta` the true anomaly (below the asymptote angle).
pub fn hyperbolic_time(e: f64, rp: f64, gm: f64, theta: f64) -> f64 {
    let a = rp / (e - 1.0);
    let k2 = (gm / (a * a * a)).sqrt();
    let s = (e * e - 1.0).sqrt();
    let half_tan = (e - 1.0) * (theta / 2.0).tan();

    ((e * s * theta.sin()) / (1.0 + e * theta.cos()) - ((s + half_tan) / (s - half_tan)).ln()) / k2
}

/// Time since periapsis on a parabola (Barker's equation), as a magnitude.
pub fn parabolic_time(rp: f64, gm: f64, theta: f64) -> f64 {
    let k2 = (gm / (8.0 * rp * rp * rp)).sqrt();
    let d = (theta / 2.0).tan();

    (0.5 * (d + d * d * d / 3.0) / k2).abs()
}

/// Time since periapsis, choosing the closed form by eccentricity.
pub fn time_since_periapsis(e: f64, rp: f64, gm: f64, theta: f64) -> (f64, OrbitBranch) {
    if e > 1.0 + PARABOLIC_THRESHOLD {
        (hyperbolic_time(e, rp, gm, theta), OrbitBranch::Hyperbolic)
    } else {
        (parabolic_time(rp, gm, theta), OrbitBranch::Parabolic)
    }
}

/// Time (negative) to fall radially from `r0` to contact at `rc`.
pub fn free_fall_time(r0: f64, rc: f64, gm: f64) -> f64 {
    let x = rc / r0;
    -(r0 * r0 * r0 / (2.0 * gm)).sqrt() * ((x * (1.0 - x)).sqrt() + x.acos())
}

// =============================================================================
// SOLUTION
// =============================================================================

/// Relative-orbit quantities at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Epoch {
    /// Separation [cm]
    pub r: f64,
    /// Relative speed [cm/s]
    pub v: f64,
    /// True anomaly [rad]
    pub true_anomaly: f64,
    /// Angle between velocity and local horizontal [rad]
    pub flight_path_angle: f64,
    /// Time relative to contact [s]
    pub t: f64,
}

/// Initial conditions of a two-body impact.
///
/// Owned by the simulation that requested it; never mutated after solving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrbitSolution {
    pub branch: OrbitBranch,

    /// Target displacement from the center of mass [cm]
    pub pos_target: Vector3<f64>,
    /// Impactor displacement from the center of mass [cm]
    pub pos_impactor: Vector3<f64>,
    /// Target velocity in the center-of-mass frame [cm/s]
    pub vel_target: Vector3<f64>,
    /// Impactor velocity in the center-of-mass frame [cm/s]
    pub vel_impactor: Vector3<f64>,

    /// Impactor relative to target [cm]
    pub rel_pos: Vector3<f64>,
    /// Impactor relative to target [cm/s]
    pub rel_vel: Vector3<f64>,

    /// Time from initial placement to contact (negative) [s]
    pub t_init: f64,

    pub eccentricity: f64,
    pub vinf: f64,
    pub vesc: f64,
    pub v_impact: f64,
    /// Impact angle, 0 = head-on [rad]
    pub impact_angle: f64,
    /// Initial separation in contact radii
    pub rel_sep: f64,

    /// Impactor angular momentum at contact [g cm^2/s]
    pub l_impact: f64,
    /// Grazing angular momentum [g cm^2/s]
    pub l_grazing: f64,
    /// Total orbital angular momentum vector (reduced mass) [g cm^2/s]
    pub l_total: Vector3<f64>,

    /// m_impactor / m_target
    pub mass_ratio: f64,
    /// Impact parameter in units of the grazing one
    pub impact_parameter: f64,
    /// Reduced kinetic energy at contact [erg]
    pub reduced_energy: f64,
    /// Direction of the incoming asymptote [rad]
    pub incoming_angle: f64,

    /// Virtual periapsis (absent for radial infall)
    pub periapsis: Option<Epoch>,
    pub impact: Epoch,
    pub initial: Epoch,

    log: String,
}

impl OrbitSolution {
    /// Human-readable record of every intermediate quantity.
    pub fn log(&self) -> &str {
        &self.log
    }
}

// =============================================================================
// TWO-BODY SOLVER
// =============================================================================

/// Target and impactor as point masses with radii.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TwoBody {
    pub m_target: f64,
    pub m_impactor: f64,
    pub r_target: f64,
    pub r_impactor: f64,
    pub grav_const: f64,
}

fn require_positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(OrchestratorError::invalid(format!("{} must be positive, got {}", name, value)))
    }
}

impl TwoBody {
    /// Creates a validated two-body system.
    pub fn new(
        m_target: f64,
        m_impactor: f64,
        r_target: f64,
        r_impactor: f64,
        grav_const: f64,
    ) -> Result<Self> {
        require_positive("target mass", m_target)?;
        require_positive("impactor mass", m_impactor)?;
        require_positive("target radius", r_target)?;
        require_positive("impactor radius", r_impactor)?;
        require_positive("gravitational constant", grav_const)?;

        Ok(Self {
            m_target,
            m_impactor,
            r_target,
            r_impactor,
            grav_const,
        })
    }

    pub fn total_mass(&self) -> f64 {
        self.m_target + self.m_impactor
    }

    pub fn reduced_mass(&self) -> f64 {
        self.m_target * self.m_impactor / self.total_mass()
    }

    /// Distance at first geometric contact.
    pub fn contact_radius(&self) -> f64 {
        self.r_target + self.r_impactor
    }

    /// G * (m1 + m2)
    pub fn gm(&self) -> f64 {
        self.grav_const * self.total_mass()
    }

    /// Mutual escape speed at contact.
    pub fn escape_velocity(&self) -> f64 {
        (2.0 * self.gm() / self.contact_radius()).sqrt()
    }

    /// Crossing time of the contact radius at escape speed.
    pub fn time_scale(&self) -> f64 {
        self.contact_radius() / self.escape_velocity()
    }

    /// Solves from asymptotic speed and impactor angular momentum.
    pub fn solve_vinf(&self, vinf: f64, l_impact: f64, rel_sep: f64) -> Result<OrbitSolution> {
        if !(vinf.is_finite() && vinf >= 0.0) {
            return Err(OrchestratorError::invalid(format!("vinf must be >= 0, got {}", vinf)));
        }
        if !(l_impact.is_finite() && l_impact >= 0.0) {
            return Err(OrchestratorError::invalid(format!(
                "angular momentum must be >= 0, got {}",
                l_impact
            )));
        }

        let vesc = self.escape_velocity();
        let vimp = (vinf * vinf + vesc * vesc).sqrt();
        let l_grazing = vimp * self.m_impactor * self.contact_radius();
        if l_impact >= l_grazing {
            return Err(OrchestratorError::invalid(format!(
                "angular momentum {:e} reaches grazing limit {:e}",
                l_impact, l_grazing
            )));
        }

        self.solve(vimp, (l_impact / l_grazing).asin(), rel_sep)
    }

    /// Solves from an explicit relative state (impactor minus target).
    ///
    /// Energy and angular momentum are carried back to contact; the result
    /// is expressed in the canonical frame, not the caller's.
    pub fn solve_state(&self, r: &Vector3<f64>, v: &Vector3<f64>) -> Result<OrbitSolution> {
        let r0 = r.norm();
        let v0 = v.norm();
        let gm = self.gm();
        let rc = self.contact_radius();

        if !(r0.is_finite() && r0 >= rc) {
            return Err(OrchestratorError::invalid(format!(
                "separation {:e} is inside contact radius {:e}",
                r0, rc
            )));
        }

        let vimp = (v0 * v0 - 2.0 * gm / r0 + 2.0 * gm / rc).max(0.0).sqrt();
        let l_grazing = vimp * self.m_impactor * rc;
        let l0 = r.cross(v).norm() * self.m_impactor;
        let b = (l0 / l_grazing).min(1.0);

        self.solve(vimp, b.asin(), r0 / rc)
    }

    /// Canonical routine: impact speed, impact angle (0 = head-on) and
    /// initial separation in contact radii.
    pub fn solve(&self, v_impact: f64, impact_angle: f64, rel_sep: f64) -> Result<OrbitSolution> {
        let rc = self.contact_radius();
        let gm = self.gm();
        let vesc = self.escape_velocity();
        let m_imp = self.m_impactor;
        let m_tar = self.m_target;
        let m_tot = self.total_mass();

        if !(impact_angle.is_finite() && (0.0..FRAC_PI_2).contains(&impact_angle)) {
            return Err(OrchestratorError::invalid(format!(
                "impact angle must be in [0, 90) deg, got {:.3} deg",
                impact_angle * RAD_TO_DEG
            )));
        }
        if !(v_impact.is_finite() && v_impact >= vesc * (1.0 - 1e-12)) {
            return Err(OrchestratorError::invalid(format!(
                "impact speed {:e} is below escape speed {:e}",
                v_impact, vesc
            )));
        }
        if !(rel_sep.is_finite() && rel_sep >= 1.0) {
            return Err(OrchestratorError::invalid(format!(
                "relative separation must be >= 1, got {}",
                rel_sep
            )));
        }

        let k1 = rc * v_impact * v_impact / gm;
        let b = impact_angle.sin();
        let l_grazing = v_impact * m_imp * rc;
        let l_impact = b * l_grazing;
        let beta_imp = FRAC_PI_2 - impact_angle;

        let vinf = (v_impact * v_impact - vesc * vesc).max(0.0).sqrt();
        let reduced_energy = 0.5 * v_impact * v_impact * self.reduced_mass();

        let (cb, sb) = (beta_imp.cos(), beta_imp.sin());
        let e = ((k1 - 1.0) * (k1 - 1.0) * cb * cb + sb * sb).sqrt();
        let theta_imp = (k1 * sb * cb).atan2(k1 * cb * cb - 1.0);

        let r0 = rel_sep * rc;
        let v0 = (vinf * vinf + 2.0 * gm / r0).sqrt();

        let mut rel_pos = Vector3::zeros();
        let mut rel_vel = Vector3::zeros();

        let branch;
        let t_init;
        let incoming_angle;
        let periapsis;
        let impact;
        let initial;

        if impact_angle > RADIAL_ANGLE_THRESHOLD {
            let rp = rc * (1.0 + e * theta_imp.cos()) / (1.0 + e);
            let vp = (vinf * vinf + 2.0 * gm / rp).sqrt();

            let theta0 = ((rp * (1.0 + e) - r0) / (e * r0)).clamp(-1.0, 1.0).acos();
            let beta0 = (l_impact / (r0 * v0 * m_imp)).clamp(-1.0, 1.0).acos();

            let (t_imp, br) = time_since_periapsis(e, rp, gm, theta_imp);
            let (t_0, _) = time_since_periapsis(e, rp, gm, theta0);
            branch = br;
            t_init = t_imp - t_0;

            incoming_angle = match branch {
                OrbitBranch::Hyperbolic => theta_imp - (1.0 / (e * e - 1.0).sqrt()).atan(),
                _ => -PI,
            };

            let phi = FRAC_PI_2 - theta_imp + theta0;
            let psi = theta0 - theta_imp - beta0;
            rel_pos.x = -r0 * phi.cos();
            rel_pos.y = r0 * phi.sin();
            rel_vel.x = -v0 * psi.cos();
            rel_vel.y = v0 * psi.sin();

            // orientation convention: Lz >= 0
            let lz = rel_pos.x * rel_vel.y - rel_pos.y * rel_vel.x;
            if lz < 0.0 {
                rel_pos.y = -rel_pos.y;
                rel_vel.y = -rel_vel.y;
            }

            periapsis = Some(Epoch {
                r: rp,
                v: vp,
                true_anomaly: 0.0,
                flight_path_angle: 0.0,
                t: t_imp,
            });
            impact = Epoch {
                r: rc,
                v: v_impact,
                true_anomaly: theta_imp,
                flight_path_angle: beta_imp,
                t: 0.0,
            };
            initial = Epoch {
                r: r0,
                v: v0,
                true_anomaly: theta0,
                flight_path_angle: beta0,
                t: t_init,
            };
        } else {
            branch = OrbitBranch::Radial;
            rel_pos.y = r0;
            rel_vel.y = -v0;
            t_init = free_fall_time(r0, rc, gm);
            incoming_angle = PI;

            periapsis = None;
            impact = Epoch {
                r: rc,
                v: v_impact,
                true_anomaly: 0.0,
                flight_path_angle: FRAC_PI_2,
                t: 0.0,
            };
            initial = Epoch {
                r: r0,
                v: v0,
                true_anomaly: 0.0,
                flight_path_angle: FRAC_PI_2,
                t: t_init,
            };
        }

        if !(t_init.is_finite() && rel_pos.iter().chain(rel_vel.iter()).all(|c| c.is_finite())) {
            return Err(OrchestratorError::invalid(format!(
                "degenerate orbit (e = {}, t_init = {})",
                e, t_init
            )));
        }

        let l_total = rel_pos.cross(&rel_vel) * self.reduced_mass();

        let pos_target = rel_pos * (-m_imp / m_tot);
        let pos_impactor = rel_pos * (m_tar / m_tot);
        let vel_target = rel_vel * (-m_imp / m_tot);
        let vel_impactor = rel_vel * (m_tar / m_tot);

        let mut solution = OrbitSolution {
            branch,
            pos_target,
            pos_impactor,
            vel_target,
            vel_impactor,
            rel_pos,
            rel_vel,
            t_init,
            eccentricity: e,
            vinf,
            vesc,
            v_impact,
            impact_angle,
            rel_sep,
            l_impact,
            l_grazing,
            l_total,
            mass_ratio: m_imp / m_tar,
            impact_parameter: b,
            reduced_energy,
            incoming_angle,
            periapsis,
            impact,
            initial,
            log: String::new(),
        };
        solution.log = render_log(&solution);
        Ok(solution)
    }
}

// =============================================================================
// DIAGNOSTIC LOG
// =============================================================================

/// C-style `%.<prec>e` (signed two-digit exponent).
pub(crate) fn sci(x: f64, prec: usize) -> String {
    let s = format!("{:.*e}", prec, x);
    match s.split_once('e') {
        Some((mantissa, exp)) => match exp.parse::<i32>() {
            Ok(exp) => {
                let sign = if exp < 0 { '-' } else { '+' };
                format!("{}e{}{:02}", mantissa, sign, exp.abs())
            }
            Err(_) => s,
        },
        None => s,
    }
}

fn vec_str(v: &Vector3<f64>) -> String {
    format!("[{} {} {}]", sci(v.x, 6), sci(v.y, 6), sci(v.z, 6))
}

fn write_epoch(out: &mut String, title: Option<&str>, epoch: &Epoch, with_angle: bool) -> fmt::Result {
    if let Some(title) = title {
        writeln!(out, "#  {}:", title)?;
    }
    writeln!(out, "# r      = {:>12} cm", sci(epoch.r, 6))?;
    writeln!(out, "# v      = {:>12} cm/s", sci(epoch.v, 6))?;
    writeln!(
        out,
        "# theta  = {:12.6} deg (true anomaly)",
        epoch.true_anomaly * RAD_TO_DEG
    )?;
    if with_angle {
        writeln!(
            out,
            "# beta   = {:12.6} deg (flight path angle)",
            epoch.flight_path_angle * RAD_TO_DEG
        )?;
    }
    writeln!(out, "# t      = {:12.6} s", epoch.t)?;
    writeln!(out, "#")
}

fn write_log(out: &mut String, s: &OrbitSolution) -> fmt::Result {
    writeln!(out, "#  parameters:")?;
    writeln!(out, "# vinf   = {:>12}  cm/s", sci(s.vinf, 6))?;
    writeln!(out, "# vesc   = {:>12}  cm/s", sci(s.vesc, 6))?;
    writeln!(out, "# Limp   = {:>12} gcm^2/s", sci(s.l_impact, 6))?;
    writeln!(out, "# Lgraz  = {:>12} gcm^2/s", sci(s.l_grazing, 6))?;
    writeln!(out, "# gamma  = {:12.6}", s.mass_ratio)?;
    writeln!(out, "# bscal  = {:12.6}", s.impact_parameter)?;
    writeln!(out, "# e      = {:12.6}", s.eccentricity)?;
    writeln!(out, "# Ered   = {:>12}  erg", sci(s.reduced_energy, 3))?;
    writeln!(out, "# branch = {}", s.branch)?;
    writeln!(out, "#")?;

    if let Some(peri) = &s.periapsis {
        write_epoch(out, Some("perihelion"), peri, false)?;
        write_epoch(out, Some("impact"), &s.impact, true)?;
    }

    writeln!(out, "#  initial setup:")?;
    writeln!(out, "# r      = {:12.6} rimp", s.rel_sep)?;
    write_epoch(out, None, &s.initial, s.periapsis.is_some())?;

    writeln!(
        out,
        "# alpha  = {:12.6} deg (incoming angle)",
        s.incoming_angle * RAD_TO_DEG
    )?;
    writeln!(out, "# Ltot   = {:>12} gcm^2/s", sci(s.l_total.norm(), 6))?;
    writeln!(
        out,
        "# Ltot   = {:12.6} L_EM",
        s.l_total.norm() / EARTH_MOON_ANGULAR_MOMENTUM
    )?;
    writeln!(out, "#")?;

    writeln!(out, "# r0tar   = {} cm", vec_str(&s.pos_target))?;
    writeln!(out, "# r0imp   = {} cm", vec_str(&s.pos_impactor))?;
    writeln!(out, "# v0tar   = {} cm/s", vec_str(&s.vel_target))?;
    writeln!(out, "# v0imp   = {} cm/s", vec_str(&s.vel_impactor))?;
    writeln!(out, "#")
}

fn render_log(s: &OrbitSolution) -> String {
    let mut out = String::new();
    write_log(&mut out, s).map(|()| out).unwrap_or_default()
}
