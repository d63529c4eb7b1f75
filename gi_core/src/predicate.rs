//! Boolean filter over grid points.
//!
//! A small expression tree replaces free-form condition strings. It
//! deserializes from JSON, e.g.
//!
//! ```json
//! { "op": "and", "all": [
//!     { "op": "compare_vars", "left": "mimp", "cmp": "lt", "right": "mtar" },
//!     { "op": "compare", "var": "impa", "cmp": "le", "value": 45.0 }
//! ] }
//! ```

use serde::{Deserialize, Serialize};

/// One point of the parameter grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridPoint {
    /// Target mass [Earth masses]
    pub mtar: f64,
    /// Impactor mass [Earth masses]
    pub mimp: f64,
    /// Impact angle [deg]
    pub impa: f64,
    /// Impact velocity [escape velocities]
    pub vimprel: f64,
}

/// Grid variable names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Var {
    Mtar,
    Mimp,
    Impa,
    Vimprel,
}

impl Var {
    pub fn value(&self, p: &GridPoint) -> f64 {
        match self {
            Var::Mtar => p.mtar,
            Var::Mimp => p.mimp,
            Var::Impa => p.impa,
            Var::Vimprel => p.vimprel,
        }
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cmp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Cmp {
    pub fn apply(&self, a: f64, b: f64) -> bool {
        match self {
            Cmp::Lt => a < b,
            Cmp::Le => a <= b,
            Cmp::Gt => a > b,
            Cmp::Ge => a >= b,
            Cmp::Eq => a == b,
            Cmp::Ne => a != b,
        }
    }
}

/// Filter expression; the default admits every point.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    #[default]
    Always,
    Compare {
        var: Var,
        cmp: Cmp,
        value: f64,
    },
    CompareVars {
        left: Var,
        cmp: Cmp,
        right: Var,
    },
    And {
        all: Vec<Predicate>,
    },
    Or {
        any: Vec<Predicate>,
    },
    Not {
        pred: Box<Predicate>,
    },
}

impl Predicate {
    pub fn eval(&self, p: &GridPoint) -> bool {
        match self {
            Predicate::Always => true,
            Predicate::Compare { var, cmp, value } => cmp.apply(var.value(p), *value),
            Predicate::CompareVars { left, cmp, right } => cmp.apply(left.value(p), right.value(p)),
            Predicate::And { all } => all.iter().all(|q| q.eval(p)),
            Predicate::Or { any } => any.iter().any(|q| q.eval(p)),
            Predicate::Not { pred } => !pred.eval(p),
        }
    }
}
