//! Events and the kinematic scenario they are filled in.

use super::bin::MAX_DIMENSIONS;
use arrayvec::ArrayVec;
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

/// Weight components of an event. Besides the scale-independent weight `w`, flexible-scale tables
/// store the coefficients of `ln(mu_f^2)` (`wf`), `ln(mu_r^2)` (`wr`), `ln^2(mu_r^2)` (`wrr`),
/// `ln^2(mu_f^2)` (`wff`) and `ln(mu_r^2) ln(mu_f^2)` (`wrf`).
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Weights {
    /// Scale-independent weight.
    pub w: f64,
    /// Coefficient of `ln(mu_f^2)`.
    pub wf: f64,
    /// Coefficient of `ln(mu_r^2)`.
    pub wr: f64,
    /// Coefficient of `ln^2(mu_r^2)`.
    pub wrr: f64,
    /// Coefficient of `ln^2(mu_f^2)`.
    pub wff: f64,
    /// Coefficient of `ln(mu_r^2) ln(mu_f^2)`.
    pub wrf: f64,
}

impl Weights {
    /// Weights with only the scale-independent component set.
    #[must_use]
    pub const fn central(w: f64) -> Self {
        Self {
            w,
            wf: 0.0,
            wr: 0.0,
            wrr: 0.0,
            wff: 0.0,
            wrf: 0.0,
        }
    }

    /// Return all components in the order of [`crate::tensor::ScaleDep::ALL`].
    #[must_use]
    pub const fn components(&self) -> [f64; 6] {
        [self.w, self.wf, self.wr, self.wrr, self.wff, self.wrf]
    }

    /// Return `true` if the scale-independent weight and the coefficients of the single
    /// logarithms are finite.
    #[must_use]
    pub const fn leading_are_finite(&self) -> bool {
        self.w.is_finite() && self.wf.is_finite() && self.wr.is_finite()
    }
}

impl AddAssign for Weights {
    fn add_assign(&mut self, other: Self) {
        self.w += other.w;
        self.wf += other.wf;
        self.wr += other.wr;
        self.wrr += other.wrr;
        self.wff += other.wff;
        self.wrf += other.wrf;
    }
}

/// Momentum fractions, subprocess and weights of one event.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Event {
    /// Momentum fraction of the first hadron.
    pub x1: f64,
    /// Momentum fraction of the second hadron; ignored for a single hadron.
    pub x2: f64,
    /// Index of the subprocess.
    pub subprocess: usize,
    /// Weight components.
    pub weights: Weights,
    /// Cross section of the event, only used for statistics.
    pub sigma: f64,
}

impl Event {
    /// Constructor.
    #[must_use]
    pub const fn new(x1: f64, x2: f64, subprocess: usize, weights: Weights) -> Self {
        Self {
            x1,
            x2,
            subprocess,
            weights,
            sigma: 0.0,
        }
    }
}

/// Selects the observable bin of an event.
#[derive(Clone, Debug, PartialEq)]
pub enum BinCoord {
    /// The index of the bin.
    Index(usize),
    /// A point of the observable; the bin containing it is looked up.
    Observable(ArrayVec<f64, MAX_DIMENSIONS>),
}

impl BinCoord {
    /// Create a coordinate from the value of a one-dimensional observable.
    #[must_use]
    pub fn value(value: f64) -> Self {
        let mut point = ArrayVec::new();
        point.push(value);
        Self::Observable(point)
    }
}

/// Bin and scales shared by the events of one phase-space point.
#[derive(Clone, Debug, PartialEq)]
pub struct Scenario {
    /// The observable bin.
    pub bin: BinCoord,
    /// First scale; the only scale of fixed-scale tables.
    pub mu1: f64,
    /// Second scale of flexible-scale tables.
    pub mu2: f64,
}

impl Scenario {
    /// Constructor.
    #[must_use]
    pub const fn new(bin: BinCoord, mu1: f64, mu2: f64) -> Self {
        Self { bin, mu1, mu2 }
    }
}
