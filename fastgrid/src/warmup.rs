//! Calibration ("warmup") of the grid limits: observed extrema, the rounding heuristics that turn
//! them into safe limits, and the persisted calibration table.

use super::bin::{BinningModel, DiffKind};
use super::config::WarmupParams;
use super::convert;
use super::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use tracing::{debug, error, info, warn};

const DUMMY_X: (f64, f64) = (1e-6, 1.0);
const DUMMY_MU: (f64, f64) = (1.0, 5000.0);

// absolute tolerance for bin limits and relative tolerance for bin sizes when comparing
// calibration data with the binning
const BIN_LIMIT_EPS: f64 = 1e-8;
const BIN_SIZE_EPS: f64 = 1e-4;

const EMPTY: (f64, f64) = (f64::MAX, -f64::MAX);

fn ieee_remainder(x: f64, y: f64) -> f64 {
    (x / y).round_ties_even().mul_add(-y, x)
}

fn near_tenth(value: f64, tolerance: f64) -> bool {
    ieee_remainder(value, 0.1).abs() < tolerance
}

fn round_to_digits(value: f64, digits: i32) -> f64 {
    let scale = 10.0f64.powi(digits);
    (value * scale).round() / scale
}

fn is_degenerate((lo, hi): (f64, f64)) -> bool {
    hi == 0.0 || (lo / hi - 1.0).abs() < 1e-5
}

fn widen(values: &mut (f64, f64), raw: (f64, f64)) {
    values.0 = values.0.min(raw.0);
    values.1 = values.1.max(raw.1);
}

/// Running extrema of `x` and the scales observed in each bin during calibration.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct WarmupStats {
    x: Vec<(f64, f64)>,
    mu1: Vec<(f64, f64)>,
    mu2: Option<Vec<(f64, f64)>>,
    events: Vec<u64>,
}

impl WarmupStats {
    /// Create empty statistics for `bins` bins. The second scale is only tracked if `flexible`
    /// is `true`.
    #[must_use]
    pub fn new(bins: usize, flexible: bool) -> Self {
        Self {
            x: vec![EMPTY; bins],
            mu1: vec![EMPTY; bins],
            mu2: flexible.then(|| vec![EMPTY; bins]),
            events: vec![0; bins],
        }
    }

    /// Return the number of bins.
    #[must_use]
    pub fn bins(&self) -> usize {
        self.events.len()
    }

    /// Widen the extrema of `bin` to include an event. For two hadrons `x2` is given and both
    /// momentum fractions widen the same range.
    ///
    /// # Panics
    ///
    /// Panics if `bin` is out of range.
    pub fn update(&mut self, bin: usize, x1: f64, x2: Option<f64>, mu1: f64, mu2: f64) {
        let x = &mut self.x[bin];
        for value in [Some(x1), x2].into_iter().flatten() {
            x.0 = x.0.min(value);
            x.1 = x.1.max(value);
        }

        let m = &mut self.mu1[bin];
        m.0 = m.0.min(mu1);
        m.1 = m.1.max(mu1);

        if let Some(mu2s) = &mut self.mu2 {
            let m = &mut mu2s[bin];
            m.0 = m.0.min(mu2);
            m.1 = m.1.max(mu2);
        }

        self.events[bin] += 1;
    }

    /// Combine the statistics of two independent calibration runs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mismatch`] if the number of bins or the scale mode differ.
    pub fn merge(&mut self, other: &Self) -> Result<()> {
        if self.bins() != other.bins() || self.mu2.is_some() != other.mu2.is_some() {
            return Err(Error::Mismatch(
                "calibration statistics with different bins or scales can not be merged"
                    .to_owned(),
            ));
        }

        for (lhs, rhs) in self.x.iter_mut().zip(&other.x) {
            widen(lhs, *rhs);
        }
        for (lhs, rhs) in self.mu1.iter_mut().zip(&other.mu1) {
            widen(lhs, *rhs);
        }
        if let (Some(lhs), Some(rhs)) = (&mut self.mu2, &other.mu2) {
            for (lhs, rhs) in lhs.iter_mut().zip(rhs) {
                widen(lhs, *rhs);
            }
        }
        for (lhs, rhs) in self.events.iter_mut().zip(&other.events) {
            *lhs += rhs;
        }

        Ok(())
    }

    /// Return the observed `x` range of `bin`, or `None` if no event was seen.
    #[must_use]
    pub fn x(&self, bin: usize) -> Option<(f64, f64)> {
        (self.events[bin] != 0).then_some(self.x[bin])
    }

    /// Return the observed range of the first scale in `bin`, or `None` if no event was seen.
    #[must_use]
    pub fn mu1(&self, bin: usize) -> Option<(f64, f64)> {
        (self.events[bin] != 0).then_some(self.mu1[bin])
    }

    /// Return the observed range of the second scale in `bin`, or `None` if no event was seen or
    /// the second scale is not tracked.
    #[must_use]
    pub fn mu2(&self, bin: usize) -> Option<(f64, f64)> {
        self.mu2
            .as_ref()
            .and_then(|mu2| (self.events[bin] != 0).then_some(mu2[bin]))
    }

    /// Return the number of events seen in `bin`.
    #[must_use]
    pub fn events(&self, bin: usize) -> u64 {
        self.events[bin]
    }

    /// Turn the observed extrema into grid limits. The lower `x` limit is rounded down with
    /// [`round_x_min`], the scale limits with [`round_scale_limits`]. Bins without events get
    /// placeholder limits and are marked as such.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mismatch`] if the number of bins differs from `binning` or the number of
    /// scale descriptions does not match the number of tracked scales.
    pub fn finalize(
        &self,
        binning: &BinningModel,
        params: &WarmupParams,
        scale_descriptions: &[String],
    ) -> Result<WarmupTable> {
        if binning.bins() != self.bins() {
            return Err(Error::Mismatch(format!(
                "calibration statistics have {} bins, the binning has {}",
                self.bins(),
                binning.bins()
            )));
        }

        let scales = if self.mu2.is_some() { 2 } else { 1 };

        if scale_descriptions.len() != scales {
            return Err(Error::Mismatch(format!(
                "{scales} scale(s) were tracked, but {} description(s) given",
                scale_descriptions.len()
            )));
        }

        let mut x = Vec::with_capacity(self.bins());
        let mut mu1 = Vec::with_capacity(self.bins());
        let mut mu2 = Vec::with_capacity(self.bins());
        let mut dummy = Vec::with_capacity(self.bins());

        for bin in 0..self.bins() {
            let events = self.events[bin];

            if events == 0 {
                error!(
                    "no events were counted in bin {bin}, using placeholder limits that must not \
                     be used for production runs"
                );
                x.push(DUMMY_X);
                mu1.push(DUMMY_MU);
                mu2.push(DUMMY_MU);
                dummy.push(true);
                continue;
            } else if events < 10 {
                warn!("too few events (n={events}) were counted in bin {bin}");
            } else if events < 100 {
                warn!("quite few events (n={events}) were counted in bin {bin}");
            }

            let (x_min, x_max) = self.x[bin];
            let mut rounded = round_x_min(x_min, events, params);

            if rounded < params.x_floor {
                warn!(
                    "the x limit {rounded:e} in bin {bin} is unreasonably low, using {:e} instead",
                    params.x_floor.min(x_min)
                );
                rounded = params.x_floor.min(x_min);
            }

            debug!("bin {bin}: x_min={x_min:e} rounded to {rounded:e} with n={events}");

            x.push((rounded, x_max));
            mu1.push(self.mu1[bin]);
            mu2.push(self.mu2.as_ref().map_or(EMPTY, |mu2| mu2[bin]));
            dummy.push(false);
        }

        let mu1 = round_scale_limits(&mu1, binning, params.digits_mu1, params);
        let mu2 = self
            .mu2
            .is_some()
            .then(|| round_scale_limits(&mu2, binning, params.digits_mu2, params));

        let rows = (0..self.bins())
            .map(|bin| {
                let observable = binning.bin(bin).map_or_else(Vec::new, |b| b.limits().to_vec());

                WarmupRow {
                    x_min: x[bin].0,
                    x_max: x[bin].1,
                    mu1: mu1[bin],
                    mu2: mu2.as_ref().map(|mu2| mu2[bin]),
                    limits: observable,
                    bin_size: binning.bin_sizes()[bin],
                    events: self.events[bin],
                    dummy: dummy[bin],
                }
            })
            .collect();

        Ok(WarmupTable {
            scale_descriptions: scale_descriptions.to_vec(),
            dimension_labels: binning.labels().to_vec(),
            diff: binning.diff().to_vec(),
            check_scale_limits_against_bins: params.check_scale_limits_against_bins,
            rows,
        })
    }
}

/// Round the smallest observed momentum fraction `x` of a bin with `events` events down to an
/// even number of tenths of its mantissa, after subtracting a safety margin that grows for bins
/// with few events. Values of at least 0.8 are replaced by `1e-4`, values of at least 0.09 by
/// 0.09. Zero, subnormal and non-finite values return [`WarmupParams::x_floor`].
#[must_use]
pub fn round_x_min(x: f64, events: u64, params: &WarmupParams) -> f64 {
    if !x.is_normal() || x < 0.0 {
        return params.x_floor;
    }

    let x = if x >= 0.8 {
        1e-4
    } else if x >= 0.09 {
        0.09
    } else {
        x
    };

    let ex = convert::i32_from_f64(x.log10() - 1.0);
    let mantissa = x * 10.0f64.powi(-ex);
    // guard against mantissas like 65.99999999999999
    let mut imant = convert::i32_from_f64(mantissa.mul_add(10.0, 1e-9).floor());

    imant -= params.x_margin;

    if events < 100 {
        imant -= 4;
    } else if events < 1000 {
        imant -= 2;
    } else if events > 1_000_000 {
        imant += 2;
    }

    if imant % 2 != 0 {
        imant -= 1;
    }

    (f64::from(imant) / 10.0f64.powi(1 - ex)).min(x)
}

/// Which ends of the scale limits were replaced by [`snap_to_bin_grid`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Snapped {
    /// The lower limits were replaced.
    pub lower: bool,
    /// The upper limits were replaced.
    pub upper: bool,
}

/// Replace scale limits that coincide with the observable's own bin limits by those bin limits.
///
/// A lower limit counts as coinciding if it lies at most `bin_close` (relative) above the bin's
/// lower limit, an upper limit if it lies at most `bin_close` below the bin's upper limit. If,
/// for one dimension, more than `min_fraction` of all limits coincide, both ends of all bins are
/// replaced. Otherwise each end is replaced separately if more than `min_fraction` of its limits
/// coincide. Lower limits that were not replaced are finally compared with each other: if most
/// of them are close to one, close to zero or close to the lower limit of the first bin, they are
/// set to one, zero or their minimum, respectively.
pub fn snap_to_bin_grid(
    values: &mut [(f64, f64)],
    binning: &BinningModel,
    params: &WarmupParams,
) -> Snapped {
    let bins = binning.bins();
    let close = params.bin_close;
    let fraction = |count: usize| convert::f64_from_usize(count) / convert::f64_from_usize(bins);

    let counts: Vec<_> = (0..binning.dimensions())
        .map(|dim| {
            let lower = binning
                .left(dim)
                .iter()
                .zip(values.iter())
                .filter(|&(&edge, &(lo, _))| {
                    if edge == 0.0 {
                        lo < 1e-4
                    } else {
                        let diff = lo / edge - 1.0;
                        (0.0..close).contains(&diff)
                    }
                })
                .count();
            let upper = binning
                .right(dim)
                .iter()
                .zip(values.iter())
                .filter(|&(&edge, &(_, hi))| {
                    if edge == 0.0 {
                        hi < 1e-4
                    } else {
                        let diff = 1.0 - hi / edge;
                        (0.0..close).contains(&diff)
                    }
                })
                .count();
            (lower, upper)
        })
        .collect();

    for (dim, &(lower, upper)) in counts.iter().enumerate() {
        debug!("dimension {dim}: {lower} lower and {upper} upper limits are close to bin limits");

        if fraction(lower + upper) / 2.0 > params.min_fraction {
            info!(
                "{:.0}% of the scale limits are close to the limits of '{}', using them instead",
                fraction(lower + upper) * 50.0,
                binning.labels()[dim]
            );

            for (value, (lo, hi)) in values
                .iter_mut()
                .zip(binning.left(dim).into_iter().zip(binning.right(dim)))
            {
                *value = (lo, hi);
            }

            return Snapped {
                lower: true,
                upper: true,
            };
        }
    }

    let mut snapped = Snapped::default();

    if let Some(dim) = counts
        .iter()
        .position(|&(lower, _)| fraction(lower) > params.min_fraction)
    {
        info!(
            "lower scale limits are close to the lower limits of '{}', using them instead",
            binning.labels()[dim]
        );

        for (value, lo) in values.iter_mut().zip(binning.left(dim)) {
            value.0 = lo;
        }

        snapped.lower = true;
    }

    if let Some(dim) = counts
        .iter()
        .position(|&(_, upper)| fraction(upper) > params.min_fraction)
    {
        info!(
            "upper scale limits are close to the upper limits of '{}', using them instead",
            binning.labels()[dim]
        );

        for (value, hi) in values.iter_mut().zip(binning.right(dim)) {
            value.1 = hi;
        }

        snapped.upper = true;
    }

    if snapped.lower || values.is_empty() {
        return snapped;
    }

    let first = values[0].0;
    let near_one = values.iter().filter(|(lo, _)| (lo - 1.0).abs() < close).count();
    let near_zero = values.iter().filter(|(lo, _)| lo.abs() < close).count();
    let equal = values
        .iter()
        .filter(|(lo, _)| (lo / first - 1.0).abs() < close)
        .count();

    let replacement = if fraction(near_one) > params.min_fraction {
        info!("lower scale limits are close to one, using one instead");
        Some(1.0)
    } else if fraction(near_zero) > params.min_fraction {
        info!("lower scale limits are close to zero, using zero instead");
        Some(0.0)
    } else if fraction(equal) > params.min_fraction {
        info!("lower scale limits are almost identical, using their minimum instead");
        values.iter().map(|&(lo, _)| lo).reduce(f64::min)
    } else {
        None
    };

    if let Some(replacement) = replacement {
        for value in values.iter_mut() {
            value.0 = replacement;
        }

        snapped.lower = true;
    }

    snapped
}

/// Turn observed scale ranges into grid limits, one for each bin.
///
/// Limits are first compared with the bin limits using [`snap_to_bin_grid`], if enabled. Ends
/// that were not replaced are widened by `widening` (relative) unless they are close to a
/// multiple of 0.1, then rounded outwards to `digits` digits; values very close to an integer
/// keep that integer. Bins whose lower and upper limit agree within `1e-5` keep the observed
/// values. The result is never narrower than the observed range.
#[must_use]
pub fn round_scale_limits(
    raw: &[(f64, f64)],
    binning: &BinningModel,
    digits: i32,
    params: &WarmupParams,
) -> Vec<(f64, f64)> {
    let mut snapped_values = raw.to_vec();
    let snapped = if params.check_scale_limits_against_bins {
        snap_to_bin_grid(&mut snapped_values, binning, params)
    } else {
        Snapped::default()
    };
    let offset = 5.0 * 10.0f64.powi(-digits - 1);

    raw.iter()
        .zip(snapped_values)
        .map(|(&raw, snapped_value)| {
            let mut result = if snapped.lower && snapped.upper {
                snapped_value
            } else if is_degenerate(raw) {
                raw
            } else {
                let (lo, hi) = raw;
                let round = hi != 0.0 && (lo / hi - 1.0).abs() > 1e-4;

                let lo = if snapped.lower {
                    snapped_value.0
                } else {
                    let mut lo = if near_tenth(lo, 1e-3) {
                        lo
                    } else {
                        params.widening.mul_add(-lo.abs(), lo)
                    };
                    if round && !near_tenth(lo, 1e-6) {
                        lo -= offset;
                    }
                    lo = round_to_digits(lo, digits);
                    if raw.0 >= 1.0 && (raw.0 - raw.0.round()).abs() < 1e-3 {
                        lo = raw.0.round();
                    }
                    lo
                };

                let hi = if snapped.upper {
                    snapped_value.1
                } else {
                    let mut hi = if near_tenth(hi, 1e-3) {
                        hi
                    } else {
                        params.widening.mul_add(hi.abs(), hi)
                    };
                    if round && !near_tenth(hi, 1e-6) {
                        hi += offset;
                    }
                    hi = round_to_digits(hi, digits);
                    if raw.1 >= 1.0 && (raw.1 - raw.1.round()).abs() < 1e-3 {
                        hi = raw.1.round();
                    }
                    hi
                };

                (lo, hi)
            };

            widen(&mut result, raw);
            result
        })
        .collect()
}

/// Calibration data of one bin.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct WarmupRow {
    /// Lower limit of the `x` grids.
    pub x_min: f64,
    /// Largest observed `x`.
    pub x_max: f64,
    /// Limits of the first scale.
    pub mu1: (f64, f64),
    /// Limits of the second scale; only present for flexible tables.
    pub mu2: Option<(f64, f64)>,
    /// Lower and upper limits of the bin in each dimension.
    pub limits: Vec<(f64, f64)>,
    /// Size of the bin.
    pub bin_size: f64,
    /// Number of events the limits are based on.
    pub events: u64,
    /// Set if no events were seen and the limits are placeholders.
    #[serde(default)]
    pub dummy: bool,
}

/// Grid limits for every bin, either from a calibration run or given directly.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct WarmupTable {
    /// Descriptions of the scales.
    pub scale_descriptions: Vec<String>,
    /// Labels of the observable dimensions.
    pub dimension_labels: Vec<String>,
    /// How each dimension enters the bin size.
    pub diff: Vec<DiffKind>,
    /// Whether scale limits were compared with the bin limits.
    pub check_scale_limits_against_bins: bool,
    /// One row per bin.
    pub rows: Vec<WarmupRow>,
}

impl WarmupTable {
    /// Create a table with limits given directly instead of from a calibration run. `x_min` holds
    /// the lower `x` limit of each bin, `mu1` and `mu2` the scale limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the number of entries does not match the number of bins.
    pub fn from_limits(
        binning: &BinningModel,
        scale_descriptions: Vec<String>,
        x_min: &[f64],
        mu1: &[(f64, f64)],
        mu2: Option<&[(f64, f64)]>,
    ) -> Result<Self> {
        let bins = binning.bins();

        if x_min.len() != bins || mu1.len() != bins || mu2.is_some_and(|mu2| mu2.len() != bins) {
            return Err(Error::Config(format!(
                "grid limits must be given for each of the {bins} bins"
            )));
        }

        let rows = binning
            .iter()
            .zip(binning.bin_sizes())
            .enumerate()
            .map(|(bin, (observable, &bin_size))| WarmupRow {
                x_min: x_min[bin],
                x_max: 1.0,
                mu1: mu1[bin],
                mu2: mu2.map(|mu2| mu2[bin]),
                limits: observable.limits().to_vec(),
                bin_size,
                events: 0,
                dummy: false,
            })
            .collect();

        Ok(Self {
            scale_descriptions,
            dimension_labels: binning.labels().to_vec(),
            diff: binning.diff().to_vec(),
            check_scale_limits_against_bins: false,
            rows,
        })
    }

    /// Return the number of bins.
    #[must_use]
    pub fn bins(&self) -> usize {
        self.rows.len()
    }

    /// Compare this table with `binning`. Different numbers of bins or dimensions, different
    /// differential flags and missing second-scale limits for flexible tables are errors.
    /// Differences of bin limits larger than `1e-8`, relative differences of bin sizes larger
    /// than `1e-4` and placeholder rows are logged as warnings, or returned as errors if `strict`
    /// is `true`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mismatch`] or, in strict mode, [`Error::NearMismatch`].
    pub fn check_consistency(
        &self,
        binning: &BinningModel,
        flexible: bool,
        strict: bool,
    ) -> Result<()> {
        if self.bins() != binning.bins() {
            return Err(Error::Mismatch(format!(
                "calibration data has {} bins, the binning has {}",
                self.bins(),
                binning.bins()
            )));
        }

        if self.diff.len() != binning.dimensions() {
            return Err(Error::Mismatch(format!(
                "calibration data has {} dimensions, the binning has {}",
                self.diff.len(),
                binning.dimensions()
            )));
        }

        if self.diff != binning.diff() {
            return Err(Error::Mismatch(format!(
                "calibration data has differential flags {:?}, the binning has {:?}",
                self.diff,
                binning.diff()
            )));
        }

        if flexible {
            if let Some(bin) = self.rows.iter().position(|row| row.mu2.is_none()) {
                return Err(Error::Mismatch(format!(
                    "flexible-scale tables need limits for the second scale, missing in bin {bin}"
                )));
            }
        }

        let mut deviations = Vec::new();

        for (bin, (row, observable)) in self.rows.iter().zip(binning.iter()).enumerate() {
            let limits_differ = row.limits.len() != observable.dimensions()
                || row
                    .limits
                    .iter()
                    .zip(observable.limits())
                    .any(|(a, b)| {
                        (a.0 - b.0).abs() > BIN_LIMIT_EPS || (a.1 - b.1).abs() > BIN_LIMIT_EPS
                    });

            if limits_differ {
                deviations.push(format!(
                    "bin {bin} has limits {:?} in the calibration data and {:?} in the binning",
                    row.limits,
                    observable.limits()
                ));
            }

            let size = binning.bin_sizes()[bin];

            if (row.bin_size / size - 1.0).abs() > BIN_SIZE_EPS {
                deviations.push(format!(
                    "bin {bin} has size {} in the calibration data and {size} in the binning",
                    row.bin_size
                ));
            }

            if row.dummy {
                deviations.push(format!("bin {bin} has placeholder limits"));
            }
        }

        if deviations.is_empty() {
            Ok(())
        } else if strict {
            Err(Error::NearMismatch(deviations.join("; ")))
        } else {
            for deviation in &deviations {
                warn!("calibration data deviates from the binning: {deviation}");
            }
            Ok(())
        }
    }

    /// Deserialize a table from YAML.
    ///
    /// # Errors
    ///
    /// Returns an error if reading or parsing fails.
    pub fn read(reader: impl Read) -> Result<Self> {
        serde_yaml::from_reader(reader).map_err(|err| Error::Other(err.into()))
    }

    /// Serialize this table as YAML into `writer`.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn write(&self, writer: impl Write) -> Result<()> {
        serde_yaml::to_writer(writer, self).map_err(|err| Error::Other(err.into()))
    }
}
