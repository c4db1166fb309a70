//! Configuration of a table: process, interpolation and calibration settings.

use super::error::{Error, Result};
use super::interpolation::{KernelKind, Map, NodeCounting};
use super::process::PdfDim;
use serde::{Deserialize, Serialize};

/// Interpolation settings of one dimension.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct AxisConfig {
    /// Interpolation kernel.
    pub kernel: KernelKind,
    /// Map in which the nodes are evenly spaced.
    pub map: Map,
    /// Number of nodes. For `x` grids its meaning depends on [`TableConfig::x_counting`].
    pub nodes: usize,
}

impl AxisConfig {
    /// Default settings for `x` grids.
    #[must_use]
    pub const fn x() -> Self {
        Self {
            kernel: KernelKind::Lagrange,
            map: Map::SqrtLog10,
            nodes: 15,
        }
    }

    /// Default settings for scale grids.
    #[must_use]
    pub const fn scale() -> Self {
        Self {
            kernel: KernelKind::Lagrange,
            map: Map::LogLog { shift: 0.25 },
            nodes: 6,
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.nodes == 0 {
            return Err(Error::Config(format!("{name} grid needs at least one node")));
        }

        if let Map::LogLog { shift } = self.map {
            if !(shift.is_finite() && shift > 0.0) {
                return Err(Error::Config(format!(
                    "{name} grid has the invalid loglog shift {shift}"
                )));
            }
        }

        Ok(())
    }
}

/// How the scale dependence is stored.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum ScaleMode {
    /// Two independent scales are interpolated, and the logarithms of the renormalization and
    /// factorization scale are stored as separate coefficient components.
    Flexible {
        /// Grid settings of the first scale.
        mu1: AxisConfig,
        /// Grid settings of the second scale.
        mu2: AxisConfig,
    },
    /// One scale is interpolated, once for each factor it is multiplied with.
    Fixed {
        /// Grid settings of the scale.
        mu: AxisConfig,
        /// Scale factors; the first one is the central choice.
        factors: Vec<f64>,
    },
}

impl Default for ScaleMode {
    fn default() -> Self {
        Self::Fixed {
            mu: AxisConfig::scale(),
            factors: vec![1.0],
        }
    }
}

impl ScaleMode {
    /// Return `true` for [`ScaleMode::Flexible`].
    #[must_use]
    pub const fn is_flexible(&self) -> bool {
        matches!(self, Self::Flexible { .. })
    }

    /// Return the number of scale variations; flexible tables have exactly one.
    #[must_use]
    pub fn variations(&self) -> usize {
        match self {
            Self::Flexible { .. } => 1,
            Self::Fixed { factors, .. } => factors.len(),
        }
    }
}

/// Heuristics that turn observed calibration extrema into grid limits.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct WarmupParams {
    /// Number of tenths of the mantissa subtracted from the smallest observed `x`.
    pub x_margin: i32,
    /// Digits the limits of the first scale are rounded to.
    pub digits_mu1: i32,
    /// Digits the limits of the second scale are rounded to.
    pub digits_mu2: i32,
    /// Relative amount by which scale limits are widened.
    pub widening: f64,
    /// Relative distance below which a scale limit counts as identical to a bin limit.
    pub bin_close: f64,
    /// Fraction of bins whose limits must be close to the bin limits before all are replaced.
    pub min_fraction: f64,
    /// Whether scale limits are compared with the bin limits at all.
    pub check_scale_limits_against_bins: bool,
    /// Smallest `x` limit that is ever written.
    pub x_floor: f64,
}

impl Default for WarmupParams {
    fn default() -> Self {
        Self {
            x_margin: 4,
            digits_mu1: 1,
            digits_mu2: 2,
            widening: 0.02,
            bin_close: 0.04,
            min_fraction: 0.7,
            check_scale_limits_against_bins: true,
            x_floor: 1e-6,
        }
    }
}

/// Complete configuration of a table.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct TableConfig {
    /// Hadrons in the initial state.
    pub pdf_dim: PdfDim,
    /// Number of subprocesses.
    pub subprocesses: usize,
    /// Pairs of subprocesses that are exchanged when the two hadrons are swapped.
    pub asymmetric_processes: Vec<(usize, usize)>,
    /// Settings of the `x` grids.
    pub x: AxisConfig,
    /// How the number of `x` nodes is determined.
    pub x_counting: NodeCounting,
    /// Settings of the scale grids.
    pub scale: ScaleMode,
    /// Descriptions of the scales, one for fixed and two for flexible tables.
    pub scale_descriptions: Vec<String>,
    /// Multiply `x` node weights with a function that flattens parton densities.
    pub pdf_reweighting: bool,
    /// Number of distinct events merged before they are filled; values below two disable the
    /// cache. Only flexible tables use the cache, fixed tables with scale variations must disable
    /// it.
    pub cache_max: usize,
    /// Turn small differences between the calibration data and the binning into errors.
    pub strict_warmup_check: bool,
    /// Calibration heuristics.
    pub warmup: WarmupParams,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            pdf_dim: PdfDim::HalfMatrix,
            subprocesses: 7,
            asymmetric_processes: vec![(3, 4), (4, 3), (5, 6), (6, 5)],
            x: AxisConfig::x(),
            x_counting: NodeCounting::NodesPerBin,
            scale: ScaleMode::default(),
            scale_descriptions: vec!["scale1".to_owned()],
            pdf_reweighting: true,
            cache_max: 20,
            strict_warmup_check: false,
            warmup: WarmupParams::default(),
        }
    }
}

impl TableConfig {
    /// Check the configuration for values that can not be used.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.subprocesses == 0 {
            return Err(Error::Config("at least one subprocess is needed".to_owned()));
        }

        self.x.validate("x")?;

        let descriptions = match &self.scale {
            ScaleMode::Flexible { mu1, mu2 } => {
                mu1.validate("mu1")?;
                mu2.validate("mu2")?;
                2
            }
            ScaleMode::Fixed { mu, factors } => {
                mu.validate("mu")?;

                if factors.is_empty() {
                    return Err(Error::Config(
                        "fixed-scale tables need at least one scale factor".to_owned(),
                    ));
                }

                if let Some(factor) = factors.iter().find(|f| !(f.is_finite() && **f > 0.0)) {
                    return Err(Error::Config(format!("invalid scale factor {factor}")));
                }

                if factors.len() > 1 && self.cache_max > 1 {
                    return Err(Error::Config(
                        "the weight cache is not supported for scale variations of fixed-scale \
                         tables, set `cache_max` to 0"
                            .to_owned(),
                    ));
                }

                1
            }
        };

        if self.scale_descriptions.len() != descriptions {
            return Err(Error::Config(format!(
                "expected {descriptions} scale description(s), found {}",
                self.scale_descriptions.len()
            )));
        }

        let warmup = &self.warmup;

        if warmup.digits_mu1 < 0 || warmup.digits_mu2 < 0 {
            return Err(Error::Config("number of digits must not be negative".to_owned()));
        }

        if !(warmup.widening >= 0.0 && warmup.bin_close > 0.0) {
            return Err(Error::Config(
                "warmup widening must not be negative and bin closeness must be positive"
                    .to_owned(),
            ));
        }

        if !(0.0..=1.0).contains(&warmup.min_fraction) {
            return Err(Error::Config(format!(
                "warmup fraction {} is not in [0, 1]",
                warmup.min_fraction
            )));
        }

        if !(warmup.x_floor > 0.0 && warmup.x_floor < 1.0) {
            return Err(Error::Config(format!(
                "smallest x limit {} is not in (0, 1)",
                warmup.x_floor
            )));
        }

        Ok(())
    }

    /// Deserialize a configuration from YAML. Missing entries take their default values.
    ///
    /// # Errors
    ///
    /// Returns an error if `yaml` can not be parsed.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|err| Error::Other(err.into()))
    }

    /// Serialize this configuration as YAML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|err| Error::Other(err.into()))
    }
}
