//! Module that contains helpers for binning observables

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

/// Largest number of dimensions an observable binning may have.
pub const MAX_DIMENSIONS: usize = 3;

/// How a dimension of the binning enters the bin size.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum DiffKind {
    /// The cross section is integrated over this dimension; its width is not divided out.
    NonDifferential,
    /// Each bin is a single point in this dimension.
    PointWise,
    /// The cross section is differential in this dimension; its width enters the bin size.
    Differential,
}

/// Error type returned when a [`BinningModel`] is constructed from inconsistent data.
#[derive(Debug, Error)]
pub enum BinningError {
    /// Returned if no bins were given.
    #[error("a binning needs at least one bin")]
    Empty,
    /// Returned if the number of dimensions is not supported.
    #[error("binnings with {dimensions} dimensions are not supported, at most three are")]
    Dimensions {
        /// Number of dimensions that were requested.
        dimensions: usize,
    },
    /// Returned if the labels or differential flags do not match the number of dimensions.
    #[error("expected {expected} labels and differential flags, found {labels} and {flags}")]
    DimensionDescription {
        /// Number of dimensions.
        expected: usize,
        /// Number of labels.
        labels: usize,
        /// Number of differential flags.
        flags: usize,
    },
    /// Returned if a bin has a different number of dimensions than the first bin.
    #[error("bin {bin} has {found} dimensions, expected {expected}")]
    InconsistentDimensions {
        /// Index of the offending bin.
        bin: usize,
        /// Number of dimensions of the first bin.
        expected: usize,
        /// Number of dimensions of the offending bin.
        found: usize,
    },
    /// Returned if a lower limit is larger than its upper limit or a limit is not finite.
    #[error("bin {bin} has invalid limits [{lower}, {upper}] in dimension {dimension}")]
    InvalidLimits {
        /// Index of the offending bin.
        bin: usize,
        /// Dimension with the invalid limits.
        dimension: usize,
        /// Lower limit.
        lower: f64,
        /// Upper limit.
        upper: f64,
    },
    /// Returned if the bins are not ordered by their lower limits.
    #[error("bin {bin} is not ordered after bin {}", .bin - 1)]
    NotOrdered {
        /// Index of the first bin that is out of order.
        bin: usize,
    },
    /// Returned if two bins overlap.
    #[error("bins {first} and {second} overlap")]
    Overlap {
        /// Index of the first bin.
        first: usize,
        /// Index of the second bin.
        second: usize,
    },
    /// Returned if the number of explicitly given bin sizes differs from the number of bins.
    #[error("got {found} bin sizes for {expected} bins")]
    SizeCount {
        /// Number of bins.
        expected: usize,
        /// Number of bin sizes.
        found: usize,
    },
    /// Returned if a bin size is not positive or not finite.
    #[error("bin {bin} has the invalid size {size}")]
    InvalidSize {
        /// Index of the offending bin.
        bin: usize,
        /// The size.
        size: f64,
    },
}

/// Limits of a single bin in each dimension of the observable.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ObservableBin {
    limits: Vec<(f64, f64)>,
}

impl ObservableBin {
    /// Constructor. Each tuple holds the lower and upper limit of one dimension.
    #[must_use]
    pub const fn new(limits: Vec<(f64, f64)>) -> Self {
        Self { limits }
    }

    /// Return tuples of lower and upper limits, one for each dimension.
    #[must_use]
    pub fn limits(&self) -> &[(f64, f64)] {
        &self.limits
    }

    /// Return the number of dimensions.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.limits.len()
    }

    /// Return the lower limit in `dimension`.
    ///
    /// # Panics
    ///
    /// Panics if `dimension` is out of range.
    #[must_use]
    pub fn lower(&self, dimension: usize) -> f64 {
        self.limits[dimension].0
    }

    /// Return the upper limit in `dimension`.
    ///
    /// # Panics
    ///
    /// Panics if `dimension` is out of range.
    #[must_use]
    pub fn upper(&self, dimension: usize) -> f64 {
        self.limits[dimension].1
    }

    fn contains(&self, point: &[f64]) -> bool {
        self.limits.iter().zip(point).all(|(&(lower, upper), &value)| {
            if lower == upper {
                value == lower
            } else {
                (lower <= value) && (value < upper)
            }
        })
    }

    fn overlaps(&self, other: &Self) -> bool {
        self.limits
            .iter()
            .zip(&other.limits)
            .all(|(&(l1, u1), &(l2, u2))| ((l1 == l2) && (u1 == u2)) || (l1.max(l2) < u1.min(u2)))
    }

    fn cmp_lower(&self, other: &Self) -> Option<Ordering> {
        self.limits
            .iter()
            .map(|limits| limits.0)
            .partial_cmp(other.limits.iter().map(|limits| limits.0))
    }
}

/// Binning of an observable with one to three dimensions. Validated once at construction and
/// immutable afterwards.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct BinningModel {
    labels: Vec<String>,
    diff: Vec<DiffKind>,
    bins: Vec<ObservableBin>,
    normalization: f64,
    sizes: Vec<f64>,
}

impl BinningModel {
    /// Create a new binning. The size of each bin is the product of the widths of all
    /// [`DiffKind::Differential`] dimensions times `normalization`; if no dimension is
    /// differential each bin has size one.
    ///
    /// # Errors
    ///
    /// Returns an error if there are no bins, if the number of dimensions is unsupported or
    /// inconsistent, if limits are inverted or not finite, if the bins are not ordered by their
    /// lower limits, if two bins overlap or if a bin size is not positive.
    pub fn new(
        labels: Vec<String>,
        diff: Vec<DiffKind>,
        bins: Vec<ObservableBin>,
        normalization: f64,
    ) -> Result<Self, BinningError> {
        let dimensions = bins.first().ok_or(BinningError::Empty)?.dimensions();

        if !(1..=MAX_DIMENSIONS).contains(&dimensions) {
            return Err(BinningError::Dimensions { dimensions });
        }

        if labels.len() != dimensions || diff.len() != dimensions {
            return Err(BinningError::DimensionDescription {
                expected: dimensions,
                labels: labels.len(),
                flags: diff.len(),
            });
        }

        for (index, bin) in bins.iter().enumerate() {
            if bin.dimensions() != dimensions {
                return Err(BinningError::InconsistentDimensions {
                    bin: index,
                    expected: dimensions,
                    found: bin.dimensions(),
                });
            }

            for (dimension, &(lower, upper)) in bin.limits().iter().enumerate() {
                if !lower.is_finite() || !upper.is_finite() || (lower > upper) {
                    return Err(BinningError::InvalidLimits {
                        bin: index,
                        dimension,
                        lower,
                        upper,
                    });
                }
            }
        }

        for (index, pair) in bins.windows(2).enumerate() {
            if pair[0].cmp_lower(&pair[1]) == Some(Ordering::Greater) {
                return Err(BinningError::NotOrdered { bin: index + 1 });
            }
        }

        for (first, lhs) in bins.iter().enumerate() {
            if let Some(second) = bins
                .iter()
                .enumerate()
                .skip(first + 1)
                .find_map(|(second, rhs)| lhs.overlaps(rhs).then_some(second))
            {
                return Err(BinningError::Overlap { first, second });
            }
        }

        let differential = diff.contains(&DiffKind::Differential);
        let sizes = bins
            .iter()
            .map(|bin| {
                if differential {
                    bin.limits()
                        .iter()
                        .zip(&diff)
                        .filter(|&(_, &kind)| kind == DiffKind::Differential)
                        .map(|(&(lower, upper), _)| upper - lower)
                        .product::<f64>()
                        * normalization
                } else {
                    1.0
                }
            })
            .collect();

        let result = Self {
            labels,
            diff,
            bins,
            normalization,
            sizes,
        };

        result.check_sizes()?;

        Ok(result)
    }

    /// Create a one-dimensional binning from consecutive bin `edges`.
    ///
    /// # Errors
    ///
    /// See [`BinningModel::new`].
    pub fn from_edges(
        label: &str,
        diff: DiffKind,
        edges: &[f64],
        normalization: f64,
    ) -> Result<Self, BinningError> {
        Self::new(
            vec![label.to_owned()],
            vec![diff],
            edges
                .windows(2)
                .map(|pair| ObservableBin::new(vec![(pair[0], pair[1])]))
                .collect(),
            normalization,
        )
    }

    /// Replace the computed bin sizes with `sizes`. Entries that are zero are replaced by one.
    ///
    /// # Errors
    ///
    /// Returns an error if the number of sizes does not match the number of bins or if a size is
    /// negative or not finite.
    pub fn with_bin_sizes(mut self, sizes: Vec<f64>) -> Result<Self, BinningError> {
        if sizes.len() != self.bins() {
            return Err(BinningError::SizeCount {
                expected: self.bins(),
                found: sizes.len(),
            });
        }

        self.sizes = sizes
            .into_iter()
            .map(|size| if size == 0.0 { 1.0 } else { size })
            .collect();
        self.check_sizes()?;

        Ok(self)
    }

    fn check_sizes(&self) -> Result<(), BinningError> {
        match self
            .sizes
            .iter()
            .enumerate()
            .find(|&(_, &size)| !(size.is_finite() && size > 0.0))
        {
            Some((bin, &size)) => Err(BinningError::InvalidSize { bin, size }),
            None => Ok(()),
        }
    }

    /// Return the number of bins.
    #[must_use]
    pub fn bins(&self) -> usize {
        self.bins.len()
    }

    /// Return the number of dimensions.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.diff.len()
    }

    /// Return the labels of each dimension.
    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Return how each dimension enters the bin size.
    #[must_use]
    pub fn diff(&self) -> &[DiffKind] {
        &self.diff
    }

    /// Return the normalization factor applied to differential bin sizes.
    #[must_use]
    pub const fn normalization(&self) -> f64 {
        self.normalization
    }

    /// Return the bin with index `bin`, or `None` if it does not exist.
    #[must_use]
    pub fn bin(&self, bin: usize) -> Option<&ObservableBin> {
        self.bins.get(bin)
    }

    /// Return an iterator over all bins.
    pub fn iter(&self) -> impl Iterator<Item = &ObservableBin> {
        self.bins.iter()
    }

    /// Return the sizes of all bins.
    #[must_use]
    pub fn bin_sizes(&self) -> &[f64] {
        &self.sizes
    }

    /// Return all lower limits of `dimension`. If the dimension does not exist, an empty vector is
    /// returned.
    #[must_use]
    pub fn left(&self, dimension: usize) -> Vec<f64> {
        if dimension >= self.dimensions() {
            vec![]
        } else {
            self.bins.iter().map(|bin| bin.lower(dimension)).collect()
        }
    }

    /// Return all upper limits of `dimension`. If the dimension does not exist, an empty vector is
    /// returned.
    #[must_use]
    pub fn right(&self, dimension: usize) -> Vec<f64> {
        if dimension >= self.dimensions() {
            vec![]
        } else {
            self.bins.iter().map(|bin| bin.upper(dimension)).collect()
        }
    }

    /// Return the index of the bin containing `point`. Lower limits are inclusive, upper limits
    /// exclusive. Returns `None` if `point` has the wrong number of dimensions or lies in no bin.
    #[must_use]
    pub fn index(&self, point: &[f64]) -> Option<usize> {
        if point.len() != self.dimensions() {
            return None;
        }

        self.bins.iter().position(|bin| bin.contains(point))
    }
}
