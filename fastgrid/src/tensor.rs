//! Flat storage of the interpolation coefficients.

use super::error::{Error, Result};
use super::nodes::{BinGrids, ScaleGrids};
use super::process::HalfMatrixIndexer;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Number of dimensions of each bin's block.
pub const RANK: usize = 4;

/// Scale dependence of a coefficient component.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ScaleDep {
    /// Scale-independent part.
    Central,
    /// Coefficient of `ln(mu_f^2)`.
    Fact,
    /// Coefficient of `ln(mu_r^2)`.
    Ren,
    /// Coefficient of `ln^2(mu_r^2)`.
    RenRen,
    /// Coefficient of `ln^2(mu_f^2)`.
    FactFact,
    /// Coefficient of `ln(mu_r^2) ln(mu_f^2)`.
    RenFact,
}

impl ScaleDep {
    /// All components in storage order.
    pub const ALL: [Self; 6] = [
        Self::Central,
        Self::Fact,
        Self::Ren,
        Self::RenRen,
        Self::FactFact,
        Self::RenFact,
    ];

    const fn position(self) -> usize {
        self as usize
    }
}

impl Display for ScaleDep {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Return the linear index of `multi_index` in a row-major array of the given `shape`.
///
/// # Panics
///
/// Panics if the lengths of `multi_index` and `shape` differ.
#[must_use]
pub fn ravel_multi_index(multi_index: &[usize], shape: &[usize]) -> usize {
    assert_eq!(multi_index.len(), shape.len());

    multi_index
        .iter()
        .zip(shape)
        .fold(0, |acc, (i, d)| acc * d + i)
}

/// Shapes and offsets of the per-bin blocks.
///
/// Fixed-scale tables order each block as (scale variation, scale node, `x` index, subprocess),
/// flexible-scale tables as (`x` index, first scale node, second scale node, subprocess).
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Layout {
    shapes: Vec<[usize; RANK]>,
    offsets: Vec<usize>,
}

impl Layout {
    /// Create a layout from the shape of each bin's block.
    #[must_use]
    pub fn new(shapes: Vec<[usize; RANK]>) -> Self {
        let offsets = shapes
            .iter()
            .scan(0, |offset, shape| {
                let start = *offset;
                *offset += shape.iter().product::<usize>();
                Some(start)
            })
            .collect();

        Self { shapes, offsets }
    }

    /// Derive the layout from the node grids of each bin.
    #[must_use]
    pub fn from_grids(
        grids: &[BinGrids],
        indexer: &HalfMatrixIndexer,
        subprocesses: usize,
    ) -> Self {
        Self::new(
            grids
                .iter()
                .map(|grid| {
                    let nx = grid.x.len();
                    let x = indexer.x_combinations(nx, nx);

                    match &grid.scales {
                        ScaleGrids::Flexible { mu1, mu2 } => {
                            [x, mu1.len(), mu2.len(), subprocesses]
                        }
                        ScaleGrids::Fixed(variations) => {
                            let mu = variations.iter().map(|v| v.len()).max().unwrap_or(0);
                            [variations.len(), mu, x, subprocesses]
                        }
                    }
                })
                .collect(),
        )
    }

    /// Return the number of bins.
    #[must_use]
    pub fn bins(&self) -> usize {
        self.shapes.len()
    }

    /// Return the shape of the block of `bin`.
    #[must_use]
    pub fn shape(&self, bin: usize) -> Option<&[usize; RANK]> {
        self.shapes.get(bin)
    }

    /// Return the total number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.offsets
            .last()
            .zip(self.shapes.last())
            .map_or(0, |(offset, shape)| offset + shape.iter().product::<usize>())
    }

    /// Return `true` if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the position of `index` in the block of `bin`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if `bin` or one of the indices is out of range.
    pub fn index(&self, bin: usize, index: [usize; RANK]) -> Result<usize> {
        let shape = self
            .shapes
            .get(bin)
            .ok_or_else(|| Error::Internal(format!("bin {bin} is out of range")))?;

        if index.iter().zip(shape).any(|(i, d)| i >= d) {
            return Err(Error::Internal(format!(
                "index {index:?} is out of bounds for bin {bin} with shape {shape:?}"
            )));
        }

        Ok(self.offsets[bin] + ravel_multi_index(&index, shape))
    }

    /// Return the range of positions belonging to `bin`.
    fn range(&self, bin: usize) -> std::ops::Range<usize> {
        let start = self.offsets[bin];
        start..start + self.shapes[bin].iter().product::<usize>()
    }
}

/// Coefficients of all bins, one flat array per scale-dependence component.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CoefficientTensor {
    layout: Layout,
    components: Vec<Vec<f64>>,
}

impl CoefficientTensor {
    /// Allocate a tensor with the given `layout`. Flexible-scale tables store all six components
    /// of [`ScaleDep::ALL`], fixed-scale tables only [`ScaleDep::Central`].
    #[must_use]
    pub fn new(layout: Layout, flexible: bool) -> Self {
        let count = if flexible { ScaleDep::ALL.len() } else { 1 };
        let components = vec![vec![0.0; layout.len()]; count];

        Self { layout, components }
    }

    /// Return the layout.
    #[must_use]
    pub const fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Return the stored components.
    pub fn scale_deps(&self) -> impl Iterator<Item = ScaleDep> + '_ {
        ScaleDep::ALL.into_iter().take(self.components.len())
    }

    /// Return all coefficients of `dep`, or `None` if the component is not stored.
    #[must_use]
    pub fn component(&self, dep: ScaleDep) -> Option<&[f64]> {
        self.components.get(dep.position()).map(Vec::as_slice)
    }

    /// Return the coefficients of `dep` belonging to `bin`.
    #[must_use]
    pub fn bin(&self, dep: ScaleDep, bin: usize) -> Option<&[f64]> {
        (bin < self.layout.bins())
            .then(|| self.component(dep).map(|c| &c[self.layout.range(bin)]))
            .flatten()
    }

    /// Return the coefficient at `index` of `bin`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the component is not stored or the index is out of range.
    pub fn get(&self, dep: ScaleDep, bin: usize, index: [usize; RANK]) -> Result<f64> {
        let position = self.layout.index(bin, index)?;
        let component = self
            .component(dep)
            .ok_or_else(|| Error::Internal(format!("component {dep} is not stored")))?;

        Ok(component[position])
    }

    /// Add `value` to the coefficient at `index` of `bin`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the component is not stored or the index is out of range.
    pub fn add(
        &mut self,
        dep: ScaleDep,
        bin: usize,
        index: [usize; RANK],
        value: f64,
    ) -> Result<()> {
        let position = self.layout.index(bin, index)?;
        let component = self
            .components
            .get_mut(dep.position())
            .ok_or_else(|| Error::Internal(format!("component {dep} is not stored")))?;

        component[position] += value;

        Ok(())
    }

    /// Return `true` if all coefficients of `dep` vanish. Components that are not stored vanish.
    #[must_use]
    pub fn is_zero(&self, dep: ScaleDep) -> bool {
        self.component(dep)
            .is_none_or(|c| c.iter().all(|&value| value == 0.0))
    }

    /// Multiply every coefficient with `factor`.
    pub fn scale(&mut self, factor: f64) {
        self.components
            .iter_mut()
            .flatten()
            .for_each(|value| *value *= factor);
    }

    /// Multiply the coefficients of each bin and subprocess with `factor(bin, subprocess)`. The
    /// subprocess is the innermost index of every block.
    pub fn scale_by(&mut self, factor: impl Fn(usize, usize) -> f64) {
        for bin in 0..self.layout.bins() {
            let range = self.layout.range(bin);
            let subprocesses = self.layout.shapes[bin][RANK - 1];

            for component in &mut self.components {
                for (i, value) in component[range.clone()].iter_mut().enumerate() {
                    *value *= factor(bin, i % subprocesses);
                }
            }
        }
    }

    /// Add `weight` times the coefficients of `other`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mismatch`] if the layouts or the stored components differ.
    pub fn merge(&mut self, other: &Self, weight: f64) -> Result<()> {
        if self.layout != other.layout || self.components.len() != other.components.len() {
            return Err(Error::Mismatch(
                "coefficient tensors with different layouts can not be merged".to_owned(),
            ));
        }

        for (lhs, rhs) in self.components.iter_mut().zip(&other.components) {
            for (a, b) in lhs.iter_mut().zip(rhs) {
                *a += weight * b;
            }
        }

        Ok(())
    }
}
