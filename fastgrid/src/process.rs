//! Index bookkeeping for subprocesses and the momentum fractions of one or two hadrons.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Number of hadrons in the initial state and how their momentum-fraction nodes are combined.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum PdfDim {
    /// One hadron; the x index is the node index.
    SingleHadron,
    /// Two identical hadrons with a symmetric PDF combination; only pairs with the first node
    /// index not larger than the second are stored.
    HalfMatrix,
    /// Two hadrons; all node pairs are stored.
    FullMatrix,
}

impl PdfDim {
    /// Return the number of hadrons in the initial state.
    #[must_use]
    pub const fn hadrons(self) -> usize {
        match self {
            Self::SingleHadron => 1,
            Self::HalfMatrix | Self::FullMatrix => 2,
        }
    }
}

/// Table mapping each subprocess onto the subprocess obtained by exchanging the two hadrons.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SymmetricProcesses(Vec<usize>);

impl SymmetricProcesses {
    /// Create the table for `subprocesses` subprocesses. Every subprocess is symmetric unless it
    /// appears in one of the `asymmetric` pairs, in which case both members of the pair are
    /// mapped onto each other. Pairs referring to subprocesses that do not exist are ignored.
    #[must_use]
    pub fn new(subprocesses: usize, asymmetric: &[(usize, usize)]) -> Self {
        let mut table: Vec<_> = (0..subprocesses).collect();

        for &(a, b) in asymmetric {
            if a >= subprocesses || b >= subprocesses {
                warn!(
                    "subprocess {a} is requested to be asymmetric with subprocess {b}, but there \
                     are only {subprocesses} subprocesses, ignoring the pair"
                );
                continue;
            }

            table[a] = b;
            table[b] = a;
        }

        Self(table)
    }

    /// Return the subprocess obtained by exchanging the hadrons in `subprocess`.
    ///
    /// # Panics
    ///
    /// Panics if `subprocess` is out of range.
    #[must_use]
    pub fn get(&self, subprocess: usize) -> usize {
        self.0[subprocess]
    }

    /// Return the number of subprocesses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Return `true` if there are no subprocesses.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Maps momentum fractions and node pairs onto the x index of the coefficient tensor.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct HalfMatrixIndexer {
    dim: PdfDim,
    symmetric: SymmetricProcesses,
}

impl HalfMatrixIndexer {
    /// Constructor.
    #[must_use]
    pub const fn new(dim: PdfDim, symmetric: SymmetricProcesses) -> Self {
        Self { dim, symmetric }
    }

    /// Return the hadron configuration.
    #[must_use]
    pub const fn dim(&self) -> PdfDim {
        self.dim
    }

    /// Return the table of symmetric subprocesses.
    #[must_use]
    pub const fn symmetric(&self) -> &SymmetricProcesses {
        &self.symmetric
    }

    /// Return the momentum fractions interpolated on the first and second x grid together with
    /// the subprocess they belong to. For a half matrix the smaller fraction comes first and the
    /// subprocess is exchanged if the hadrons were swapped.
    #[must_use]
    pub fn order(&self, x1: f64, x2: f64, subprocess: usize) -> (f64, f64, usize) {
        match self.dim {
            PdfDim::HalfMatrix if x2 > x1 => (x1, x2, self.symmetric.get(subprocess)),
            PdfDim::HalfMatrix => (x2, x1, subprocess),
            PdfDim::SingleHadron | PdfDim::FullMatrix => (x1, x2, subprocess),
        }
    }

    /// Bring the node pair `(i1, i2)` into canonical order. For a half matrix the pair is swapped
    /// if `i1 > i2`, and the subprocess is exchanged with it.
    #[must_use]
    pub fn canonicalize(&self, i1: usize, i2: usize, subprocess: usize) -> (usize, usize, usize) {
        if self.dim == PdfDim::HalfMatrix && i1 > i2 {
            (i2, i1, self.symmetric.get(subprocess))
        } else {
            (i1, i2, subprocess)
        }
    }

    /// Return the x index of the canonical node pair `(i1, i2)`; `nx1` is the number of nodes of
    /// the first x grid.
    #[must_use]
    pub const fn x_index(&self, i1: usize, i2: usize, nx1: usize) -> usize {
        match self.dim {
            PdfDim::SingleHadron => i1,
            PdfDim::HalfMatrix => i1 + i2 * (i2 + 1) / 2,
            PdfDim::FullMatrix => i1 + i2 * nx1,
        }
    }

    /// Return the number of x indices for grids with `nx1` and `nx2` nodes.
    #[must_use]
    pub const fn x_combinations(&self, nx1: usize, nx2: usize) -> usize {
        match self.dim {
            PdfDim::SingleHadron => nx1,
            PdfDim::HalfMatrix => (nx1 * nx1 + nx1) / 2,
            PdfDim::FullMatrix => nx1 * nx2,
        }
    }
}
