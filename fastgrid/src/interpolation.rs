//! Interpolation kernels and the coordinate maps in which their nodes are evenly spaced.

use super::convert;
use super::error::{Error, Result};
use arrayvec::ArrayVec;
use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::iter;
use std::str::FromStr;

/// Largest number of nodes a single interpolation touches.
pub const INTERP_WINDOW_MAX: usize = 4;

/// Pairs of node index and node weight, ordered by node index.
pub type NodeWeights = ArrayVec<(usize, f64), INTERP_WINDOW_MAX>;

// positions closer to a node than this, in units of the node spacing, are treated as on the node
const EXACT_NODE_TOLERANCE: f64 = 1e-10;

/// Weight function that flattens the typical `x` dependence of parton densities. Returns `None`
/// if `x` is not strictly positive or if the weight is zero or not finite.
#[must_use]
pub fn reweight_x(x: f64) -> Option<f64> {
    if x <= 0.0 {
        return None;
    }

    let w = 0.99f64.mul_add(-x, 1.0) / x.sqrt();
    let result = w * w * w;

    (result.is_finite() && result != 0.0).then_some(result)
}

fn lagrange_weights(i: usize, n: usize, u: f64) -> f64 {
    let mut factorials = 1;
    let mut product = 1.0;
    for z in 0..i {
        product *= u - convert::f64_from_usize(z);
        factorials *= i - z;
    }
    for z in i + 1..=n {
        product *= convert::f64_from_usize(z) - u;
        factorials *= z - i;
    }
    product / convert::f64_from_usize(factorials)
}

fn add_weight(weights: &mut NodeWeights, index: usize, weight: f64) {
    if let Some((_, w)) = weights.iter_mut().find(|(i, _)| *i == index) {
        *w += weight;
    } else {
        weights.push((index, weight));
    }
}

/// Mapping between a physical coordinate and the distance space in which interpolation nodes are
/// evenly spaced.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub enum Map {
    /// The identity.
    Linear,
    /// Decimal logarithm.
    Log10,
    /// `ln(ln(value / shift))`, defined for values larger than `shift`.
    LogLog {
        /// Values are divided by this constant before taking the double logarithm.
        shift: f64,
    },
    /// `-sqrt(-log10(value))`, defined for values in `(0, 1]`.
    SqrtLog10,
}

impl Map {
    /// Map `value` into distance space. The result is not finite if `value` is outside the
    /// domain of the map.
    #[must_use]
    pub fn to_distance(self, value: f64) -> f64 {
        match self {
            Self::Linear => value,
            Self::Log10 => value.log10(),
            Self::LogLog { shift } => (value / shift).ln().ln(),
            Self::SqrtLog10 => -(-value.log10()).sqrt(),
        }
    }

    /// Inverse of [`Map::to_distance`].
    #[must_use]
    pub fn from_distance(self, distance: f64) -> f64 {
        match self {
            Self::Linear => distance,
            Self::Log10 => 10.0f64.powf(distance),
            Self::LogLog { shift } => shift * distance.exp().exp(),
            Self::SqrtLog10 => 10.0f64.powf(-distance * distance),
        }
    }
}

impl FromStr for Map {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "linear" => Ok(Self::Linear),
            "log10" => Ok(Self::Log10),
            "loglog025" => Ok(Self::LogLog { shift: 0.25 }),
            "sqrtlog10" => Ok(Self::SqrtLog10),
            _ => Err(Error::Config(format!(
                "unknown distance measure '{s}', supported are 'linear', 'log10', 'loglog025' and \
                 'sqrtlog10'"
            ))),
        }
    }
}

/// Computes node weights on an evenly spaced grid.
#[enum_dispatch]
pub trait Kernel {
    /// Return the weights of the nodes surrounding the position `t` on a grid with `nodes` nodes.
    /// The position is measured in units of the node spacing from the first node and must lie in
    /// `[0, nodes - 1]`.
    fn weights(&self, nodes: usize, t: f64) -> NodeWeights;
}

/// Kernel for grids with a single node.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct OneNode;

/// Linear interpolation between the two neighbouring nodes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Linear;

/// Cubic Lagrange interpolation on four nodes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Lagrange;

/// Catmull-Rom spline interpolation on four nodes. At the edges of the grid the missing node is
/// replaced by a linear extrapolation of the two outermost nodes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CatmullRom;

impl Kernel for OneNode {
    fn weights(&self, _: usize, _: f64) -> NodeWeights {
        iter::once((0, 1.0)).collect()
    }
}

impl Kernel for Linear {
    fn weights(&self, nodes: usize, t: f64) -> NodeWeights {
        if nodes < 2 {
            return OneNode.weights(nodes, t);
        }

        let i = convert::usize_from_f64(t.floor()).min(nodes - 2);
        let u = t - convert::f64_from_usize(i);

        [(i, 1.0 - u), (i + 1, u)].into_iter().collect()
    }
}

impl Kernel for Lagrange {
    fn weights(&self, nodes: usize, t: f64) -> NodeWeights {
        let window = nodes.min(INTERP_WINDOW_MAX);

        if window < 2 {
            return OneNode.weights(nodes, t);
        }

        let order = window - 1;
        let start = convert::usize_from_f64(t.floor())
            .saturating_sub((order - 1) / 2)
            .min(nodes - window);
        let u = t - convert::f64_from_usize(start);

        (0..=order)
            .map(|i| (start + i, lagrange_weights(i, order, u)))
            .collect()
    }
}

impl Kernel for CatmullRom {
    fn weights(&self, nodes: usize, t: f64) -> NodeWeights {
        if nodes < 2 {
            return OneNode.weights(nodes, t);
        }

        let i = convert::usize_from_f64(t.floor()).min(nodes - 2);
        let u = t - convert::f64_from_usize(i);
        let u2 = u * u;
        let u3 = u2 * u;

        let basis = [
            0.5 * (2.0f64.mul_add(u2, -u3) - u),
            0.5 * 3.0f64.mul_add(u3, (-5.0f64).mul_add(u2, 2.0)),
            0.5 * (-3.0f64).mul_add(u3, 4.0f64.mul_add(u2, u)),
            0.5 * (u3 - u2),
        ];

        let mut weights = NodeWeights::new();

        for (offset, w) in basis.into_iter().enumerate() {
            match (i + offset).checked_sub(1) {
                None => {
                    add_weight(&mut weights, 0, 2.0 * w);
                    add_weight(&mut weights, 1, -w);
                }
                Some(k) if k >= nodes => {
                    add_weight(&mut weights, nodes - 1, 2.0 * w);
                    add_weight(&mut weights, nodes - 2, -w);
                }
                Some(k) => add_weight(&mut weights, k, w),
            }
        }

        weights
    }
}

/// Dispatches to one of the kernel implementations.
#[enum_dispatch(Kernel)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KernelEnum {
    /// See [`OneNode`].
    OneNode,
    /// See [`Linear`].
    Linear,
    /// See [`Lagrange`].
    Lagrange,
    /// See [`CatmullRom`].
    CatmullRom,
}

/// Name of an interpolation kernel, as it appears in configurations and persisted tables.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum KernelKind {
    /// See [`OneNode`].
    OneNode,
    /// See [`Linear`].
    Linear,
    /// See [`Lagrange`].
    #[default]
    Lagrange,
    /// See [`CatmullRom`].
    CatmullRom,
}

impl From<KernelKind> for KernelEnum {
    fn from(kind: KernelKind) -> Self {
        match kind {
            KernelKind::OneNode => OneNode.into(),
            KernelKind::Linear => Linear.into(),
            KernelKind::Lagrange => Lagrange.into(),
            KernelKind::CatmullRom => CatmullRom.into(),
        }
    }
}

impl FromStr for KernelKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "OneNode" => Ok(Self::OneNode),
            "Linear" => Ok(Self::Linear),
            "Lagrange" => Ok(Self::Lagrange),
            "CatmullRom" => Ok(Self::CatmullRom),
            _ => Err(Error::Config(format!(
                "unknown interpolation kernel '{s}', supported are 'OneNode', 'Linear', \
                 'Lagrange' and 'CatmullRom'"
            ))),
        }
    }
}

impl Display for KernelKind {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Policy that determines how many `x` nodes a bin gets.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum NodeCounting {
    /// The same number of nodes between each bin's `x_min` and one.
    #[default]
    NodesPerBin,
    /// The given number of nodes per decade of `x`.
    NodesPerMagnitude,
    /// One grid spanning the smallest `x_min` of all bins; each bin keeps the nodes it needs.
    NodesMax,
}

impl FromStr for NodeCounting {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "NodesPerBin" => Ok(Self::NodesPerBin),
            "NodesPerMagnitude" => Ok(Self::NodesPerMagnitude),
            "NodesMax" => Ok(Self::NodesMax),
            _ => Err(Error::Config(format!(
                "unknown node counting '{s}', supported are 'NodesPerBin', 'NodesPerMagnitude' \
                 and 'NodesMax'"
            ))),
        }
    }
}

/// A node grid together with the kernel that interpolates on it.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Interp {
    kind: KernelKind,
    map: Map,
    nodes: Vec<f64>,
    dmin: f64,
    delta: f64,
    last_node_removed: bool,
}

impl Interp {
    /// Build `count` nodes between `min` and `max`, evenly spaced in the distance space of `map`.
    /// If `min` and `max` coincide a single node is built.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `count` is zero, if `min` is larger than `max`, if one of the
    /// limits is outside the domain of `map` or if the resulting nodes are not strictly
    /// increasing.
    pub fn new(kind: KernelKind, map: Map, min: f64, max: f64, count: usize) -> Result<Self> {
        if count == 0 {
            return Err(Error::Config("a grid needs at least one node".to_owned()));
        }

        if !(min <= max) {
            return Err(Error::Config(format!(
                "lower grid limit {min} is not smaller than the upper limit {max}"
            )));
        }

        let dmin = map.to_distance(min);
        let dmax = map.to_distance(max);

        if !dmin.is_finite() || !dmax.is_finite() {
            return Err(Error::Config(format!(
                "grid limits [{min}, {max}] are outside the domain of {map:?}"
            )));
        }

        let count = if min == max { 1 } else { count };

        let (nodes, delta) = if count == 1 {
            (vec![min], 0.0)
        } else {
            let delta = (dmax - dmin) / convert::f64_from_usize(count - 1);
            let mut nodes: Vec<_> = (0..count)
                .map(|i| map.from_distance(convert::f64_from_usize(i).mul_add(delta, dmin)))
                .collect();

            // remove the round-off of the map at the limits
            nodes[0] = min;
            nodes[count - 1] = max;

            (nodes, delta)
        };

        if !nodes.windows(2).all(|pair| pair[0] < pair[1]) {
            return Err(Error::Config(format!(
                "{count} nodes in [{min}, {max}] are not strictly increasing"
            )));
        }

        Ok(Self {
            kind,
            map,
            nodes,
            dmin,
            delta,
            last_node_removed: false,
        })
    }

    /// Remove the largest node. Interpolation still uses it, but its weight is discarded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the grid has fewer than two nodes or if the last node was
    /// already removed.
    pub fn remove_last_node(&mut self) -> Result<()> {
        if self.nodes.len() < 2 || self.last_node_removed {
            return Err(Error::Config(format!(
                "can not remove the last node of a grid with {} node(s)",
                self.len()
            )));
        }

        self.last_node_removed = true;

        Ok(())
    }

    /// Return the nodes of this grid.
    #[must_use]
    pub fn nodes(&self) -> &[f64] {
        if self.last_node_removed {
            &self.nodes[..self.nodes.len() - 1]
        } else {
            &self.nodes
        }
    }

    /// Return the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes().len()
    }

    /// Return `true` if this grid has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes().is_empty()
    }

    /// Return the kernel of this grid.
    #[must_use]
    pub const fn kernel(&self) -> KernelKind {
        self.kind
    }

    /// Return the map of this grid.
    #[must_use]
    pub const fn map(&self) -> Map {
        self.map
    }

    /// Return `true` if `value` lies between the smallest and the largest node, including a
    /// removed last node.
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        self.nodes
            .first()
            .zip(self.nodes.last())
            .is_some_and(|(&min, &max)| (min..=max).contains(&value))
    }

    /// Return the node weights interpolating `value`. Values outside the grid are clamped to the
    /// nearest node and values on a node return that node with weight one. Returns `None` if
    /// `value` is outside the domain of the map.
    #[must_use]
    pub fn node_weights(&self, value: f64) -> Option<NodeWeights> {
        let distance = self.map.to_distance(value);

        if !distance.is_finite() {
            return None;
        }

        let n = self.nodes.len();

        let mut weights = if n == 1 {
            OneNode.weights(n, 0.0)
        } else {
            let t = ((distance - self.dmin) / self.delta)
                .clamp(0.0, convert::f64_from_usize(n - 1));
            let nearest = t.round();

            if (t - nearest).abs() < EXACT_NODE_TOLERANCE {
                iter::once((convert::usize_from_f64(nearest), 1.0)).collect()
            } else {
                KernelEnum::from(self.kind).weights(n, t)
            }
        };

        if self.last_node_removed {
            weights.retain(|(i, _)| *i != n - 1);
        }

        Some(weights)
    }

    /// Multiply each node weight by `reweight_x(x) / reweight_x(node)`. Returns `false` and
    /// leaves `weights` untouched if `x` can not be reweighted. Nodes that can not be reweighted
    /// receive a `NaN` weight.
    pub fn reweight(&self, x: f64, weights: &mut NodeWeights) -> bool {
        let Some(wx) = reweight_x(x) else {
            return false;
        };

        for (index, weight) in weights.iter_mut() {
            *weight *= reweight_x(self.nodes[*index]).map_or(f64::NAN, |wn| wx / wn);
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    const KERNELS: [KernelKind; 3] = [
        KernelKind::Linear,
        KernelKind::Lagrange,
        KernelKind::CatmullRom,
    ];

    fn sample(interp: &Interp, steps: usize) -> Vec<f64> {
        let min = interp.nodes()[0];
        let max = *interp.nodes().last().unwrap();
        let dmin = interp.map().to_distance(min);
        let dmax = interp.map().to_distance(max);

        (0..=steps)
            .map(|i| {
                let fraction = convert::f64_from_usize(i) / convert::f64_from_usize(steps);
                interp.map().from_distance((dmax - dmin).mul_add(fraction, dmin))
            })
            .collect()
    }

    #[test]
    fn partition_of_unity() {
        for kind in KERNELS {
            for count in [2, 3, 4, 5, 17] {
                let interp = Interp::new(kind, Map::Log10, 10.0, 1000.0, count).unwrap();

                for value in sample(&interp, 97) {
                    let weights = interp.node_weights(value).unwrap();
                    let sum: f64 = weights.iter().map(|(_, w)| w).sum();
                    assert_approx_eq!(f64, sum, 1.0, epsilon = 1e-12);
                    assert!(weights.iter().all(|&(i, _)| i < count));
                }
            }
        }
    }

    #[test]
    fn nodes_are_reproduced() {
        for kind in KERNELS {
            let interp = Interp::new(kind, Map::LogLog { shift: 0.25 }, 2.0, 500.0, 9).unwrap();

            for (index, &node) in interp.nodes().iter().enumerate() {
                let weights = interp.node_weights(node).unwrap();
                assert_eq!(weights.len(), 1);
                assert_eq!(weights[0].0, index);
                assert_approx_eq!(f64, weights[0].1, 1.0, ulps = 2);
            }
        }
    }

    #[test]
    fn polynomials_are_reproduced() {
        let linear = Interp::new(KernelKind::Linear, Map::Linear, -1.0, 3.0, 6).unwrap();
        let catmull_rom = Interp::new(KernelKind::CatmullRom, Map::Linear, -1.0, 3.0, 6).unwrap();
        let lagrange = Interp::new(KernelKind::Lagrange, Map::Linear, -1.0, 3.0, 6).unwrap();

        let line = |x: f64| 0.5f64.mul_add(x, -2.0);
        let cubic = |x: f64| x.powi(3) - 2.0 * x * x + 0.25;

        let eval = |interp: &Interp, f: &dyn Fn(f64) -> f64, x: f64| -> f64 {
            interp
                .node_weights(x)
                .unwrap()
                .iter()
                .map(|&(i, w)| w * f(interp.nodes()[i]))
                .sum()
        };

        for x in sample(&linear, 53) {
            assert_approx_eq!(f64, eval(&linear, &line, x), line(x), epsilon = 1e-12);
            assert_approx_eq!(f64, eval(&catmull_rom, &line, x), line(x), epsilon = 1e-12);
            assert_approx_eq!(f64, eval(&lagrange, &cubic, x), cubic(x), epsilon = 1e-11);
        }
    }

    #[test]
    fn lagrange_weights_can_be_negative() {
        let interp = Interp::new(KernelKind::Lagrange, Map::Linear, 0.0, 4.0, 5).unwrap();
        let weights = interp.node_weights(0.5).unwrap();

        assert_eq!(
            weights.iter().map(|&(i, _)| i).collect::<Vec<_>>(),
            [0, 1, 2, 3]
        );
        assert!(weights[2].1 < 0.0);
        assert_approx_eq!(f64, weights[0].1, 0.3125, ulps = 4);
        assert_approx_eq!(f64, weights[1].1, 0.9375, ulps = 4);
        assert_approx_eq!(f64, weights[2].1, -0.3125, ulps = 4);
        assert_approx_eq!(f64, weights[3].1, 0.0625, ulps = 4);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        for kind in KERNELS {
            let interp = Interp::new(kind, Map::Log10, 10.0, 100.0, 5).unwrap();

            assert_eq!(interp.node_weights(1.0).unwrap().as_slice(), [(0, 1.0)]);
            assert_eq!(interp.node_weights(1e4).unwrap().as_slice(), [(4, 1.0)]);
            assert!(!interp.contains(1e4));
            assert!(interp.node_weights(-1.0).is_none());
        }
    }

    #[test]
    fn single_node() {
        let interp = Interp::new(KernelKind::Lagrange, Map::Log10, 91.1876, 91.1876, 6).unwrap();

        assert_eq!(interp.nodes(), [91.1876]);
        assert_eq!(interp.node_weights(200.0).unwrap().as_slice(), [(0, 1.0)]);
        assert_eq!(OneNode.weights(1, 0.0).as_slice(), [(0, 1.0)]);
    }

    #[test]
    fn removed_node_is_skipped() {
        let mut interp = Interp::new(KernelKind::Linear, Map::SqrtLog10, 1e-4, 1.0, 11).unwrap();
        let last = interp.nodes()[9];

        interp.remove_last_node().unwrap();
        assert_eq!(interp.len(), 10);
        assert!(interp.remove_last_node().is_err());

        let x = 0.5 * (last + 1.0);
        let weights = interp.node_weights(x).unwrap();
        assert_eq!(weights.len(), 1);
        assert_eq!(weights[0].0, 9);
        assert!(weights[0].1 < 1.0);

        assert!(interp.node_weights(1.0).unwrap().is_empty());
    }

    #[test]
    fn maps_are_invertible() {
        for (map, value) in [
            (Map::Linear, -3.5),
            (Map::Log10, 250.0),
            (Map::LogLog { shift: 0.25 }, 91.1876),
            (Map::SqrtLog10, 3e-5),
        ] {
            assert_approx_eq!(
                f64,
                map.from_distance(map.to_distance(value)),
                value,
                epsilon = 1e-9 * value.abs()
            );
        }
    }

    #[test]
    fn names() {
        assert_eq!("loglog025".parse::<Map>().unwrap(), Map::LogLog { shift: 0.25 });
        assert_eq!("CatmullRom".parse::<KernelKind>().unwrap(), KernelKind::CatmullRom);
        assert_eq!("NodesMax".parse::<NodeCounting>().unwrap(), NodeCounting::NodesMax);
        assert!(matches!("Cubic".parse::<KernelKind>(), Err(Error::Config(_))));
        assert!(matches!("log2".parse::<Map>(), Err(Error::Config(_))));
    }

    #[test]
    fn invalid_grids() {
        assert!(matches!(
            Interp::new(KernelKind::Linear, Map::Log10, 1.0, 10.0, 0),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Interp::new(KernelKind::Linear, Map::Log10, 10.0, 1.0, 4),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Interp::new(KernelKind::Linear, Map::Log10, 0.0, 1.0, 4),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn pdf_reweighting() {
        assert_eq!(reweight_x(0.0), None);
        assert_eq!(reweight_x(-0.1), None);
        assert_approx_eq!(f64, reweight_x(0.25).unwrap(), 0.7525f64.powi(3) * 8.0, epsilon = 1e-14);

        let interp = Interp::new(KernelKind::Linear, Map::Log10, 1e-3, 1.0, 4).unwrap();
        let mut weights = interp.node_weights(0.05).unwrap();
        let unweighted = weights.clone();

        assert!(interp.reweight(0.05, &mut weights));
        for ((i, w), (_, u)) in weights.iter().zip(&unweighted) {
            let factor = reweight_x(0.05).unwrap() / reweight_x(interp.nodes()[*i]).unwrap();
            assert_approx_eq!(f64, *w, u * factor, ulps = 4);
        }

        assert!(!interp.reweight(0.0, &mut weights));
    }
}
