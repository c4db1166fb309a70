//! Construction of the per-bin node grids from calibration data.

use super::bin::BinningModel;
use super::config::{AxisConfig, ScaleMode, TableConfig};
use super::convert;
use super::error::{Error, Result};
use super::interpolation::{Interp, NodeCounting};
use super::warmup::WarmupTable;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Scale grids of one bin.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum ScaleGrids {
    /// Independent grids for both scales.
    Flexible {
        /// Grid of the first scale.
        mu1: Interp,
        /// Grid of the second scale.
        mu2: Interp,
    },
    /// One grid for each scale factor.
    Fixed(Vec<Interp>),
}

/// Node grids of one bin. Both momentum fractions of two-hadron processes share the same `x`
/// grid.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct BinGrids {
    /// Grid of the momentum fractions.
    pub x: Interp,
    /// Grids of the scales.
    pub scales: ScaleGrids,
}

impl BinGrids {
    /// Return the number of nodes of the first and second scale grid. For fixed-scale tables the
    /// second number is one and the first is taken from the grid of the central scale factor.
    #[must_use]
    pub fn scale_nodes(&self) -> (usize, usize) {
        match &self.scales {
            ScaleGrids::Flexible { mu1, mu2 } => (mu1.len(), mu2.len()),
            ScaleGrids::Fixed(grids) => (grids.first().map_or(0, Interp::len), 1),
        }
    }
}

fn x_grids(config: &TableConfig, warmup: &WarmupTable) -> Result<Vec<Interp>> {
    let AxisConfig { kernel, map, nodes } = config.x;
    // one more node than requested, the node at x = 1 is removed
    let total = nodes + 1;

    let mut grids = match config.x_counting {
        NodeCounting::NodesPerBin => warmup
            .rows
            .iter()
            .map(|row| Interp::new(kernel, map, row.x_min, 1.0, total))
            .collect::<Result<Vec<_>>>()?,
        NodeCounting::NodesPerMagnitude => warmup
            .rows
            .iter()
            .map(|row| {
                let decades = -row.x_min.log10();
                let count =
                    convert::usize_from_f64((convert::f64_from_usize(nodes) * decades).ceil());
                Interp::new(kernel, map, row.x_min, 1.0, count.max(1) + 1)
            })
            .collect::<Result<Vec<_>>>()?,
        NodeCounting::NodesMax => {
            let x_min = warmup
                .rows
                .iter()
                .map(|row| row.x_min)
                .fold(1.0, f64::min);
            let global = Interp::new(kernel, map, x_min, 1.0, total)?;

            warmup
                .rows
                .iter()
                .enumerate()
                .map(|(bin, row)| {
                    // the last global node not above this bin's lower limit
                    let first = global
                        .nodes()
                        .iter()
                        .rposition(|&node| node <= row.x_min)
                        .unwrap_or(0);
                    let start = global.nodes()[first];

                    debug!(
                        "bin {bin}: x grid starts at {start:e} for x_min={:e} with {} nodes",
                        row.x_min,
                        total - first
                    );

                    Interp::new(kernel, map, start, 1.0, total - first)
                })
                .collect::<Result<Vec<_>>>()?
        }
    };

    for grid in &mut grids {
        grid.remove_last_node()?;
    }

    Ok(grids)
}

/// Build the node grids of every bin from `warmup`, which is first checked against `binning`.
///
/// `x` grids run from each bin's lower limit to one, with the node at one removed. Flexible
/// tables get one grid per scale, fixed-scale tables one grid per scale factor, spanning the
/// calibrated limits multiplied with that factor.
///
/// # Errors
///
/// Returns an error if `warmup` does not match `binning` (see
/// [`WarmupTable::check_consistency`]), if a grid can not be built from the limits, or if PDF
/// reweighting is requested for an `x` grid with non-positive nodes.
pub fn build_grids(
    config: &TableConfig,
    binning: &BinningModel,
    warmup: &WarmupTable,
) -> Result<Vec<BinGrids>> {
    let flexible = config.scale.is_flexible();

    warmup.check_consistency(binning, flexible, config.strict_warmup_check)?;

    let x = x_grids(config, warmup)?;

    if config.pdf_reweighting {
        if let Some(bin) = x
            .iter()
            .position(|grid| grid.nodes().first().is_some_and(|&node| node <= 0.0))
        {
            return Err(Error::Config(format!(
                "PDF reweighting needs positive x nodes, the grid of bin {bin} starts at {}",
                x[bin].nodes()[0]
            )));
        }
    }

    x.into_iter()
        .zip(&warmup.rows)
        .enumerate()
        .map(|(bin, (x, row))| {
            let (lo, hi) = row.mu1;

            let scales = match &config.scale {
                ScaleMode::Flexible { mu1, mu2 } => {
                    let (lo2, hi2) = row.mu2.ok_or_else(|| {
                        Error::Mismatch(format!("bin {bin} has no limits for the second scale"))
                    })?;

                    ScaleGrids::Flexible {
                        mu1: Interp::new(mu1.kernel, mu1.map, lo, hi, mu1.nodes)?,
                        mu2: Interp::new(mu2.kernel, mu2.map, lo2, hi2, mu2.nodes)?,
                    }
                }
                ScaleMode::Fixed { mu, factors } => ScaleGrids::Fixed(
                    factors
                        .iter()
                        .map(|factor| {
                            Interp::new(mu.kernel, mu.map, factor * lo, factor * hi, mu.nodes)
                        })
                        .collect::<Result<_>>()?,
                ),
            };

            let grids = BinGrids { x, scales };

            debug!(
                "bin {bin}: {} x nodes from {:e}, scale nodes {:?}",
                grids.x.len(),
                grids.x.nodes()[0],
                grids.scale_nodes()
            );

            Ok(grids)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bin::DiffKind;
    use crate::interpolation::{KernelKind, Map};
    use float_cmp::assert_approx_eq;

    fn setup(counting: NodeCounting, scale: ScaleMode) -> (TableConfig, BinningModel, WarmupTable) {
        let flexible = scale.is_flexible();
        let config = TableConfig {
            x_counting: counting,
            scale_descriptions: if flexible {
                vec!["mu1".to_owned(), "mu2".to_owned()]
            } else {
                vec!["mu".to_owned()]
            },
            scale,
            ..TableConfig::default()
        };
        let edges = [10.0, 20.0, 40.0];
        let binning = BinningModel::from_edges("pT", DiffKind::Differential, &edges, 1.0).unwrap();
        let warmup = WarmupTable::from_limits(
            &binning,
            config.scale_descriptions.clone(),
            &[2e-3, 4e-2],
            &[(10.0, 20.0), (20.0, 40.0)],
            flexible.then_some(&[(1.0, 5.0), (5.0, 5.0)][..]),
        )
        .unwrap();

        (config, binning, warmup)
    }

    #[test]
    fn nodes_per_bin() {
        let (config, binning, warmup) = setup(NodeCounting::NodesPerBin, ScaleMode::default());
        let grids = build_grids(&config, &binning, &warmup).unwrap();

        assert_eq!(grids.len(), 2);

        for (grid, x_min) in grids.iter().zip([2e-3, 4e-2]) {
            assert_eq!(grid.x.len(), 15);
            assert_eq!(grid.x.nodes()[0], x_min);
            assert!(*grid.x.nodes().last().unwrap() < 1.0);
            assert_eq!(grid.scale_nodes(), (6, 1));
        }
    }

    #[test]
    fn nodes_per_magnitude() {
        let (mut config, binning, warmup) =
            setup(NodeCounting::NodesPerMagnitude, ScaleMode::default());
        config.x.nodes = 4;
        let grids = build_grids(&config, &binning, &warmup).unwrap();

        // 2.7 decades and 1.4 decades
        assert_eq!(grids[0].x.len(), 11);
        assert_eq!(grids[1].x.len(), 6);
    }

    #[test]
    fn nodes_max() {
        let (mut config, binning, warmup) = setup(NodeCounting::NodesMax, ScaleMode::default());
        config.x.map = Map::Log10;
        config.x.kernel = KernelKind::Linear;
        let grids = build_grids(&config, &binning, &warmup).unwrap();

        assert_eq!(grids[0].x.len(), 15);
        assert!(grids[1].x.len() < 15);
        assert!(grids[1].x.nodes()[0] <= 4e-2);

        // the grid of the second bin is a subset of the first
        let offset = grids[0].x.len() - grids[1].x.len();
        for (a, b) in grids[1].x.nodes().iter().zip(&grids[0].x.nodes()[offset..]) {
            assert_approx_eq!(f64, *a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn scale_factors() {
        let (config, binning, warmup) = setup(
            NodeCounting::NodesPerBin,
            ScaleMode::Fixed {
                mu: AxisConfig::scale(),
                factors: vec![1.0, 0.5, 2.0],
            },
        );
        let grids = build_grids(&config, &binning, &warmup).unwrap();

        let ScaleGrids::Fixed(scales) = &grids[1].scales else {
            unreachable!();
        };

        assert_eq!(scales.len(), 3);
        assert_eq!(scales[0].nodes()[0], 20.0);
        assert_eq!(scales[1].nodes()[0], 10.0);
        assert_eq!(*scales[2].nodes().last().unwrap(), 80.0);
    }

    #[test]
    fn flexible_scales() {
        let (config, binning, warmup) = setup(
            NodeCounting::NodesPerBin,
            ScaleMode::Flexible {
                mu1: AxisConfig::scale(),
                mu2: AxisConfig {
                    map: Map::Log10,
                    nodes: 3,
                    ..AxisConfig::scale()
                },
            },
        );
        let grids = build_grids(&config, &binning, &warmup).unwrap();

        assert_eq!(grids[0].scale_nodes(), (6, 3));
        // degenerate limits give a single node
        assert_eq!(grids[1].scale_nodes(), (6, 1));

        let (config, binning, _) = setup(NodeCounting::NodesPerBin, ScaleMode::default());
        let mut flexible = config.clone();
        flexible.scale = ScaleMode::Flexible {
            mu1: AxisConfig::scale(),
            mu2: AxisConfig::scale(),
        };
        flexible.scale_descriptions = vec!["mu1".to_owned(), "mu2".to_owned()];
        let warmup = WarmupTable::from_limits(
            &binning,
            vec!["mu".to_owned()],
            &[2e-3, 4e-2],
            &[(10.0, 20.0), (20.0, 40.0)],
            None,
        )
        .unwrap();

        assert!(matches!(
            build_grids(&flexible, &binning, &warmup),
            Err(Error::Mismatch(_))
        ));
    }

    #[test]
    fn reweighting_needs_positive_nodes() {
        let (mut config, binning, mut warmup) =
            setup(NodeCounting::NodesPerBin, ScaleMode::default());
        config.x.map = Map::Linear;
        warmup.rows[0].x_min = 0.0;

        assert!(matches!(
            build_grids(&config, &binning, &warmup),
            Err(Error::Config(_))
        ));

        config.pdf_reweighting = false;
        build_grids(&config, &binning, &warmup).unwrap();
    }
}
