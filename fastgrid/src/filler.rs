//! Filling of events into a table: calibration, interpolation and accumulation.

use super::bin::BinningModel;
use super::cache::{CachedEvent, WeightCache};
use super::config::{ScaleMode, TableConfig};
use super::convert;
use super::error::{Error, Result};
use super::event::{BinCoord, Event, Scenario};
use super::interpolation::{Interp, NodeWeights};
use super::nodes::{self, BinGrids, ScaleGrids};
use super::process::{HalfMatrixIndexer, PdfDim, SymmetricProcesses};
use super::table::Table;
use super::tensor::{CoefficientTensor, Layout, ScaleDep};
use super::warmup::{WarmupStats, WarmupTable};
use git_version::git_version;
use itertools::Itertools;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::iter;
use tracing::{debug, info, warn};

fn x_weights(grid: &Interp, x: f64, reweight: bool) -> Option<NodeWeights> {
    let mut weights = grid.node_weights(x)?;

    if reweight && !grid.reweight(x, &mut weights) {
        return None;
    }

    Some(weights)
}

fn indexer(config: &TableConfig) -> HalfMatrixIndexer {
    HalfMatrixIndexer::new(
        config.pdf_dim,
        SymmetricProcesses::new(config.subprocesses, &config.asymmetric_processes),
    )
}

/// Lifecycle of a [`TableCreator`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TableState {
    /// Events only widen the calibration statistics.
    Calibrating,
    /// Grids and coefficients are allocated, no event was filled yet.
    GridBuilt,
    /// Events are interpolated into the coefficients.
    Filling,
    /// The coefficients are normalized; no more events are accepted.
    Finalized,
    /// The finalized table was written at least once.
    Persisted,
}

impl TableState {
    const fn name(self) -> &'static str {
        match self {
            Self::Calibrating => "calibrating",
            Self::GridBuilt => "built",
            Self::Filling => "filling",
            Self::Finalized => "finalized",
            Self::Persisted => "persisted",
        }
    }
}

/// What happened to an event passed to [`TableCreator::fill`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EventOutcome {
    /// The event was interpolated into the coefficients.
    Filled,
    /// The event was added to the weight cache.
    Cached,
    /// The event widened the calibration statistics.
    Calibrated,
    /// The event lies in no bin and was skipped.
    OutOfRange,
    /// A momentum fraction is negative or can not be interpolated and the event was skipped.
    InvalidX,
    /// A scale can not be interpolated and the event was skipped.
    InvalidScale,
    /// A weight is not finite and the event was skipped.
    NonFiniteWeight,
}

/// Event counts and weight sums collected while filling.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct FillStats {
    /// Number of calls of [`TableCreator::fill`], including all scale variations.
    pub processed: u64,
    /// Number of events of the central scale variation that lie in a bin.
    pub events: u64,
    /// Skipped events without a bin.
    pub out_of_range: u64,
    /// Skipped events with invalid momentum fractions.
    pub invalid_x: u64,
    /// Skipped events with scales outside the domain of the scale grids.
    pub invalid_scale: u64,
    /// Skipped events with non-finite weights.
    pub non_finite: u64,
    /// Number of events per subprocess and bin.
    pub counts: Vec<Vec<u64>>,
    /// Sum of squared weights.
    pub sum_w2: f64,
    /// Sum of squared weights per subprocess and bin.
    pub sum_w2_per_bin: Vec<Vec<f64>>,
    /// Sum of the event cross sections.
    pub sigma: f64,
    /// Sum of the squared event cross sections.
    pub sigma_w2: f64,
}

impl FillStats {
    fn new(subprocesses: usize, bins: usize) -> Self {
        Self {
            counts: vec![vec![0; bins]; subprocesses],
            sum_w2_per_bin: vec![vec![0.0; bins]; subprocesses],
            ..Self::default()
        }
    }

    /// Add the statistics of `other`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mismatch`] if the number of subprocesses or bins differ.
    pub fn merge(&mut self, other: &Self) -> Result<()> {
        let shape = |counts: &[Vec<u64>]| (counts.len(), counts.first().map_or(0, Vec::len));

        if shape(&self.counts) != shape(&other.counts) {
            return Err(Error::Mismatch(
                "statistics with different subprocesses or bins can not be merged".to_owned(),
            ));
        }

        self.processed += other.processed;
        self.events += other.events;
        self.out_of_range += other.out_of_range;
        self.invalid_x += other.invalid_x;
        self.invalid_scale += other.invalid_scale;
        self.non_finite += other.non_finite;
        self.sum_w2 += other.sum_w2;
        self.sigma += other.sigma;
        self.sigma_w2 += other.sigma_w2;

        for (lhs, rhs) in self.counts.iter_mut().flatten().zip(other.counts.iter().flatten()) {
            *lhs += rhs;
        }

        for (lhs, rhs) in self
            .sum_w2_per_bin
            .iter_mut()
            .flatten()
            .zip(other.sum_w2_per_bin.iter().flatten())
        {
            *lhs += rhs;
        }

        Ok(())
    }
}

/// Normalization applied when a table is finalized.
#[derive(Clone, Debug, PartialEq)]
pub enum Normalization {
    /// Leave the coefficients as they are.
    None,
    /// Multiply the coefficients by `weight / events` and set the number of events to `weight`.
    TotalWeight(f64),
    /// Divide the coefficients of each subprocess and bin by the given weight, indexed by
    /// subprocess first, and set the number of events to one.
    PerSubprocessBin(Vec<Vec<f64>>),
}

struct Production {
    grids: Vec<BinGrids>,
    tensor: CoefficientTensor,
    cache: Option<WeightCache>,
}

enum Phase {
    Calibrating(WarmupStats),
    Production(Production),
}

/// Builds a table: either collects calibration statistics or fills events into coefficients.
pub struct TableCreator {
    config: TableConfig,
    binning: BinningModel,
    indexer: HalfMatrixIndexer,
    state: TableState,
    phase: Phase,
    stats: FillStats,
    events: Option<f64>,
    metadata: BTreeMap<String, String>,
    reported: FxHashSet<EventOutcome>,
}

impl TableCreator {
    fn with_phase(
        config: TableConfig,
        binning: BinningModel,
        phase: Phase,
        state: TableState,
    ) -> Self {
        let indexer = indexer(&config);
        let stats = FillStats::new(config.subprocesses, binning.bins());

        Self {
            config,
            binning,
            indexer,
            state,
            phase,
            stats,
            events: None,
            metadata: iter::once((
                "fastgrid_gitversion".to_owned(),
                git_version!(
                    args = ["--always", "--dirty", "--long", "--tags"],
                    cargo_prefix = "cargo:",
                    fallback = "unknown"
                )
                .to_owned(),
            ))
            .collect(),
            reported: FxHashSet::default(),
        }
    }

    /// Create a table in calibration mode. Filled events only determine the limits of the grids,
    /// which are retrieved with [`TableCreator::finish_calibration`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `config` is invalid.
    pub fn calibrate(config: TableConfig, binning: BinningModel) -> Result<Self> {
        config.validate()?;

        info!("creating calibration tables for {} bins", binning.bins());

        let stats = WarmupStats::new(binning.bins(), config.scale.is_flexible());

        Ok(Self::with_phase(
            config,
            binning,
            Phase::Calibrating(stats),
            TableState::Calibrating,
        ))
    }

    /// Create a table whose grids are built from `warmup`, which may come from a calibration run
    /// or from [`WarmupTable::from_limits`].
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid, if `warmup` does not match `binning` or if the
    /// grids can not be built.
    pub fn new(config: TableConfig, binning: BinningModel, warmup: &WarmupTable) -> Result<Self> {
        config.validate()?;

        let grids = nodes::build_grids(&config, &binning, warmup)?;
        let flexible = config.scale.is_flexible();
        let cache =
            (flexible && config.cache_max > 1).then(|| WeightCache::new(config.cache_max));

        let layout = Layout::from_grids(&grids, &indexer(&config), config.subprocesses);

        info!(
            "allocating {} coefficients in {} component(s)",
            layout.len(),
            if flexible { ScaleDep::ALL.len() } else { 1 }
        );

        let production = Production {
            grids,
            tensor: CoefficientTensor::new(layout, flexible),
            cache,
        };

        Ok(Self::with_phase(
            config,
            binning,
            Phase::Production(production),
            TableState::GridBuilt,
        ))
    }

    /// Return the current state.
    #[must_use]
    pub const fn state(&self) -> TableState {
        self.state
    }

    /// Return the configuration.
    #[must_use]
    pub const fn config(&self) -> &TableConfig {
        &self.config
    }

    /// Return the binning.
    #[must_use]
    pub const fn binning(&self) -> &BinningModel {
        &self.binning
    }

    /// Return the statistics collected so far.
    #[must_use]
    pub const fn stats(&self) -> &FillStats {
        &self.stats
    }

    /// Return the calibration statistics, or `None` if this table is not calibrating.
    #[must_use]
    pub const fn calibration(&self) -> Option<&WarmupStats> {
        match &self.phase {
            Phase::Calibrating(stats) => Some(stats),
            Phase::Production(_) => None,
        }
    }

    /// Return the node grids, or `None` if this table is calibrating.
    #[must_use]
    pub fn grids(&self) -> Option<&[BinGrids]> {
        match &self.phase {
            Phase::Production(production) => Some(&production.grids),
            Phase::Calibrating(_) => None,
        }
    }

    /// Return the coefficients, or `None` if this table is calibrating. Events still held in the
    /// weight cache are not included.
    #[must_use]
    pub const fn tensor(&self) -> Option<&CoefficientTensor> {
        match &self.phase {
            Phase::Production(production) => Some(&production.tensor),
            Phase::Calibrating(_) => None,
        }
    }

    /// Set the number of events the coefficients are normalized to. If it is never set, the
    /// number of events of the central scale variation is used.
    pub fn set_number_of_events(&mut self, events: f64) {
        self.events = Some(events);
    }

    /// Set the metadata `key` to `value`.
    pub fn set_key_value(&mut self, key: &str, value: &str) {
        self.metadata.insert(key.to_owned(), value.to_owned());
    }

    fn invalid_state(&self, operation: &'static str) -> Error {
        Error::InvalidState {
            operation,
            state: self.state.name(),
        }
    }

    fn production(&mut self, operation: &'static str) -> Result<&mut Production> {
        match (&mut self.phase, self.state) {
            (Phase::Production(production), TableState::GridBuilt | TableState::Filling) => {
                Ok(production)
            }
            _ => Err(Error::InvalidState {
                operation,
                state: self.state.name(),
            }),
        }
    }

    // logs the first skipped event of each kind as a warning, all others at debug level
    fn skip(&mut self, outcome: EventOutcome, message: impl FnOnce() -> String) -> EventOutcome {
        if self.reported.insert(outcome) {
            warn!(
                "{}, skipping event; further events of this kind are logged at debug level",
                message()
            );
        } else {
            debug!("{}, skipping event", message());
        }

        outcome
    }

    fn resolve_bin(&self, coord: &BinCoord) -> Option<usize> {
        match coord {
            BinCoord::Index(bin) => (*bin < self.binning.bins()).then_some(*bin),
            BinCoord::Observable(point) => self.binning.index(point),
        }
    }

    fn update_stats(&mut self, bin: usize, event: &Event, scenario: &Scenario) {
        let single = self.config.pdf_dim == PdfDim::SingleHadron;
        let weights = &event.weights;
        let mut w = weights.w;

        if self.config.scale.is_flexible() {
            // estimate of the weight at the scale of the event
            let mu2 = if single {
                scenario.mu2.mul_add(scenario.mu2, scenario.mu1 * scenario.mu1) / 2.0
            } else {
                scenario.mu1 * scenario.mu1
            };
            let lmu = mu2.ln();

            w += lmu * (weights.wr + weights.wf)
                + lmu * lmu * (weights.wrr + weights.wff + weights.wrf);

            if single {
                w -= lmu * (weights.wr + weights.wf);
            }
        }

        let w2 = w * w;

        self.stats.events += 1;
        self.stats.counts[event.subprocess][bin] += 1;
        self.stats.sum_w2 += w2;
        self.stats.sum_w2_per_bin[event.subprocess][bin] += w2;
        self.stats.sigma += event.sigma;
        self.stats.sigma_w2 += event.sigma * event.sigma;
    }

    /// Fill `event` at the phase-space point `scenario` for the scale variation `variation`,
    /// which must be zero for flexible-scale tables.
    ///
    /// Events without bin, with negative momentum fractions, with non-finite weights or with
    /// values outside the domain of the grids are skipped; the returned outcome and the
    /// statistics record why.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the table no longer accepts events, [`Error::Config`]
    /// if the subprocess or scale variation does not exist and [`Error::Internal`] if the
    /// interpolated weight is not finite.
    pub fn fill(
        &mut self,
        event: &Event,
        scenario: &Scenario,
        variation: usize,
    ) -> Result<EventOutcome> {
        if !matches!(
            self.state,
            TableState::Calibrating | TableState::GridBuilt | TableState::Filling
        ) {
            return Err(self.invalid_state("fill"));
        }

        if event.subprocess >= self.config.subprocesses {
            return Err(Error::Config(format!(
                "subprocess {} does not exist, the table has {}",
                event.subprocess, self.config.subprocesses
            )));
        }

        if variation >= self.config.scale.variations() {
            return Err(Error::Config(format!(
                "scale variation {variation} does not exist, the table has {}",
                self.config.scale.variations()
            )));
        }

        self.stats.processed += 1;

        let Some(bin) = self.resolve_bin(&scenario.bin) else {
            self.stats.out_of_range += 1;
            return Ok(self.skip(EventOutcome::OutOfRange, || {
                format!("{:?} lies in no bin", scenario.bin)
            }));
        };

        if variation == 0 {
            self.update_stats(bin, event, scenario);
        }

        let two_hadrons = self.config.pdf_dim.hadrons() == 2;

        let valid = |x: f64| x > 0.0 && x.is_finite();

        if !valid(event.x1) || (two_hadrons && !valid(event.x2)) {
            self.stats.invalid_x += 1;
            return Ok(self.skip(EventOutcome::InvalidX, || {
                format!(
                    "momentum fractions x1={}, x2={} are not positive",
                    event.x1, event.x2
                )
            }));
        }

        if let Phase::Calibrating(warmup) = &mut self.phase {
            if variation == 0 {
                warmup.update(
                    bin,
                    event.x1,
                    two_hadrons.then_some(event.x2),
                    scenario.mu1,
                    scenario.mu2,
                );
            }
            return Ok(EventOutcome::Calibrated);
        }

        if !event.weights.leading_are_finite() {
            self.stats.non_finite += 1;
            return Ok(self.skip(EventOutcome::NonFiniteWeight, || {
                format!("non-finite weights {:?}", event.weights)
            }));
        }

        self.state = TableState::Filling;

        let entry = CachedEvent {
            bin,
            mu1: scenario.mu1,
            mu2: scenario.mu2,
            event: *event,
        };

        let full = self
            .production("fill")?
            .cache
            .as_mut()
            .map(|cache| cache.add(entry));

        if let Some(full) = full {
            if full {
                self.flush_cache()?;
            }
            return Ok(EventOutcome::Cached);
        }

        self.fill_entry(&entry, variation)
    }

    /// Fill one event for each subprocess, in the order of the subprocesses.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the number of events differs from the number of subprocesses,
    /// otherwise see [`TableCreator::fill`].
    pub fn fill_all_subprocesses(
        &mut self,
        events: &[Event],
        scenario: &Scenario,
        variation: usize,
    ) -> Result<Vec<EventOutcome>> {
        if events.len() != self.config.subprocesses {
            return Err(Error::Config(format!(
                "the table has {} subprocesses, but {} events were given",
                self.config.subprocesses,
                events.len()
            )));
        }

        events
            .iter()
            .map(|event| self.fill(event, scenario, variation))
            .collect()
    }

    /// Interpolate all cached events into the coefficients.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the table is not filling, or an error from the
    /// interpolation.
    pub fn flush_cache(&mut self) -> Result<()> {
        let production = self.production("flush_cache")?;
        let entries = production
            .cache
            .as_mut()
            .map(WeightCache::drain)
            .unwrap_or_default();

        if !entries.is_empty() {
            debug!("flushing {} cached events", entries.len());
        }

        for entry in &entries {
            self.fill_entry(entry, 0)?;
        }

        Ok(())
    }

    fn fill_entry(&mut self, entry: &CachedEvent, variation: usize) -> Result<EventOutcome> {
        let CachedEvent {
            bin,
            mu1,
            mu2,
            event,
        } = *entry;
        let bin_size = self.binning.bin_sizes()[bin];
        let reweight = self.config.pdf_reweighting;
        let indexer = &self.indexer;
        let Phase::Production(production) = &mut self.phase else {
            return Err(Error::Internal("coefficients are not allocated".to_owned()));
        };
        let grids = &production.grids[bin];

        let (x_lo, x_hi, subprocess) = indexer.order(event.x1, event.x2, event.subprocess);
        let lo = x_weights(&grids.x, x_lo, reweight);
        let hi = if indexer.dim() == PdfDim::SingleHadron {
            Some(iter::once((0, 1.0)).collect())
        } else {
            x_weights(&grids.x, x_hi, reweight)
        };

        let (Some(lo), Some(hi)) = (lo, hi) else {
            self.stats.invalid_x += 1;
            return Ok(self.skip(EventOutcome::InvalidX, || {
                format!(
                    "momentum fractions x1={}, x2={} can not be interpolated",
                    event.x1, event.x2
                )
            }));
        };

        let (mu1_weights, mu2_weights) = match (&grids.scales, &self.config.scale) {
            (ScaleGrids::Flexible { mu1: grid1, mu2: grid2 }, _) => {
                (grid1.node_weights(mu1), grid2.node_weights(mu2))
            }
            (ScaleGrids::Fixed(variations), ScaleMode::Fixed { factors, .. }) => (
                variations[variation].node_weights(mu1 * factors[variation]),
                Some(iter::once((0, 1.0)).collect()),
            ),
            (ScaleGrids::Fixed(_), ScaleMode::Flexible { .. }) => {
                return Err(Error::Internal(
                    "fixed-scale grids in a flexible-scale table".to_owned(),
                ));
            }
        };

        let (Some(mu1_weights), Some(mu2_weights)) = (mu1_weights, mu2_weights) else {
            self.stats.invalid_scale += 1;
            return Ok(self.skip(EventOutcome::InvalidScale, || {
                format!("scales mu1={mu1}, mu2={mu2} can not be interpolated")
            }));
        };

        let flexible = matches!(grids.scales, ScaleGrids::Flexible { .. });
        let components = event.weights.components();

        if !flexible && components[0] == 0.0 {
            return Ok(EventOutcome::Filled);
        }

        let nx = grids.x.len();
        let mut updates = Vec::new();

        for (&(i1, w1), &(i2, w2)) in lo.iter().cartesian_product(&hi) {
            let (j1, j2, p) = indexer.canonicalize(i1, i2, subprocess);
            let ix = indexer.x_index(j1, j2, nx);

            for (&(m1, wm1), &(m2, wm2)) in mu1_weights.iter().cartesian_product(&mu2_weights) {
                let factor = w1 * w2 * wm1 * wm2 / bin_size;

                if flexible {
                    updates.extend(
                        ScaleDep::ALL
                            .into_iter()
                            .zip(components)
                            .filter(|&(_, weight)| weight != 0.0)
                            .map(|(dep, weight)| (dep, [ix, m1, m2, p], weight * factor)),
                    );
                } else {
                    updates.push((
                        ScaleDep::Central,
                        [variation, m1, ix, p],
                        components[0] * factor,
                    ));
                }
            }
        }

        // the tensor is only touched once every distributed weight is known to be finite
        if let Some((dep, _, value)) = updates.iter().find(|(_, _, value)| !value.is_finite()) {
            return Err(Error::Internal(format!(
                "distributed weight {value} of component {dep} in bin {bin} is not finite"
            )));
        }

        for (dep, index, value) in updates {
            production.tensor.add(dep, bin, index, value)?;
        }

        Ok(EventOutcome::Filled)
    }

    /// Finish the calibration and turn the statistics into grid limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the table is not calibrating.
    pub fn finish_calibration(&self) -> Result<WarmupTable> {
        let stats = self
            .calibration()
            .ok_or_else(|| self.invalid_state("finish_calibration"))?;

        info!(
            "finishing calibration after {} events in {} bins",
            self.stats.events,
            stats.bins()
        );

        stats.finalize(&self.binning, &self.config.warmup, &self.config.scale_descriptions)
    }

    /// Multiply all coefficients with `factor`. Cached events are filled first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the table is not filling.
    pub fn multiply_by_constant(&mut self, factor: f64) -> Result<()> {
        self.flush_cache()?;
        self.production("multiply_by_constant")?.tensor.scale(factor);
        Ok(())
    }

    /// Multiply the coefficients of each bin with its size. Cached events are filled first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the table is not filling.
    pub fn multiply_by_bin_size(&mut self) -> Result<()> {
        self.flush_cache()?;
        let sizes = self.binning.bin_sizes().to_vec();
        self.production("multiply_by_bin_size")?
            .tensor
            .scale_by(|bin, _| sizes[bin]);
        Ok(())
    }

    /// Divide the coefficients of each bin by its size. Cached events are filled first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the table is not filling.
    pub fn divide_by_bin_size(&mut self) -> Result<()> {
        self.flush_cache()?;
        let sizes = self.binning.bin_sizes().to_vec();
        self.production("divide_by_bin_size")?
            .tensor
            .scale_by(|bin, _| 1.0 / sizes[bin]);
        Ok(())
    }

    /// Fill cached events, apply `normalization` and stop accepting events.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the table is not filling and [`Error::Config`] if the
    /// normalization weights are unusable.
    pub fn finalize(&mut self, normalization: Normalization) -> Result<()> {
        self.flush_cache()?;

        let events = self
            .events
            .unwrap_or_else(|| convert::f64_from_u64(self.stats.events));
        let subprocesses = self.config.subprocesses;
        let bins = self.binning.bins();
        let tensor = &mut self.production("finalize")?.tensor;

        let events = match normalization {
            Normalization::None => events,
            Normalization::TotalWeight(weight) => {
                if !(events > 0.0 && weight.is_finite()) {
                    return Err(Error::Config(format!(
                        "can not normalize {events} events to the weight {weight}"
                    )));
                }

                tensor.scale(weight / events);
                weight
            }
            Normalization::PerSubprocessBin(weights) => {
                if weights.len() != subprocesses
                    || weights.iter().any(|w| w.len() != bins)
                {
                    return Err(Error::Config(format!(
                        "normalization weights must be given for {subprocesses} subprocesses and \
                         {bins} bins"
                    )));
                }

                if weights.iter().flatten().any(|&w| w == 0.0 || !w.is_finite()) {
                    return Err(Error::Config(
                        "normalization weights must be finite and non-zero".to_owned(),
                    ));
                }

                tensor.scale_by(|bin, subprocess| 1.0 / weights[subprocess][bin]);
                1.0
            }
        };

        self.events = Some(events);
        self.state = TableState::Finalized;

        info!("finalized table normalized to {events} events");

        Ok(())
    }

    /// Return the finalized table.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the table is not finalized.
    pub fn table(&self) -> Result<Table> {
        match (&self.phase, self.state) {
            (Phase::Production(production), TableState::Finalized | TableState::Persisted) => {
                Ok(Table::new(
                    self.config.clone(),
                    self.binning.clone(),
                    production.grids.clone(),
                    production.tensor.clone(),
                    self.stats.clone(),
                    self.events.unwrap_or_default(),
                    self.metadata.clone(),
                ))
            }
            _ => Err(self.invalid_state("table")),
        }
    }

    /// Write the finalized table into `writer`, optionally LZ4-compressed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the table is not finalized, or an error if writing
    /// fails.
    pub fn write(&mut self, writer: impl Write, lz4: bool) -> Result<()> {
        let table = self.table()?;

        if lz4 {
            table.write_lz4(writer)?;
        } else {
            table.write(writer)?;
        }

        self.state = TableState::Persisted;

        Ok(())
    }
}
