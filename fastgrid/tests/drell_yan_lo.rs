use anyhow::Result;
use fastgrid::bin::{BinningModel, DiffKind};
use fastgrid::config::{AxisConfig, ScaleMode, TableConfig};
use fastgrid::event::{BinCoord, Event, Scenario, Weights};
use fastgrid::filler::{EventOutcome, Normalization, TableCreator};
use fastgrid::nodes::ScaleGrids;
use fastgrid::process::PdfDim;
use fastgrid::table::Table;
use fastgrid::tensor::{CoefficientTensor, ScaleDep};
use fastgrid::warmup::WarmupTable;
use float_cmp::{approx_eq, assert_approx_eq};
use rand::Rng;
use rand_pcg::Pcg64;
use std::f64::consts::PI;

// Eq. (2.9) of M. Huber's thesis - gamma-gamma contribution to DY pair production
fn int_photo(s: f64, t: f64, u: f64) -> f64 {
    let alpha0: f64 = 1.0 / 137.03599911;
    alpha0.powi(2) / 2.0 / s * (t / u + u / t)
}

struct Psp2to2 {
    s: f64,
    t: f64,
    u: f64,
    x1: f64,
    x2: f64,
    jacobian: f64,
}

fn hadronic_pspgen(rng: &mut impl Rng, mmin: f64, mmax: f64) -> Psp2to2 {
    let smin = mmin * mmin;
    let smax = mmax * mmax;

    let r1 = rng.r#gen::<f64>();
    let r2 = rng.r#gen::<f64>();
    let tau0 = smin / smax;
    let tau = tau0.powf(r1);
    let y = tau.powf(1.0 - r2);
    let x1 = y;
    let x2 = tau / y;
    let s = tau * smax;
    let mut jacobian = tau * tau0.ln().powi(2) * r1;

    // theta integration (in the CMS)
    let cos_theta = 2.0 * rng.r#gen::<f64>() - 1.0;
    jacobian *= 2.0;

    let t = -0.5 * s * (1.0 - cos_theta);
    let u = -0.5 * s * (1.0 + cos_theta);

    // phi integration
    jacobian *= 2.0 * PI;

    Psp2to2 {
        s,
        t,
        u,
        x1,
        x2,
        jacobian,
    }
}

// photon-induced lepton pairs, spread evenly over three subprocesses
fn drell_yan_events(seed: u128, calls: usize) -> Vec<(Event, Scenario)> {
    let mut rng = Pcg64::new(seed, 0xa02bdbf7bb3c0a7ac28fa16a64abf96);

    // in GeV^2 pbarn
    let hbarc2 = 3.893793721e8;

    (0..calls)
        .map(|call| {
            let Psp2to2 {
                s,
                t,
                u,
                x1,
                x2,
                jacobian,
            } = hadronic_pspgen(&mut rng, 60.0, 7000.0);

            let ptl = (t * u / s).sqrt();
            let mll = s.sqrt();
            let yll = 0.5 * (x1 / x2).ln();

            let w = jacobian * int_photo(s, t, u) * hbarc2 / (calls as f64);
            let weights = Weights {
                wf: -0.25 * w,
                wr: 0.5 * w,
                wrr: 0.01 * w,
                ..Weights::central(w)
            };

            let mut event = Event::new(x1, x2, call % 3, weights);
            event.sigma = w;

            (
                event,
                Scenario::new(BinCoord::value(yll.abs()), mll, mll.hypot(ptl)),
            )
        })
        .collect()
}

fn rapidity_binning() -> Result<BinningModel> {
    let edges: Vec<_> = (0..=6).map(|i| f64::from(i) * 0.4).collect();
    Ok(BinningModel::from_edges("yll", DiffKind::Differential, &edges, 1.0)?)
}

fn config(flexible: bool, cache_max: usize) -> TableConfig {
    let (scale, scale_descriptions) = if flexible {
        (
            ScaleMode::Flexible {
                mu1: AxisConfig::scale(),
                mu2: AxisConfig::scale(),
            },
            vec!["mll".to_owned(), "sqrt(mll^2 + ptl^2)".to_owned()],
        )
    } else {
        (
            ScaleMode::Fixed {
                mu: AxisConfig::scale(),
                factors: vec![1.0, 0.5, 2.0],
            },
            vec!["mll".to_owned()],
        )
    };

    TableConfig {
        subprocesses: 3,
        asymmetric_processes: vec![(1, 2)],
        scale,
        scale_descriptions,
        cache_max,
        ..TableConfig::default()
    }
}

fn calibrate(config: &TableConfig, events: &[(Event, Scenario)]) -> Result<WarmupTable> {
    let mut creator = TableCreator::calibrate(config.clone(), rapidity_binning()?)?;

    for (event, scenario) in events {
        creator.fill(event, scenario, 0)?;
    }

    Ok(creator.finish_calibration()?)
}

fn fill_table(
    config: &TableConfig,
    warmup: &WarmupTable,
    events: &[(Event, Scenario)],
) -> Result<Table> {
    let mut creator = TableCreator::new(config.clone(), rapidity_binning()?, warmup)?;

    for (event, scenario) in events {
        for variation in 0..config.scale.variations() {
            creator.fill(event, scenario, variation)?;
        }
    }

    creator.finalize(Normalization::None)?;

    Ok(creator.table()?)
}

fn assert_tensors_close(lhs: &CoefficientTensor, rhs: &CoefficientTensor) {
    assert_eq!(lhs.layout(), rhs.layout());

    for dep in lhs.scale_deps() {
        let lhs = lhs.component(dep).unwrap();
        let rhs = rhs.component(dep).unwrap();
        let scale = lhs.iter().fold(0.0_f64, |max, value| max.max(value.abs()));

        for (a, b) in lhs.iter().zip(rhs) {
            assert!(
                approx_eq!(f64, *a, *b, epsilon = 1e-12 * scale, ulps = 16),
                "{dep}: {a} != {b}"
            );
        }
    }
}

#[test]
fn calibration_covers_observed_values() -> Result<()> {
    let config = TableConfig {
        subprocesses: 1,
        asymmetric_processes: vec![],
        ..TableConfig::default()
    };
    let binning = BinningModel::from_edges("m", DiffKind::NonDifferential, &[0.0, 1.0], 1.0)?;
    let mut creator = TableCreator::calibrate(config.clone(), binning.clone())?;

    for (x1, x2, mu) in [(0.05, 0.2, 50.0), (0.2, 0.05, 150.0)] {
        let outcome = creator.fill(
            &Event::new(x1, x2, 0, Weights::central(1.0)),
            &Scenario::new(BinCoord::Index(0), mu, 0.0),
            0,
        )?;
        assert_eq!(outcome, EventOutcome::Calibrated);
    }

    let warmup = creator.finish_calibration()?;
    let creator = TableCreator::new(config, binning, &warmup)?;
    let grids = &creator.grids().unwrap()[0];

    let x = grids.x.nodes();
    assert!(x[0] <= 0.05);
    assert!(x[x.len() - 1] >= 0.2);

    let ScaleGrids::Fixed(mu) = &grids.scales else {
        panic!("expected fixed-scale grids");
    };
    let mu = mu[0].nodes();
    assert!(mu[0] <= 50.0);
    assert!(mu[mu.len() - 1] >= 150.0);

    Ok(())
}

#[test]
fn exchanged_hadrons_share_cells() -> Result<()> {
    let config = TableConfig {
        subprocesses: 6,
        asymmetric_processes: vec![(2, 5)],
        ..TableConfig::default()
    };
    let binning = BinningModel::from_edges("m", DiffKind::NonDifferential, &[0.0, 1.0], 1.0)?;
    let warmup = WarmupTable::from_limits(
        &binning,
        vec!["m".to_owned()],
        &[1e-3],
        &[(10.0, 1000.0)],
        None,
    )?;
    let scenario = Scenario::new(BinCoord::Index(0), 91.2, 0.0);

    let mut single = TableCreator::new(config.clone(), binning.clone(), &warmup)?;
    single.fill(&Event::new(0.3, 0.1, 2, Weights::central(1.0)), &scenario, 0)?;
    single.finalize(Normalization::None)?;

    let mut both = TableCreator::new(config, binning, &warmup)?;
    both.fill(&Event::new(0.3, 0.1, 2, Weights::central(1.0)), &scenario, 0)?;
    both.fill(&Event::new(0.1, 0.3, 5, Weights::central(1.0)), &scenario, 0)?;
    both.finalize(Normalization::None)?;

    let single = single.table()?;
    let both = both.table()?;
    let single = single.tensor().component(ScaleDep::Central).unwrap();
    let both = both.tensor().component(ScaleDep::Central).unwrap();

    // the subprocess is the innermost index; node pairs below the diagonal are stored with the
    // exchanged subprocess
    for (index, (&one, &two)) in single.iter().zip(both).enumerate() {
        assert_approx_eq!(f64, two, 2.0 * one, ulps = 4);

        if !matches!(index % 6, 2 | 5) {
            assert_eq!(two, 0.0);
        }
    }

    assert!(both.iter().any(|&value| value != 0.0));

    Ok(())
}

#[test]
fn exchange_symmetry() -> Result<()> {
    let config = TableConfig {
        subprocesses: 6,
        asymmetric_processes: vec![(2, 5), (0, 3)],
        ..TableConfig::default()
    };
    let binning = BinningModel::from_edges("m", DiffKind::NonDifferential, &[0.0, 1.0], 1.0)?;
    let warmup = WarmupTable::from_limits(
        &binning,
        vec!["m".to_owned()],
        &[1e-3],
        &[(10.0, 1000.0)],
        None,
    )?;
    let scenario = Scenario::new(BinCoord::Index(0), 91.2, 0.0);
    let exchanged = |p: usize| match p {
        0 => 3,
        3 => 0,
        2 => 5,
        5 => 2,
        p => p,
    };

    let fill = |x1: f64, x2: f64, p: usize| -> Result<Vec<f64>> {
        let mut creator = TableCreator::new(config.clone(), binning.clone(), &warmup)?;
        creator.fill(&Event::new(x1, x2, p, Weights::central(0.7)), &scenario, 0)?;
        creator.finalize(Normalization::None)?;

        Ok(creator
            .table()?
            .tensor()
            .component(ScaleDep::Central)
            .unwrap()
            .to_vec())
    };

    for (a, b) in [(0.3, 0.1), (0.02, 0.5), (0.7, 0.004), (0.011, 0.012)] {
        for p in 0..6 {
            let direct = fill(a, b, p)?;

            assert_eq!(direct, fill(b, a, exchanged(p))?, "x=({a}, {b}), p={p}");
            assert!(direct.iter().any(|&value| value != 0.0));
        }
    }

    Ok(())
}

#[test]
fn cache_is_transparent() -> Result<()> {
    let mut events = drell_yan_events(0xcafef00dd15ea5e5, 2000);
    let warmup = calibrate(&config(true, 0), &events)?;

    // every phase-space point is generated twice in a row
    events = events
        .into_iter()
        .flat_map(|entry| [entry.clone(), entry])
        .collect();

    let direct = fill_table(&config(true, 0), &warmup, &events)?;
    assert!(direct.stats().out_of_range > 0);
    assert!(!direct.tensor().is_zero(ScaleDep::Central));
    assert!(!direct.tensor().is_zero(ScaleDep::RenRen));
    assert!(direct.tensor().is_zero(ScaleDep::FactFact));

    for cache_max in [1, 20, 1000] {
        let cached = fill_table(&config(true, cache_max), &warmup, &events)?;

        assert_tensors_close(direct.tensor(), cached.tensor());
        assert_eq!(direct.stats().counts, cached.stats().counts);
        assert_eq!(direct.stats().events, cached.stats().events);
    }

    Ok(())
}

#[test]
fn merged_runs_equal_a_combined_run() -> Result<()> {
    let events = drell_yan_events(0xcafef00dd15ea5e5, 1000);
    let config = config(true, 20);
    let warmup = calibrate(&config, &events)?;

    let combined = fill_table(&config, &warmup, &events)?;
    let mut first = fill_table(&config, &warmup, &events[..400])?;
    let second = fill_table(&config, &warmup, &events[400..])?;

    first.merge(&second, 1.0)?;

    assert_tensors_close(combined.tensor(), first.tensor());
    assert_eq!(combined.stats().counts, first.stats().counts);
    assert_eq!(combined.stats().processed, first.stats().processed);
    assert_approx_eq!(f64, combined.events(), first.events(), ulps = 2);
    assert_approx_eq!(f64, combined.stats().sigma, first.stats().sigma, epsilon = 1e-9);

    // tables built from other calibration data can not be merged
    let other_warmup = calibrate(&config, &events[..10])?;
    let other = fill_table(&config, &other_warmup, &events[..10])?;
    assert!(first.merge(&other, 1.0).is_err());

    Ok(())
}

#[test]
fn persisted_tables_round_trip() -> Result<()> {
    let events = drell_yan_events(0xcafef00dd15ea5e5, 500);
    let config = config(false, 0);
    let warmup = calibrate(&config, &events)?;

    let mut creator = TableCreator::new(config.clone(), rapidity_binning()?, &warmup)?;

    for (event, scenario) in &events {
        for variation in 0..3 {
            creator.fill(event, scenario, variation)?;
        }
    }

    creator.finalize(Normalization::TotalWeight(1.0))?;
    creator.set_key_value("process", "photon-induced Drell-Yan");

    let mut plain = Vec::new();
    creator.write(&mut plain, false)?;

    let mut compressed = Vec::new();
    creator.write(&mut compressed, true)?;

    let table = creator.table()?;
    assert_eq!(Table::read(plain.as_slice())?, table);
    assert_eq!(Table::read(compressed.as_slice())?, table);
    assert_eq!(table.metadata()["process"], "photon-induced Drell-Yan");
    assert!(table.metadata().contains_key("fastgrid_gitversion"));

    // every scale factor has its own grid, built from the scaled limits
    for grids in table.grids() {
        let ScaleGrids::Fixed(variations) = &grids.scales else {
            panic!("expected fixed-scale grids");
        };

        assert_eq!(variations.len(), 3);

        for (grid, factor) in variations.iter().zip([1.0, 0.5, 2.0]) {
            let central = variations[0].nodes();
            assert_approx_eq!(f64, grid.nodes()[0], factor * central[0], ulps = 4);
        }
    }

    Ok(())
}

#[test]
fn single_hadron_tables() -> Result<()> {
    let config = TableConfig {
        pdf_dim: PdfDim::SingleHadron,
        subprocesses: 1,
        asymmetric_processes: vec![],
        ..config(true, 20)
    };
    let events: Vec<_> = drell_yan_events(0xcafef00dd15ea5e5, 300)
        .into_iter()
        .map(|(mut event, scenario)| {
            event.subprocess = 0;
            (event, scenario)
        })
        .collect();
    let warmup = calibrate(&config, &events)?;
    let table = fill_table(&config, &warmup, &events)?;

    for (bin, (grids, row)) in table.grids().iter().zip(&warmup.rows).enumerate() {
        let shape = table.tensor().layout().shape(bin).unwrap();

        assert_eq!(shape[0], grids.x.len());
        assert_eq!(shape[3], 1);
        assert!(grids.x.nodes()[0] <= row.x_min);
    }

    assert!(!table.tensor().is_zero(ScaleDep::Central));

    Ok(())
}

#[test]
fn warmup_tables_are_yaml() -> Result<()> {
    let events = drell_yan_events(0xcafef00dd15ea5e5, 500);
    let config = config(true, 20);
    let warmup = calibrate(&config, &events)?;

    let mut buffer = Vec::new();
    warmup.write(&mut buffer)?;
    let yaml = String::from_utf8(buffer)?;

    assert!(yaml.contains("mll"));

    let again = WarmupTable::read(yaml.as_bytes())?;
    assert_eq!(again, warmup);

    let creator = TableCreator::new(config, rapidity_binning()?, &again)?;
    assert_eq!(creator.grids().map(<[_]>::len), Some(6));

    Ok(())
}
