//! Fits a step function with Gaussian noise and prints the posterior
//! mean curve.
//!
//! Usage: `demo [settings.json]`. Set `RUST_LOG=debug` for per-iteration
//! diagnostics.

use std::error::Error;

use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rand_xoshiro::Xoshiro256PlusPlus;
use tracing::info;
use tracing_subscriber::EnvFilter;

use drbart::cutpoints::CutpointGrid;
use drbart::data::ExternalData;
use drbart::snapshot::MemorySink;
use drbart::tree::DecisionTree;
use drbart::{DrBartSettings, DrBartState};

const N: usize = 200;
const N_CUTS: usize = 100;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let settings = match std::env::args().nth(1) {
        Some(path) => DrBartSettings::from_json(&std::fs::read_to_string(path)?)?,
        None => DrBartSettings {
            n_trees: 20,
            n_precision_trees: 20,
            burn: 200,
            draws: 200,
            ..DrBartSettings::default()
        },
    };

    let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);

    // Column 0 is the latent covariate, column 1 the observed one.
    let mut x = Array2::zeros((N, 2));
    let mut y = Array1::zeros(N);
    for i in 0..N {
        let xi: f64 = rng.gen();
        let z: f64 = rng.sample(StandardNormal);
        x[[i, 0]] = rng.gen::<f64>();
        x[[i, 1]] = xi;
        let level = if xi < 0.5 { 0.0 } else { 2.0 };
        y[i] = level + 0.5 * z;
    }

    let grid = CutpointGrid::uniform(&x, N_CUTS)?.with_interval(0, 0.0, 1.0, N_CUTS)?;
    let data = ExternalData::new(y, x.clone(), x, grid.clone(), grid.clone())?;

    let mut state = DrBartState::new(settings, data)?;
    let mut sink = MemorySink::with_capacity(state.params.draws);
    state.run(&mut rng, &mut sink)?;

    info!(draws = sink.draws.len(), "finished sampling");

    let mut point = Array1::zeros(2);
    point[0] = 0.5;
    for step in 1..10 {
        point[1] = step as f64 / 10.0;
        let mut total = 0.0;
        for draw in &sink.draws {
            for snapshot in &draw.mean_trees {
                let tree = DecisionTree::from_snapshot(snapshot)?;
                tree.validate_grid(&grid)?;
                total += tree.predict(point.view(), &grid);
            }
        }
        let mean = total / sink.draws.len().max(1) as f64;
        println!("x = {:.1}  posterior mean = {:.3}", point[1], mean);
    }

    let precision = state.precision_fit().mean().unwrap_or(f64::NAN);
    println!("average precision fit = {:.3} (truth 4.0)", precision);

    Ok(())
}
