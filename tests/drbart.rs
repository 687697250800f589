use std::str::FromStr;

use drbart::cutpoints::CutpointGrid;
use drbart::data::ExternalData;
use drbart::drbart::MeanModel;
use drbart::error::DrBartError;
use drbart::proposal::ProposalKind;
use drbart::slice::SliceSearch;
use drbart::snapshot::MemorySink;
use drbart::tree::DecisionTree;
use drbart::{DrBartSettings, DrBartState};

use approx::assert_relative_eq;
use ndarray::{Array1, Array2, ArrayView1};
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rand_xoshiro::Xoshiro256PlusPlus;
use rstest::rstest;

/// Step function at 0.5 with noise standard deviation 0.5. Column 0 holds
/// the latent covariate, column 1 the observed one.
fn step_data(n: usize, n_cuts: usize, rng: &mut Xoshiro256PlusPlus) -> ExternalData {
    let mut x = Array2::zeros((n, 2));
    let mut y = Array1::zeros(n);
    for i in 0..n {
        let xi: f64 = rng.gen();
        let z: f64 = rng.sample(StandardNormal);
        x[[i, 0]] = rng.gen::<f64>();
        x[[i, 1]] = xi;
        y[i] = if xi < 0.5 { 0.0 } else { 2.0 };
        y[i] += 0.5 * z;
    }

    let cuts: Vec<f64> = (1..n_cuts + 1)
        .map(|i| i as f64 / (n_cuts + 1) as f64)
        .collect();
    let grid = CutpointGrid::new(vec![cuts.clone(), cuts]).unwrap();
    ExternalData::new(y, x.clone(), x, grid.clone(), grid).unwrap()
}

fn small_settings() -> DrBartSettings {
    DrBartSettings {
        n_trees: 5,
        n_precision_trees: 5,
        burn: 5,
        draws: 4,
        thin: 2,
        print_every: 0,
        ..DrBartSettings::default()
    }
}

#[test]
fn test_settings_defaults_and_json() {
    let defaults = DrBartSettings::default();
    assert!(defaults.validate().is_ok());
    assert_eq!(defaults.alpha, 0.95);
    assert_eq!(defaults.min_latent_occupancy, 5);
    assert_eq!(defaults.slice_search, SliceSearch::SteppingOut);

    let settings = DrBartSettings::from_json(
        r#"{"n_trees": 20, "scale_mixture": true, "mean_model": "homoscedastic",
            "proposal": "reversible_jump", "slice_search": "doubling"}"#,
    )
    .unwrap();
    assert_eq!(settings.n_trees, 20);
    assert!(settings.scale_mixture);
    assert_eq!(settings.mean_model, MeanModel::Homoscedastic);
    assert_eq!(settings.proposal, ProposalKind::ReversibleJump);
    assert_eq!(settings.slice_search, SliceSearch::Doubling);
    assert_eq!(settings.beta, defaults.beta);

    assert!(matches!(
        DrBartSettings::from_json("{\"n_trees\": -1}"),
        Err(DrBartError::Settings(_))
    ));
    assert_eq!(MeanModel::from_str("Heteroscedastic"), Ok(MeanModel::Heteroscedastic));
}

#[rstest]
#[case(DrBartSettings { n_trees: 0, ..DrBartSettings::default() })]
#[case(DrBartSettings { alpha: 1.0, ..DrBartSettings::default() })]
#[case(DrBartSettings { beta: -1.0, ..DrBartSettings::default() })]
#[case(DrBartSettings { birth_probability: 0.0, ..DrBartSettings::default() })]
#[case(DrBartSettings { nu: 0.0, ..DrBartSettings::default() })]
#[case(DrBartSettings { phi0: f64::NAN, ..DrBartSettings::default() })]
#[case(DrBartSettings { thin: 0, ..DrBartSettings::default() })]
#[case(DrBartSettings { min_leaf_size: 0, ..DrBartSettings::default() })]
#[case(DrBartSettings { latent_bounds: (1.0, 0.0), ..DrBartSettings::default() })]
#[case(DrBartSettings { sigma: Some(-2.0), ..DrBartSettings::default() })]
fn test_invalid_settings(#[case] settings: DrBartSettings) {
    assert!(matches!(
        settings.validate(),
        Err(DrBartError::InvalidSettings(_))
    ));
}

#[test]
fn test_external_data_validation() {
    let grid = CutpointGrid::new(vec![vec![0.5], vec![0.5]]).unwrap();
    let x = Array2::from_elem((4, 2), 0.25);
    let y = Array1::from_vec(vec![1.0, 2.0, 3.0, 4.0]);

    assert!(matches!(
        ExternalData::new(y.clone(), x.clone(), Array2::zeros((3, 2)), grid.clone(), grid.clone()),
        Err(DrBartError::DimensionMismatch {
            field: "X_precision rows",
            expected: 4,
            actual: 3
        })
    ));

    let one_column = CutpointGrid::new(vec![vec![0.5]]).unwrap();
    assert!(matches!(
        ExternalData::new(y.clone(), x.clone(), x.clone(), one_column, grid.clone()),
        Err(DrBartError::DimensionMismatch { .. })
    ));

    let data = ExternalData::new(y, x.clone(), x, grid.clone(), grid).unwrap();
    assert!(data.clone().with_truncation(vec![true; 3]).is_err());
    assert!(data.clone().with_offset(Array1::from_elem(4, -1.0)).is_err());
    assert_eq!(data.with_offset(Array1::from_elem(4, 2.0)).unwrap().offset[3], 2.0);
}

#[test]
fn test_latent_values_must_lie_in_bounds() {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
    let mut data = step_data(40, 9, &mut rng);
    data.X[[3, 0]] = 1.5;

    assert!(matches!(
        DrBartState::new(small_settings(), data),
        Err(DrBartError::InvalidSettings(_))
    ));
}

#[test]
fn test_initial_state() {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(2);
    let data = step_data(50, 9, &mut rng);
    let ybar = data.y.mean().unwrap();
    let offset = Array1::from_shape_fn(50, |i| 1.0 + (i % 3) as f64);
    let data = data.with_offset(offset.clone()).unwrap();

    let settings = DrBartSettings {
        phi0: 2.0,
        ..small_settings()
    };
    let state = DrBartState::new(settings, data).unwrap();

    for &fit in state.mean_fit() {
        assert_relative_eq!(fit, ybar, epsilon = 1e-12);
    }
    for (fit, off) in state.precision_fit().iter().zip(offset.iter()) {
        assert_relative_eq!(*fit, 2.0 * off, epsilon = 1e-12);
    }
    assert_eq!(state.iteration(), 0);
}

#[rstest]
#[case(false, MeanModel::Heteroscedastic)]
#[case(true, MeanModel::Heteroscedastic)]
#[case(false, MeanModel::Homoscedastic)]
fn test_short_run_keeps_invariants(#[case] scale_mixture: bool, #[case] mean_model: MeanModel) {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
    let n = 60;
    let data = step_data(n, 9, &mut rng);
    let truncated: Vec<bool> = (0..n).map(|i| i % 10 == 0).collect();
    let observed = data.y.clone();
    let data = data.with_truncation(truncated.clone()).unwrap();

    let settings = DrBartSettings {
        scale_mixture,
        mean_model,
        ..small_settings()
    };
    let mut state = DrBartState::new(settings, data).unwrap();
    let mut sink = MemorySink::default();
    state.run(&mut rng, &mut sink).unwrap();

    // burn 5, thin 2, draws 4: iterations 5, 7, 9 and 11 are kept out of 13
    assert_eq!(state.iteration(), 13);
    let iterations: Vec<usize> = sink.draws.iter().map(|d| d.iteration).collect();
    assert_eq!(iterations, vec![5, 7, 9, 11]);

    for draw in &sink.draws {
        assert_eq!(draw.mean_trees.len(), 5);
        assert_eq!(draw.precision_trees.len(), 5);
        assert_eq!(draw.latent.len(), n);
        assert_eq!(draw.precision_scale, 1.0);
        assert!(draw.latent.iter().all(|u| (0.0..=1.0).contains(u)));
        assert!(draw.latent_boundaries.windows(2).all(|w| w[0] < w[1]));
        assert_relative_eq!(draw.latent_boundaries[0], 0.1, epsilon = 1e-12);
        assert_relative_eq!(*draw.latent_boundaries.last().unwrap(), 0.9, epsilon = 1e-12);
        assert!(draw.mean_moves.births + draw.mean_moves.deaths <= 5);
    }

    // Running fits match the trees after the final iteration
    let mean = state.mean_ensemble();
    for (a, b) in mean.recompute_fit().iter().zip(state.mean_fit().iter()) {
        assert_relative_eq!(*a, *b, epsilon = 1e-9);
    }
    for snapshot in &sink.draws.last().unwrap().mean_trees {
        let tree = DecisionTree::from_snapshot(snapshot).unwrap();
        assert!(tree.validate_grid(&mean.grid).is_ok());
    }
    for (a, b) in state
        .precision_ensemble()
        .recompute_fit()
        .iter()
        .zip(state.precision_fit().iter())
    {
        assert_relative_eq!(*a, *b, max_relative = 1e-9);
    }

    // Truncated responses are imputed above their observed value
    for (i, &t) in truncated.iter().enumerate() {
        if t {
            assert!(state.response()[i] >= observed[i]);
        } else {
            assert_eq!(state.response()[i], observed[i]);
        }
    }

    assert!(state.log_likelihood().is_finite());
    assert_eq!(state.latent().len(), n);
}

#[test]
fn test_step_reports_summary() {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(4);
    let data = step_data(60, 9, &mut rng);
    let mut state = DrBartState::new(small_settings(), data).unwrap();

    let summary = state.step(&mut rng).unwrap();
    assert_eq!(state.iteration(), 1);
    assert_eq!(summary.latent.resampled + summary.latent.skipped, 60);
    assert_eq!(summary.log_likelihood, state.log_likelihood());
    assert_eq!(state.last_summary(), &summary);
    assert_eq!(state.draw().iteration, 0);
}

/// Mean and precision of every tree ensemble at covariate row `row`.
fn predict(state: &DrBartState, row: ArrayView1<f64>) -> (f64, f64) {
    let mean = state.mean_ensemble();
    let precision = state.precision_ensemble();
    let mu: f64 = mean.trees.iter().map(|t| t.predict(row, &mean.grid)).sum();
    let prec: f64 = precision
        .trees
        .iter()
        .map(|t| t.predict(row, &precision.grid))
        .product();
    (mu, state.params.phi0 * prec)
}

#[test]
#[ignore = "long statistical run"]
fn test_recovers_step_and_noise_level() {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(2024);
    let n = 200;
    let n_cuts = 19;
    let data = step_data(n, n_cuts, &mut rng);

    let settings = DrBartSettings {
        n_trees: 20,
        n_precision_trees: 20,
        burn: 500,
        draws: 500,
        thin: 1,
        print_every: 0,
        ..DrBartSettings::default()
    };
    let (burn, draws) = (settings.burn, settings.draws);
    let mut state = DrBartState::new(settings, data).unwrap();

    // The latent covariate is uniform on [0, 1]: integrate it out on a grid
    let n_cells = n_cuts + 1;
    let cell_width = 1.0 / n_cells as f64;
    let xs: Vec<f64> = (0..n_cells).map(|c| (c as f64 + 0.5) * cell_width).collect();
    let us: Vec<f64> = (0..50).map(|j| (j as f64 + 0.5) / 50.0).collect();

    let mut curve = vec![0.0; n_cells];
    let mut variance = 0.0;
    let mut n_evaluated = 0;
    for i in 0..burn + draws {
        state.step(&mut rng).unwrap();
        if i < burn || (i - burn) % 5 != 0 {
            continue;
        }
        n_evaluated += 1;

        let mut row = Array1::zeros(2);
        for (c, &x) in xs.iter().enumerate() {
            row[1] = x;
            let (mut sum_mu, mut sum_mu2, mut sum_var) = (0.0, 0.0, 0.0);
            for &u in &us {
                row[0] = u;
                let (mu, prec) = predict(&state, row.view());
                sum_mu += mu;
                sum_mu2 += mu * mu;
                sum_var += 1.0 / prec;
            }
            let m = us.len() as f64;
            let marginal_mean = sum_mu / m;
            curve[c] += marginal_mean;
            variance += sum_var / m + (sum_mu2 / m - marginal_mean * marginal_mean);
        }
    }

    for value in curve.iter_mut() {
        *value /= n_evaluated as f64;
    }
    let crossing = curve.iter().position(|&v| v > 1.0).unwrap();
    let step_location = crossing as f64 * cell_width;
    assert!((step_location - 0.5).abs() <= cell_width + 1e-12);

    // Marginal predictive precision of y given x
    let precision = (n_evaluated * n_cells) as f64 / variance;
    let truth = 4.0;
    assert!(
        precision > truth / 1.5 && precision < truth * 1.5,
        "predictive precision {precision}"
    );
}
