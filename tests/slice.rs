use std::str::FromStr;

use drbart::slice::{SliceSampler, SliceSearch};

use approx::assert_relative_eq;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use rstest::rstest;

fn moments(draws: &[f64]) -> (f64, f64) {
    let n = draws.len() as f64;
    let mean = draws.iter().sum::<f64>() / n;
    let var = draws.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n;
    (mean, var)
}

#[test]
fn test_slice_search_from_str() {
    assert_eq!(
        SliceSearch::from_str("stepping_out"),
        Ok(SliceSearch::SteppingOut)
    );
    assert_eq!(SliceSearch::from_str("Doubling"), Ok(SliceSearch::Doubling));
    assert!(SliceSearch::from_str("hit_and_run").is_err());
}

#[rstest]
#[case(SliceSearch::SteppingOut)]
#[case(SliceSearch::Doubling)]
fn test_standard_normal_target(#[case] search: SliceSearch) {
    let sampler = SliceSampler {
        width: 1.0,
        lower: -10.0,
        upper: 10.0,
        search,
        max_doublings: 10,
    };
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(8);
    let mut density = |x: f64| -0.5 * x * x;

    let mut x = 0.0;
    let draws: Vec<f64> = (0..40_000)
        .map(|_| {
            x = sampler.sample(x, &mut density, &mut rng);
            x
        })
        .collect();

    let (mean, var) = moments(&draws);
    assert_relative_eq!(mean, 0.0, epsilon = 0.05);
    assert_relative_eq!(var, 1.0, epsilon = 0.08);
}

#[rstest]
#[case(SliceSearch::SteppingOut)]
#[case(SliceSearch::Doubling)]
fn test_beta_target_on_unit_interval(#[case] search: SliceSearch) {
    let sampler = SliceSampler {
        search,
        ..SliceSampler::default()
    };
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(21);
    // Beta(2, 5), mean 2 / 7
    let mut density = |x: f64| x.ln() + 4.0 * (1.0 - x).ln();

    let mut x = 0.5;
    let mut draws = Vec::with_capacity(40_000);
    for _ in 0..40_000 {
        x = sampler.sample(x, &mut density, &mut rng);
        assert!((0.0..=1.0).contains(&x));
        draws.push(x);
    }

    let (mean, _) = moments(&draws);
    assert_relative_eq!(mean, 2.0 / 7.0, epsilon = 0.01);
}

#[test]
fn test_flat_density_stays_in_bounds() {
    let sampler = SliceSampler {
        width: 5.0,
        lower: 2.0,
        upper: 3.0,
        ..SliceSampler::default()
    };
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(2);
    let mut density = |_: f64| 0.0;

    let mut x = 2.5;
    for _ in 0..10_000 {
        x = sampler.sample(x, &mut density, &mut rng);
        assert!((2.0..=3.0).contains(&x));
    }
}
