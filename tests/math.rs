use drbart::math::{
    ln_gamma, ln_normal_pdf, standard_normal_above, truncated_normal_above,
    truncated_normal_below,
};

use approx::assert_relative_eq;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use rstest::rstest;
use statrs::distribution::{Continuous, Normal};

#[rstest]
#[case(0.0, 0.0, 1.0)]
#[case(1.5, -0.5, 2.0)]
#[case(-3.0, 1.0, 0.25)]
fn test_ln_normal_pdf(#[case] x: f64, #[case] mean: f64, #[case] sd: f64) {
    let reference = Normal::new(mean, sd).unwrap();
    assert_relative_eq!(ln_normal_pdf(x, mean, sd), reference.ln_pdf(x), epsilon = 1e-12);
}

#[test]
fn test_ln_gamma() {
    assert_relative_eq!(ln_gamma(1.0), 0.0, epsilon = 1e-12);
    assert_relative_eq!(ln_gamma(5.0), 24f64.ln(), epsilon = 1e-12);
}

/// Mean of a standard normal truncated below at `lower`: `φ(L) / (1 - Φ(L))`.
#[rstest]
#[case(2.0, 2.3732)]
#[case(-1.0, 0.2876)]
#[case(0.0, 0.7979)]
fn test_standard_normal_above(#[case] lower: f64, #[case] expected_mean: f64) {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(1234);
    let n_draws = 100_000;

    let mut total = 0.0;
    for _ in 0..n_draws {
        let x = standard_normal_above(lower, &mut rng);
        assert!(x >= lower);
        total += x;
    }

    assert_relative_eq!(total / n_draws as f64, expected_mean, epsilon = 0.01);
}

#[test]
fn test_far_tail_stays_above_bound() {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(99);
    for _ in 0..10_000 {
        assert!(standard_normal_above(12.0, &mut rng) >= 12.0);
    }
}

#[test]
fn test_location_scale_truncation() {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);
    let n_draws = 50_000;

    let mut above = 0.0;
    let mut below = 0.0;
    for _ in 0..n_draws {
        let a = truncated_normal_above(1.0, 0.5, 2.0, &mut rng);
        let b = truncated_normal_below(1.0, 0.5, 0.0, &mut rng);
        assert!(a >= 2.0);
        assert!(b <= 0.0);
        above += a;
        below += b;
    }

    // Both bounds sit two standard deviations from the mean.
    assert_relative_eq!(above / n_draws as f64, 1.0 + 0.5 * 2.3732, epsilon = 0.01);
    assert_relative_eq!(below / n_draws as f64, 1.0 - 0.5 * 2.3732, epsilon = 0.01);
}
