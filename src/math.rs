//! Scalar numeric helpers: truncated normal draws and log densities.

use rand::Rng;
use rand_distr::{Exp1, StandardNormal};

/// `0.5 * ln(2π)`.
pub const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_8;

/// Log density of `N(mean, sd^2)` at `x`.
#[inline]
pub fn ln_normal_pdf(x: f64, mean: f64, sd: f64) -> f64 {
    let z = (x - mean) / sd;
    -LN_SQRT_2PI - sd.ln() - 0.5 * z * z
}

/// Natural log of the gamma function.
#[inline]
pub fn ln_gamma(x: f64) -> f64 {
    statrs::function::gamma::ln_gamma(x)
}

/// Draws a standard normal conditioned on exceeding `lower`.
///
/// For `lower <= 0` plain rejection from the untruncated normal accepts with
/// probability at least one half. Further in the tail the draw is a shifted
/// exponential with rate `a = (lower + sqrt(lower^2 + 4)) / 2`, accepted with
/// probability `exp(-(x - a)^2 / 2)`; the expected number of trials stays
/// bounded however large `lower` is.
pub fn standard_normal_above<R: Rng + ?Sized>(lower: f64, rng: &mut R) -> f64 {
    if lower <= 0.0 {
        loop {
            let x: f64 = rng.sample(StandardNormal);
            if x >= lower {
                return x;
            }
        }
    }

    let a = 0.5 * (lower + (lower * lower + 4.0).sqrt());
    loop {
        let e: f64 = rng.sample(Exp1);
        let x = lower + e / a;
        let diff = x - a;
        let u: f64 = rng.gen();
        if u <= (-0.5 * diff * diff).exp() {
            return x;
        }
    }
}

/// Draws from `N(mean, sd^2)` conditioned on exceeding `lower`.
pub fn truncated_normal_above<R: Rng + ?Sized>(mean: f64, sd: f64, lower: f64, rng: &mut R) -> f64 {
    mean + sd * standard_normal_above((lower - mean) / sd, rng)
}

/// Draws from `N(mean, sd^2)` conditioned on falling below `upper`.
pub fn truncated_normal_below<R: Rng + ?Sized>(mean: f64, sd: f64, upper: f64, rng: &mut R) -> f64 {
    -truncated_normal_above(-mean, sd, -upper, rng)
}
