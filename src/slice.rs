//! Univariate slice sampling on a bounded interval.

use std::str::FromStr;

use rand::Rng;
use rand_distr::Exp1;
use serde::{Deserialize, Serialize};

/// A log density known up to an additive constant.
pub trait LogDensity {
    /// Log density at `x`.
    fn ln_density(&mut self, x: f64) -> f64;
}

impl<F: FnMut(f64) -> f64> LogDensity for F {
    fn ln_density(&mut self, x: f64) -> f64 {
        self(x)
    }
}

/// Variants indicate how the slice interval around the current point is
/// found before shrinkage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SliceSearch {
    /// Extend the interval one width at a time until both ends leave the
    /// slice or reach the bounds.
    #[default]
    SteppingOut,
    /// Double the interval on a random side, with an acceptability test
    /// during shrinkage.
    Doubling,
}

impl FromStr for SliceSearch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stepping_out" | "steppingout" | "step" => Ok(SliceSearch::SteppingOut),
            "doubling" | "double" => Ok(SliceSearch::Doubling),
            _ => Err(format!("Unknown slice search: {}", s)),
        }
    }
}

/// Slice sampler for a scalar restricted to `[lower, upper]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliceSampler {
    /// Initial interval width.
    pub width: f64,
    /// Lower bound of the support.
    pub lower: f64,
    /// Upper bound of the support.
    pub upper: f64,
    /// Interval search procedure.
    pub search: SliceSearch,
    /// Largest number of doublings.
    pub max_doublings: usize,
}

impl Default for SliceSampler {
    fn default() -> Self {
        Self {
            width: 1.0,
            lower: 0.0,
            upper: 1.0,
            search: SliceSearch::SteppingOut,
            max_doublings: 10,
        }
    }
}

impl SliceSampler {
    /// Draws the next state of a chain currently at `x0`, which must lie in
    /// `[lower, upper]`.
    pub fn sample<D, R>(&self, x0: f64, density: &mut D, rng: &mut R) -> f64
    where
        D: LogDensity + ?Sized,
        R: Rng + ?Sized,
    {
        let (lower, upper) = (self.lower, self.upper);
        let mut g = |x: f64| {
            if x < lower || x > upper {
                f64::NEG_INFINITY
            } else {
                density.ln_density(x)
            }
        };

        let e: f64 = rng.sample(Exp1);
        let log_y = g(x0) - e;

        match self.search {
            SliceSearch::SteppingOut => self.stepping_out(x0, log_y, &mut g, rng),
            SliceSearch::Doubling => self.doubling(x0, log_y, &mut g, rng),
        }
    }

    fn stepping_out<G, R>(&self, x0: f64, log_y: f64, g: &mut G, rng: &mut R) -> f64
    where
        G: FnMut(f64) -> f64,
        R: Rng + ?Sized,
    {
        let w = self.width;
        let mut left = x0 - w * rng.gen::<f64>();
        let mut right = left + w;

        while left > self.lower && g(left) > log_y {
            left -= w;
        }
        while right < self.upper && g(right) > log_y {
            right += w;
        }

        let (left, right) = (left.max(self.lower), right.min(self.upper));
        shrink(x0, log_y, left, right, g, rng, &mut |_: &mut G, _| true)
    }

    fn doubling<G, R>(&self, x0: f64, log_y: f64, g: &mut G, rng: &mut R) -> f64
    where
        G: FnMut(f64) -> f64,
        R: Rng + ?Sized,
    {
        let w = self.width;
        let mut left = x0 - w * rng.gen::<f64>();
        let mut right = left + w;
        let mut g_left = g(left);
        let mut g_right = g(right);

        let mut k = self.max_doublings;
        while k > 0 && (log_y < g_left || log_y < g_right) {
            if rng.gen::<bool>() {
                left -= right - left;
                g_left = g(left);
            } else {
                right += right - left;
                g_right = g(right);
            }
            k -= 1;
        }

        let (l0, r0) = (left, right);
        let mut test = |g: &mut G, x1: f64| acceptable(x0, x1, log_y, l0, r0, w, g);
        shrink(x0, log_y, left, right, g, rng, &mut test)
    }
}

/// Shrinks `[left, right]` towards `x0` until a point in the slice passes
/// `accept`.
fn shrink<G, R, A>(
    x0: f64,
    log_y: f64,
    mut left: f64,
    mut right: f64,
    g: &mut G,
    rng: &mut R,
    accept: &mut A,
) -> f64
where
    G: FnMut(f64) -> f64,
    R: Rng + ?Sized,
    A: FnMut(&mut G, f64) -> bool,
{
    loop {
        let x1 = left + rng.gen::<f64>() * (right - left);
        if g(x1) >= log_y && accept(&mut *g, x1) {
            return x1;
        }
        if x1 == x0 {
            return x0;
        }
        if x1 < x0 {
            left = x1;
        } else {
            right = x1;
        }
    }
}

/// Neal's test that `x1` could have produced the same doubled interval.
fn acceptable<G>(x0: f64, x1: f64, log_y: f64, mut left: f64, mut right: f64, w: f64, g: &mut G) -> bool
where
    G: FnMut(f64) -> f64,
{
    let mut differ = false;
    while right - left > 1.1 * w {
        let mid = 0.5 * (left + right);
        if (x0 < mid) != (x1 < mid) {
            differ = true;
        }
        if x1 < mid {
            right = mid;
        } else {
            left = mid;
        }
        if differ && log_y >= g(left) && log_y >= g(right) {
            return false;
        }
    }
    true
}
