//! Sufficient statistics for the residuals routed to a tree node.

use std::ops::Add;

/// Weighted sufficient statistics of a set of residuals.
///
/// `n` counts observations while `w` sums their weights. For unweighted
/// models every weight is one and `w == n as f64`; the heteroscedastic mean
/// model weights each residual by the observation's current precision.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SufficientStats {
    /// Number of observations.
    pub n: usize,
    /// Sum of weights.
    pub w: f64,
    /// Weighted sum of residuals.
    pub sy: f64,
    /// Weighted sum of squared residuals.
    pub sy2: f64,
}

impl SufficientStats {
    /// Accumulates statistics from residuals and optional weights.
    pub fn from_residuals(residuals: &[f64], weights: Option<&[f64]>) -> Self {
        let mut stats = Self::default();
        match weights {
            Some(weights) => residuals
                .iter()
                .zip(weights)
                .for_each(|(&r, &w)| stats.insert(r, w)),
            None => residuals.iter().for_each(|&r| stats.insert(r, 1.0)),
        }
        stats
    }

    /// Adds one observation.
    #[inline]
    pub fn insert(&mut self, residual: f64, weight: f64) {
        self.n += 1;
        self.w += weight;
        self.sy += weight * residual;
        self.sy2 += weight * residual * residual;
    }

    /// Removes one observation previously added with the same arguments.
    #[inline]
    pub fn remove(&mut self, residual: f64, weight: f64) {
        debug_assert!(self.n > 0, "removing from empty statistics");
        self.n -= 1;
        self.w -= weight;
        self.sy -= weight * residual;
        self.sy2 -= weight * residual * residual;
    }

    /// Checks whether no observation has been accumulated.
    pub fn is_empty(&self) -> bool {
        self.n == 0
    }
}

impl Add for SufficientStats {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            n: self.n + other.n,
            w: self.w + other.w,
            sy: self.sy + other.sy,
            sy2: self.sy2 + other.sy2,
        }
    }
}
