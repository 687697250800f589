//! Candidate split thresholds for each covariate.
//!
//! Trees never store raw threshold values. A split rule is the pair
//! `(covariate, index)` where `index` points into the covariate's sorted
//! threshold list held by a [`CutpointGrid`]. An observation is routed to
//! the left child when `x[covariate] < grid.value(covariate, index)`.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::DrBartError;

/// Per-covariate sorted, de-duplicated list of split thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CutpointGrid {
    cuts: Vec<Vec<f64>>,
}

impl CutpointGrid {
    /// Builds a grid from explicit thresholds, one list per covariate.
    ///
    /// Each list is sorted ascending and duplicates are dropped. Every
    /// covariate must end up with at least one finite threshold.
    pub fn new(cuts: Vec<Vec<f64>>) -> Result<Self, DrBartError> {
        let mut sorted = Vec::with_capacity(cuts.len());
        for (covariate, mut values) in cuts.into_iter().enumerate() {
            if values.iter().any(|v| !v.is_finite()) {
                return Err(DrBartError::InvalidCutpoint { covariate });
            }
            values.sort_by(f64::total_cmp);
            values.dedup();
            if values.is_empty() {
                return Err(DrBartError::EmptyCutpoints { covariate });
            }
            sorted.push(values);
        }

        Ok(Self { cuts: sorted })
    }

    /// Builds `n_cuts` equally spaced thresholds strictly inside the observed
    /// range of every column of `x`.
    ///
    /// A constant column still receives a single threshold at its value so
    /// that the grid stays non-empty; no split on it can separate data.
    pub fn uniform(x: &Array2<f64>, n_cuts: usize) -> Result<Self, DrBartError> {
        if n_cuts == 0 {
            return Err(DrBartError::InvalidSettings(
                "n_cuts must be at least one".to_string(),
            ));
        }

        let cuts = x
            .columns()
            .into_iter()
            .map(|column| {
                let (min, max) = column
                    .iter()
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                        (lo.min(v), hi.max(v))
                    });
                evenly_spaced(min, max, n_cuts)
            })
            .collect();

        Self::new(cuts)
    }

    /// Replaces the thresholds of `covariate` with `n_cuts` equally spaced
    /// points strictly inside `[lower, upper]`. Used for the latent column,
    /// whose support is fixed rather than observed.
    pub fn with_interval(
        mut self,
        covariate: usize,
        lower: f64,
        upper: f64,
        n_cuts: usize,
    ) -> Result<Self, DrBartError> {
        if covariate >= self.cuts.len() {
            return Err(DrBartError::DimensionMismatch {
                field: "cutpoint covariate",
                expected: self.cuts.len(),
                actual: covariate,
            });
        }
        if n_cuts == 0 || !(lower < upper) {
            return Err(DrBartError::InvalidSettings(format!(
                "cannot place {n_cuts} cutpoints in [{lower}, {upper}]"
            )));
        }
        self.cuts[covariate] = evenly_spaced(lower, upper, n_cuts);
        Ok(self)
    }

    /// Number of covariates covered by the grid.
    #[inline]
    pub fn n_covariates(&self) -> usize {
        self.cuts.len()
    }

    /// Number of thresholds available for `covariate`.
    #[inline]
    pub fn len(&self, covariate: usize) -> usize {
        self.cuts[covariate].len()
    }

    /// Threshold value at `index` for `covariate`.
    #[inline(always)]
    pub fn value(&self, covariate: usize, index: usize) -> f64 {
        self.cuts[covariate][index]
    }

    /// All thresholds of `covariate`.
    pub fn values(&self, covariate: usize) -> &[f64] {
        &self.cuts[covariate]
    }
}

fn evenly_spaced(min: f64, max: f64, n_cuts: usize) -> Vec<f64> {
    if !(max > min) {
        return vec![min];
    }
    let step = (max - min) / (n_cuts as f64 + 1.0);
    (1..=n_cuts).map(|i| min + step * i as f64).collect()
}
