//! Implements the tree-shape prior and the conjugate leaf models used by the
//! sampler.
//!
//! This module provides functionality for:
//! - The depth-dependent prior probability that a node splits
//! - Closed-form log marginal likelihoods of a leaf's residuals
//! - Exact posterior (and prior) draws of leaf parameters
//!
//! Three leaf models are available:
//! - Homoscedastic: normal mean leaves under a fixed noise scale
//! - Heteroscedastic: normal mean leaves with residuals weighted by the
//!   current precision fit
//! - Precision: gamma-distributed multiplicative precision leaves

use ndarray::Array2;
use rand::Rng;
use rand_distr::{Distribution, Gamma, StandardNormal};

use crate::cutpoints::CutpointGrid;
use crate::error::DrBartError;
use crate::math::ln_gamma;
use crate::stats::SufficientStats;
use crate::tree::{DecisionTree, LeafIndex};

/// Prior over tree shapes and the birth/death move mix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreePrior {
    /// Parameter contained in (0, 1) scaling the split probability.
    pub alpha: f64,
    /// Parameter contained in [0, infinity) controlling how fast the split
    /// probability decays with depth.
    pub beta: f64,
    /// Probability of proposing a birth when both moves are possible.
    pub birth_probability: f64,
}

impl TreePrior {
    /// Prior probability that a node at `depth` is split.
    #[inline]
    pub fn split_probability(&self, depth: usize) -> f64 {
        self.alpha * (1.0 + depth as f64).powf(-self.beta)
    }

    /// Prior probability that `node` grows, zero when no feature has a legal
    /// cutpoint left at the node.
    pub fn grow_probability(&self, tree: &DecisionTree, node: usize, grid: &CutpointGrid) -> f64 {
        if tree.can_split(node, grid) {
            self.split_probability(tree.node_depth(node))
        } else {
            0.0
        }
    }
}

/// Residuals for the tree currently being updated, with optional
/// per-observation weights.
#[derive(Debug, Clone, Copy)]
pub struct ResidualView<'a> {
    /// Residual of every observation.
    pub residuals: &'a [f64],
    /// Weight of every observation, all ones when `None`.
    pub weights: Option<&'a [f64]>,
}

impl<'a> ResidualView<'a> {
    /// Creates a view over `residuals` and optional `weights`.
    pub fn new(residuals: &'a [f64], weights: Option<&'a [f64]>) -> Self {
        debug_assert!(weights.map_or(true, |w| w.len() == residuals.len()));
        Self { residuals, weights }
    }

    /// Weight of observation `i`.
    #[inline(always)]
    pub fn weight(&self, i: usize) -> f64 {
        self.weights.map_or(1.0, |w| w[i])
    }
}

/// Closed-form quantities of a conjugate leaf model.
pub trait LeafPosterior {
    /// Whether residuals are weighted by the shared precision fit.
    fn uses_weights(&self) -> bool;

    /// Log marginal likelihood of the residuals in a leaf, with the leaf
    /// parameter integrated out. Terms that depend only on the set of
    /// observations (and therefore cancel in any birth/death ratio) are
    /// dropped.
    fn log_marginal(&self, stats: &SufficientStats) -> f64;

    /// Log likelihood of the residuals in a leaf given its parameter, up to
    /// the same observation-only terms.
    fn log_likelihood(&self, stats: &SufficientStats, value: f64) -> f64;

    /// Draws a leaf parameter from its conjugate posterior.
    fn sample_posterior<R: Rng + ?Sized>(
        &self,
        stats: &SufficientStats,
        rng: &mut R,
    ) -> Result<f64, DrBartError>;

    /// Draws a leaf parameter from its prior.
    fn sample_prior<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<f64, DrBartError>;
}

/// Variants indicate the leaf model of an ensemble.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LeafModel {
    /// Mean leaves under a fixed noise scale.
    Homoscedastic(HomoscedasticNormal),
    /// Mean leaves with precision-weighted residuals.
    Heteroscedastic(HeteroscedasticNormal),
    /// Multiplicative precision leaves.
    Precision(GammaPrecision),
}

impl LeafPosterior for LeafModel {
    fn uses_weights(&self) -> bool {
        match self {
            LeafModel::Homoscedastic(m) => m.uses_weights(),
            LeafModel::Heteroscedastic(m) => m.uses_weights(),
            LeafModel::Precision(m) => m.uses_weights(),
        }
    }

    fn log_marginal(&self, stats: &SufficientStats) -> f64 {
        match self {
            LeafModel::Homoscedastic(m) => m.log_marginal(stats),
            LeafModel::Heteroscedastic(m) => m.log_marginal(stats),
            LeafModel::Precision(m) => m.log_marginal(stats),
        }
    }

    fn log_likelihood(&self, stats: &SufficientStats, value: f64) -> f64 {
        match self {
            LeafModel::Homoscedastic(m) => m.log_likelihood(stats, value),
            LeafModel::Heteroscedastic(m) => m.log_likelihood(stats, value),
            LeafModel::Precision(m) => m.log_likelihood(stats, value),
        }
    }

    fn sample_posterior<R: Rng + ?Sized>(
        &self,
        stats: &SufficientStats,
        rng: &mut R,
    ) -> Result<f64, DrBartError> {
        match self {
            LeafModel::Homoscedastic(m) => m.sample_posterior(stats, rng),
            LeafModel::Heteroscedastic(m) => m.sample_posterior(stats, rng),
            LeafModel::Precision(m) => m.sample_posterior(stats, rng),
        }
    }

    fn sample_prior<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<f64, DrBartError> {
        match self {
            LeafModel::Homoscedastic(m) => m.sample_prior(rng),
            LeafModel::Heteroscedastic(m) => m.sample_prior(rng),
            LeafModel::Precision(m) => m.sample_prior(rng),
        }
    }
}

/// Normal leaf `mu ~ N(0, tau^2)` with residuals `r ~ N(mu, sigma^2)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HomoscedasticNormal {
    /// Fixed noise standard deviation.
    pub sigma: f64,
    /// Prior standard deviation of a leaf.
    pub tau: f64,
}

impl LeafPosterior for HomoscedasticNormal {
    fn uses_weights(&self) -> bool {
        false
    }

    fn log_marginal(&self, stats: &SufficientStats) -> f64 {
        if stats.is_empty() {
            return 0.0;
        }
        let n = stats.n as f64;
        let ybar = stats.sy / n;
        let within = stats.sy2 - n * ybar * ybar;
        let sig2 = self.sigma * self.sigma;
        let d = n * self.tau * self.tau + sig2;

        -(n - 1.0) * self.sigma.ln() - 0.5 * d.ln() - 0.5 * (within / sig2 + n * ybar * ybar / d)
    }

    fn log_likelihood(&self, stats: &SufficientStats, value: f64) -> f64 {
        let sig2 = self.sigma * self.sigma;
        let n = stats.n as f64;
        -0.5 * (stats.sy2 - 2.0 * value * stats.sy + n * value * value) / sig2
    }

    fn sample_posterior<R: Rng + ?Sized>(
        &self,
        stats: &SufficientStats,
        rng: &mut R,
    ) -> Result<f64, DrBartError> {
        let sig2 = self.sigma * self.sigma;
        let precision = stats.n as f64 / sig2 + 1.0 / (self.tau * self.tau);
        let mean = (stats.sy / sig2) / precision;
        let z: f64 = rng.sample(StandardNormal);
        Ok(mean + z / precision.sqrt())
    }

    fn sample_prior<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<f64, DrBartError> {
        let z: f64 = rng.sample(StandardNormal);
        Ok(self.tau * z)
    }
}

/// Normal leaf `mu ~ N(0, tau^2)` with residuals `r_i ~ N(mu, 1 / phi_i)`,
/// where `phi_i` is observation `i`'s current precision fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeteroscedasticNormal {
    /// Prior standard deviation of a leaf.
    pub tau: f64,
}

impl LeafPosterior for HeteroscedasticNormal {
    fn uses_weights(&self) -> bool {
        true
    }

    fn log_marginal(&self, stats: &SufficientStats) -> f64 {
        let d = 1.0 / (self.tau * self.tau) + stats.w;
        -self.tau.ln() - 0.5 * d.ln() + 0.5 * stats.sy * stats.sy / d - 0.5 * stats.sy2
    }

    fn log_likelihood(&self, stats: &SufficientStats, value: f64) -> f64 {
        -0.5 * (stats.sy2 - 2.0 * value * stats.sy + stats.w * value * value)
    }

    fn sample_posterior<R: Rng + ?Sized>(
        &self,
        stats: &SufficientStats,
        rng: &mut R,
    ) -> Result<f64, DrBartError> {
        let precision = stats.w + 1.0 / (self.tau * self.tau);
        let mean = stats.sy / precision;
        let z: f64 = rng.sample(StandardNormal);
        Ok(mean + z / precision.sqrt())
    }

    fn sample_prior<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<f64, DrBartError> {
        let z: f64 = rng.sample(StandardNormal);
        Ok(self.tau * z)
    }
}

/// Gamma leaf `phi ~ Gamma(shape, rate)` with scaled residuals
/// `r_i ~ N(0, 1 / phi)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GammaPrecision {
    /// Prior shape.
    pub shape: f64,
    /// Prior rate.
    pub rate: f64,
}

impl LeafPosterior for GammaPrecision {
    fn uses_weights(&self) -> bool {
        false
    }

    fn log_marginal(&self, stats: &SufficientStats) -> f64 {
        let half_n = 0.5 * stats.n as f64;
        self.shape * self.rate.ln() - ln_gamma(self.shape) + ln_gamma(self.shape + half_n)
            - (self.shape + half_n) * (self.rate + 0.5 * stats.sy2).ln()
    }

    fn log_likelihood(&self, stats: &SufficientStats, value: f64) -> f64 {
        0.5 * stats.n as f64 * value.ln() - 0.5 * value * stats.sy2
    }

    fn sample_posterior<R: Rng + ?Sized>(
        &self,
        stats: &SufficientStats,
        rng: &mut R,
    ) -> Result<f64, DrBartError> {
        let shape = self.shape + 0.5 * stats.n as f64;
        let rate = self.rate + 0.5 * stats.sy2;
        Ok(Gamma::new(shape, 1.0 / rate)?.sample(rng))
    }

    fn sample_prior<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<f64, DrBartError> {
        Ok(Gamma::new(self.shape, 1.0 / self.rate)?.sample(rng))
    }
}

/// Sufficient statistics of every leaf of `tree`, aligned with `index`.
pub fn leaf_statistics(
    tree: &DecisionTree,
    index: &LeafIndex,
    x: &Array2<f64>,
    grid: &CutpointGrid,
    view: &ResidualView,
) -> Vec<SufficientStats> {
    let mut stats = vec![SufficientStats::default(); index.len()];
    for (i, row) in x.rows().into_iter().enumerate() {
        let leaf = tree.route_to_leaf(row, grid);
        stats[index.position(leaf)].insert(view.residuals[i], view.weight(i));
    }
    stats
}

/// Replaces every leaf value of `tree` with a draw from its conjugate
/// posterior given the current residuals.
pub fn sample_leaf_values<R: Rng + ?Sized>(
    tree: &mut DecisionTree,
    x: &Array2<f64>,
    grid: &CutpointGrid,
    view: &ResidualView,
    model: &LeafModel,
    rng: &mut R,
) -> Result<(), DrBartError> {
    let index = tree.leaf_index();
    let stats = leaf_statistics(tree, &index, x, grid, view);

    for (leaf_stats, &leaf) in stats.iter().zip(&index.leaves) {
        tree.value[leaf] = model.sample_posterior(leaf_stats, rng)?;
    }

    Ok(())
}
