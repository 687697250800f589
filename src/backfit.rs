//! Backfitting of tree ensembles against a running fit.
//!
//! Each ensemble owns its trees, covariates, cutpoint grid and running fit.
//! The mean ensemble combines trees additively; the precision ensemble
//! combines them multiplicatively on top of a per-observation baseline.
//! Outside of a single tree's update the running fit always equals the exact
//! combination of every tree's leaf values.

use ndarray::{Array1, Array2, Zip};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::cutpoints::CutpointGrid;
use crate::error::DrBartError;
use crate::ops::{sample_leaf_values, LeafModel, LeafPosterior, ResidualView, TreePrior};
use crate::proposal::{propose, Move, ProposalContext, ProposalKind, ProposalOutcome};
use crate::tree::DecisionTree;

/// Birth/death activity of one pass over an ensemble.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveTally {
    /// Attempted births.
    pub births: usize,
    /// Attempted deaths.
    pub deaths: usize,
    /// Accepted births.
    pub birth_accepts: usize,
    /// Accepted deaths.
    pub death_accepts: usize,
}

impl MoveTally {
    /// Counts one proposal.
    pub fn record(&mut self, outcome: ProposalOutcome) {
        match outcome.kind {
            Move::Birth => {
                self.births += 1;
                self.birth_accepts += usize::from(outcome.accepted);
            }
            Move::Death => {
                self.deaths += 1;
                self.death_accepts += usize::from(outcome.accepted);
            }
            Move::None => {}
        }
    }
}

/// How the trees of an ensemble combine into its fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combine {
    /// `fit = baseline + Σ trees`.
    Additive,
    /// `fit = baseline × Π trees`.
    Multiplicative,
}

/// A fixed-size ordered collection of trees and the state they are fit on.
#[derive(Debug, Clone)]
pub struct Ensemble {
    /// Trees in update order.
    pub trees: Vec<DecisionTree>,
    /// Covariates, one row per observation. Column 0 is the latent covariate.
    pub x: Array2<f64>,
    /// Cutpoints for the columns of `x`.
    pub grid: CutpointGrid,
    /// Running fit of the ensemble.
    pub fit: Array1<f64>,
    /// Per-observation term the trees are combined onto.
    pub baseline: Array1<f64>,
    /// Leaf model of every tree.
    pub model: LeafModel,
    /// Tree-shape prior of every tree.
    pub prior: TreePrior,
    /// How structural moves treat leaf parameters.
    pub proposal: ProposalKind,
    /// Smallest number of observations a birth may leave in a child.
    pub min_leaf_size: usize,
    combine: Combine,
    tree_fit: Array1<f64>,
    residuals: Vec<f64>,
    weights: Vec<f64>,
}

impl Ensemble {
    /// Creates an additive ensemble of `n_trees` single leaves holding
    /// `leaf_value`, on a zero baseline.
    pub fn additive(
        n_trees: usize,
        leaf_value: f64,
        x: Array2<f64>,
        grid: CutpointGrid,
        model: LeafModel,
        prior: TreePrior,
    ) -> Self {
        let baseline = Array1::zeros(x.nrows());
        Self::build(
            Combine::Additive,
            n_trees,
            leaf_value,
            baseline,
            x,
            grid,
            model,
            prior,
        )
    }

    /// Creates a multiplicative ensemble of `n_trees` single leaves holding
    /// one, on top of `baseline`.
    pub fn multiplicative(
        n_trees: usize,
        baseline: Array1<f64>,
        x: Array2<f64>,
        grid: CutpointGrid,
        model: LeafModel,
        prior: TreePrior,
    ) -> Self {
        Self::build(
            Combine::Multiplicative,
            n_trees,
            1.0,
            baseline,
            x,
            grid,
            model,
            prior,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        combine: Combine,
        n_trees: usize,
        leaf_value: f64,
        baseline: Array1<f64>,
        x: Array2<f64>,
        grid: CutpointGrid,
        model: LeafModel,
        prior: TreePrior,
    ) -> Self {
        let n = x.nrows();
        let mut ensemble = Self {
            trees: (0..n_trees).map(|_| DecisionTree::new(leaf_value)).collect(),
            x,
            grid,
            fit: Array1::zeros(n),
            baseline,
            model,
            prior,
            proposal: ProposalKind::default(),
            min_leaf_size: 5,
            combine,
            tree_fit: Array1::zeros(n),
            residuals: vec![0.0; n],
            weights: Vec::new(),
        };
        ensemble.fit = ensemble.recompute_fit();
        ensemble
    }

    /// Sets the proposal kind and the smallest child a birth may leave.
    pub fn with_proposal(mut self, proposal: ProposalKind, min_leaf_size: usize) -> Self {
        self.proposal = proposal;
        self.min_leaf_size = min_leaf_size.max(1);
        self
    }

    /// How the trees combine.
    pub fn combine(&self) -> Combine {
        self.combine
    }

    /// Number of observations.
    pub fn n_observations(&self) -> usize {
        self.x.nrows()
    }

    /// Fit of the ensemble computed directly from every tree.
    pub fn recompute_fit(&self) -> Array1<f64> {
        let mut fit = self.baseline.clone();
        for tree in &self.trees {
            let values = tree.fit(&self.x, &self.grid);
            match self.combine {
                Combine::Additive => fit += &values,
                Combine::Multiplicative => fit *= &values,
            }
        }
        fit
    }

    /// Indices of the trees with at least one split on `covariate`.
    pub fn trees_using(&self, covariate: usize) -> Vec<usize> {
        self.trees
            .iter()
            .enumerate()
            .filter(|(_, tree)| tree.uses_covariate(covariate))
            .map(|(t, _)| t)
            .collect()
    }
}

/// Runs one backfitting pass over the additive mean ensemble.
///
/// For each tree: remove its fit, form residuals `y - fit`, propose a birth
/// or death, redraw every leaf, add the new fit back. Heteroscedastic leaf
/// models weight each residual by `precision_fit`.
pub fn backfit_mean<R: Rng + ?Sized>(
    ensemble: &mut Ensemble,
    y: &Array1<f64>,
    precision_fit: &Array1<f64>,
    rng: &mut R,
) -> Result<MoveTally, DrBartError> {
    let mut tally = MoveTally::default();

    let weighted = ensemble.model.uses_weights();
    if weighted {
        ensemble.weights.clear();
        ensemble.weights.extend(precision_fit.iter().copied());
    }

    for t in 0..ensemble.trees.len() {
        ensemble.trees[t].fit_into(&ensemble.x, &ensemble.grid, &mut ensemble.tree_fit);
        ensemble.fit -= &ensemble.tree_fit;

        for ((r, &yi), &fi) in ensemble
            .residuals
            .iter_mut()
            .zip(y.iter())
            .zip(ensemble.fit.iter())
        {
            *r = yi - fi;
        }

        let view = ResidualView::new(
            &ensemble.residuals,
            weighted.then_some(ensemble.weights.as_slice()),
        );
        let ctx = ProposalContext {
            x: &ensemble.x,
            grid: &ensemble.grid,
            residuals: view,
            model: &ensemble.model,
            prior: &ensemble.prior,
            min_leaf_size: ensemble.min_leaf_size,
        };

        let tree = &mut ensemble.trees[t];
        tally.record(propose(tree, ensemble.proposal, &ctx, rng)?);
        sample_leaf_values(tree, &ensemble.x, &ensemble.grid, &view, &ensemble.model, rng)?;

        tree.fit_into(&ensemble.x, &ensemble.grid, &mut ensemble.tree_fit);
        ensemble.fit += &ensemble.tree_fit;
    }

    Ok(tally)
}

/// Runs one backfitting pass over the multiplicative precision ensemble.
///
/// For each tree: divide its fit out, form scaled residuals
/// `(y - mean_fit) * sqrt(fit)`, propose a birth or death, redraw every leaf,
/// multiply the new fit back in. A non-finite tree fit, or a running fit
/// that turns non-finite after dividing or multiplying, aborts the pass with
/// [`DrBartError::NonFiniteFit`].
pub fn backfit_precision<R: Rng + ?Sized>(
    ensemble: &mut Ensemble,
    y: &Array1<f64>,
    mean_fit: &Array1<f64>,
    rng: &mut R,
) -> Result<MoveTally, DrBartError> {
    let mut tally = MoveTally::default();

    for t in 0..ensemble.trees.len() {
        ensemble.trees[t].fit_into(&ensemble.x, &ensemble.grid, &mut ensemble.tree_fit);
        check_precision_fit(t, &ensemble.tree_fit)?;
        ensemble.fit /= &ensemble.tree_fit;
        check_running_fit(t, &ensemble.fit)?;

        Zip::from(&mut ensemble.residuals[..])
            .and(y)
            .and(mean_fit)
            .and(&ensemble.fit)
            .for_each(|r, &yi, &mi, &fi| *r = (yi - mi) * fi.sqrt());

        let view = ResidualView::new(&ensemble.residuals, None);
        let ctx = ProposalContext {
            x: &ensemble.x,
            grid: &ensemble.grid,
            residuals: view,
            model: &ensemble.model,
            prior: &ensemble.prior,
            min_leaf_size: ensemble.min_leaf_size,
        };

        let tree = &mut ensemble.trees[t];
        tally.record(propose(tree, ensemble.proposal, &ctx, rng)?);
        sample_leaf_values(tree, &ensemble.x, &ensemble.grid, &view, &ensemble.model, rng)?;

        tree.fit_into(&ensemble.x, &ensemble.grid, &mut ensemble.tree_fit);
        check_precision_fit(t, &ensemble.tree_fit)?;
        ensemble.fit *= &ensemble.tree_fit;
        check_running_fit(t, &ensemble.fit)?;

        let non_positive = tree
            .leaves()
            .into_iter()
            .filter(|&leaf| tree.value[leaf] <= 0.0)
            .count();
        if non_positive > 0 {
            warn!(tree = t, leaves = non_positive, "non-positive precision leaf values");
        }
    }

    Ok(tally)
}

fn check_precision_fit(tree: usize, values: &Array1<f64>) -> Result<(), DrBartError> {
    if let Some(observation) = values.iter().position(|v| !v.is_finite()) {
        error!(tree, observation, "non-finite precision tree fit");
        return Err(DrBartError::NonFiniteFit { tree, observation });
    }
    if values.iter().any(|&v| v <= 0.0) {
        warn!(tree, "non-positive precision tree fit");
    }
    Ok(())
}

fn check_running_fit(tree: usize, fit: &Array1<f64>) -> Result<(), DrBartError> {
    if let Some(observation) = fit.iter().position(|v| !v.is_finite()) {
        error!(tree, observation, "non-finite running precision fit");
        return Err(DrBartError::NonFiniteFit { tree, observation });
    }
    Ok(())
}
