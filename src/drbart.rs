//! Settings and state of the density-regression sampler.
//!
//! A `DrBartState` owns the mean and precision ensembles, the working
//! response and the MCMC bookkeeping. Each call to [`DrBartState::step`]
//! runs one full iteration:
//!
//! 1. backfit the mean ensemble against `y`,
//! 2. backfit the precision ensemble against the scaled mean residuals,
//! 3. re-impute truncated responses,
//! 4. sweep the latent covariate over every observation.
//!
//! [`DrBartState::run`] repeats this for `burn + draws * thin` iterations and
//! hands every retained draw to a [`SnapshotSink`].

use std::str::FromStr;

use ndarray::{Array1, ArrayView1, Zip};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backfit::{backfit_mean, backfit_precision, Ensemble, MoveTally};
use crate::data::ExternalData;
use crate::error::DrBartError;
use crate::latent::{
    impute_truncated, latent_boundaries, update_latent, LatentSettings, LatentUpdate,
    LATENT_COLUMN,
};
use crate::math::LN_SQRT_2PI;
use crate::ops::{GammaPrecision, HeteroscedasticNormal, HomoscedasticNormal, LeafModel, TreePrior};
use crate::proposal::ProposalKind;
use crate::slice::{SliceSampler, SliceSearch};
use crate::snapshot::{Draw, SnapshotSink};
use crate::tree::DecisionTree;

/// Variants indicate how the mean ensemble models the noise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeanModel {
    /// One noise scale shared by every observation.
    Homoscedastic,
    /// Residuals weighted by the current precision fit.
    #[default]
    Heteroscedastic,
}

impl FromStr for MeanModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "homoscedastic" => Ok(MeanModel::Homoscedastic),
            "heteroscedastic" => Ok(MeanModel::Heteroscedastic),
            _ => Err(format!("Unknown mean model: {}", s)),
        }
    }
}

/// DrBartSettings are the parameters used to initialize a new DrBartState.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrBartSettings {
    /// Trees in the mean ensemble.
    pub n_trees: usize,
    /// Trees in the precision ensemble.
    pub n_precision_trees: usize,
    /// Split probability scale, in (0, 1).
    pub alpha: f64,
    /// Split probability depth decay, at least 0.
    pub beta: f64,
    /// Probability of a birth when both moves are possible.
    pub birth_probability: f64,
    /// Shrinkage of the mean leaf prior.
    pub k: f64,
    /// Concentration of the precision leaf prior.
    pub nu: f64,
    /// Scalar precision scale applied to every observation.
    pub phi0: f64,
    /// Noise scale of the homoscedastic mean model. Defaults to the sample
    /// standard deviation of `y`.
    pub sigma: Option<f64>,
    /// Whether precision trees also split on the latent covariate.
    pub scale_mixture: bool,
    /// Iterations discarded before the first draw.
    pub burn: usize,
    /// Draws to retain.
    pub draws: usize,
    /// Iterations between retained draws.
    pub thin: usize,
    /// Iterations between progress messages, 0 to disable them.
    pub print_every: usize,
    /// Smallest number of observations a birth may leave in a child.
    pub min_leaf_size: usize,
    /// Smallest leaf occupancy a latent move may leave behind.
    pub min_latent_occupancy: usize,
    /// Ceiling on the precision fit after a latent move.
    pub max_precision: f64,
    /// Support of the latent covariate.
    pub latent_bounds: (f64, f64),
    /// Initial slice interval width.
    pub slice_width: f64,
    /// Slice interval search.
    pub slice_search: SliceSearch,
    /// Largest number of doublings of the slice interval.
    pub max_doublings: usize,
    /// Noise model of the mean ensemble.
    pub mean_model: MeanModel,
    /// Proposal kind for the mean ensemble.
    pub proposal: ProposalKind,
    /// Proposal kind for the precision ensemble.
    pub precision_proposal: ProposalKind,
}

impl Default for DrBartSettings {
    fn default() -> Self {
        Self {
            n_trees: 200,
            n_precision_trees: 40,
            alpha: 0.95,
            beta: 2.0,
            birth_probability: 0.5,
            k: 2.0,
            nu: 1.0,
            phi0: 1.0,
            sigma: None,
            scale_mixture: false,
            burn: 1000,
            draws: 1000,
            thin: 1,
            print_every: 100,
            min_leaf_size: 5,
            min_latent_occupancy: 5,
            max_precision: 1e10,
            latent_bounds: (0.0, 1.0),
            slice_width: 1.0,
            slice_search: SliceSearch::SteppingOut,
            max_doublings: 10,
            mean_model: MeanModel::Heteroscedastic,
            proposal: ProposalKind::BirthDeath,
            precision_proposal: ProposalKind::BirthDeath,
        }
    }
}

impl DrBartSettings {
    /// Reads settings from JSON. Missing fields take their default value.
    pub fn from_json(json: &str) -> Result<Self, DrBartError> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks every setting against its valid range.
    pub fn validate(&self) -> Result<(), DrBartError> {
        let invalid = |msg: &str| Err(DrBartError::InvalidSettings(msg.to_string()));

        if self.n_trees == 0 || self.n_precision_trees == 0 {
            return invalid("both ensembles need at least one tree");
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return invalid("alpha must lie in (0, 1)");
        }
        if !(self.beta >= 0.0 && self.beta.is_finite()) {
            return invalid("beta must be non-negative");
        }
        if !(self.birth_probability > 0.0 && self.birth_probability < 1.0) {
            return invalid("birth_probability must lie in (0, 1)");
        }
        if !(self.k > 0.0 && self.k.is_finite()) {
            return invalid("k must be positive");
        }
        if !(self.nu > 0.0 && self.nu.is_finite()) {
            return invalid("nu must be positive");
        }
        if !(self.phi0 > 0.0 && self.phi0.is_finite()) {
            return invalid("phi0 must be positive");
        }
        if let Some(sigma) = self.sigma {
            if !(sigma > 0.0 && sigma.is_finite()) {
                return invalid("sigma must be positive");
            }
        }
        if self.thin == 0 {
            return invalid("thin must be at least one");
        }
        if self.min_leaf_size == 0 {
            return invalid("min_leaf_size must be at least one");
        }
        if !(self.max_precision > 0.0) {
            return invalid("max_precision must be positive");
        }
        let (lower, upper) = self.latent_bounds;
        if !(lower.is_finite() && upper.is_finite() && lower < upper) {
            return invalid("latent_bounds must be a finite interval");
        }
        if !(self.slice_width > 0.0 && self.slice_width.is_finite()) {
            return invalid("slice_width must be positive");
        }

        Ok(())
    }

    /// Total number of iterations of a run.
    pub fn total_iterations(&self) -> usize {
        self.burn + self.draws * self.thin
    }

    /// Checks whether the draw at `iteration` is retained.
    pub fn is_retained(&self, iteration: usize) -> bool {
        iteration >= self.burn && (iteration - self.burn) % self.thin == 0
    }
}

/// What one iteration did.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IterationSummary {
    /// Birth/death activity of the mean ensemble.
    pub mean_moves: MoveTally,
    /// Birth/death activity of the precision ensemble.
    pub precision_moves: MoveTally,
    /// Outcome of the latent sweep.
    pub latent: LatentUpdate,
    /// Unnormalized Gaussian log-likelihood after the iteration.
    pub log_likelihood: f64,
}

/// DrBartState is the main entry point of the density-regression sampler.
#[derive(Debug, Clone)]
pub struct DrBartState {
    /// Settings the state was created with.
    pub params: DrBartSettings,
    mean: Ensemble,
    precision: Ensemble,
    y: Array1<f64>,
    y_observed: Array1<f64>,
    truncated: Vec<bool>,
    latent: LatentSettings,
    iteration: usize,
    last: IterationSummary,
}

impl DrBartState {
    /// Creates a `DrBartState` with the given `DrBartSettings` and
    /// `ExternalData`.
    ///
    /// Mean trees start as single leaves holding `ȳ / m`, so the mean fit
    /// starts at `ȳ`. Precision trees start at one, so the precision fit
    /// starts at `phi0 × offset`.
    pub fn new(params: DrBartSettings, data: ExternalData) -> Result<Self, DrBartError> {
        params.validate()?;

        let (lower, upper) = params.latent_bounds;
        let outside = |column: ArrayView1<f64>| column.iter().any(|&u| !(u >= lower && u <= upper));
        if outside(data.X.column(LATENT_COLUMN))
            || (params.scale_mixture && outside(data.X_precision.column(LATENT_COLUMN)))
        {
            return Err(DrBartError::InvalidSettings(format!(
                "initial latent values must lie in [{lower}, {upper}]"
            )));
        }

        let y = data.y;
        let n = y.len() as f64;
        let ybar = y.sum() / n;
        let (min_y, max_y) = y
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });

        let m = params.n_trees as f64;
        let tau = (max_y - min_y) / (2.0 * params.k * m.sqrt());
        if !(tau > 0.0) {
            return Err(DrBartError::InvalidSettings(
                "the response must not be constant".to_string(),
            ));
        }

        let mean_model = match params.mean_model {
            MeanModel::Homoscedastic => {
                let sigma = match params.sigma {
                    Some(sigma) => sigma,
                    None => sample_sd(&y, ybar),
                };
                if !(sigma > 0.0 && sigma.is_finite()) {
                    return Err(DrBartError::InvalidSettings(
                        "cannot estimate sigma from the response; set it explicitly".to_string(),
                    ));
                }
                LeafModel::Homoscedastic(HomoscedasticNormal { sigma, tau })
            }
            MeanModel::Heteroscedastic => LeafModel::Heteroscedastic(HeteroscedasticNormal { tau }),
        };

        let concentration = params.nu * params.n_precision_trees as f64;
        let precision_model = LeafModel::Precision(GammaPrecision {
            shape: concentration,
            rate: concentration,
        });

        let prior = TreePrior {
            alpha: params.alpha,
            beta: params.beta,
            birth_probability: params.birth_probability,
        };

        let mean = Ensemble::additive(params.n_trees, ybar / m, data.X, data.grid, mean_model, prior)
            .with_proposal(params.proposal, params.min_leaf_size);
        let precision = Ensemble::multiplicative(
            params.n_precision_trees,
            data.offset * params.phi0,
            data.X_precision,
            data.precision_grid,
            precision_model,
            prior,
        )
        .with_proposal(params.precision_proposal, params.min_leaf_size);

        let latent = LatentSettings {
            min_occupancy: params.min_latent_occupancy,
            max_precision: params.max_precision,
            scale_mixture: params.scale_mixture,
            slice: SliceSampler {
                width: params.slice_width,
                lower,
                upper,
                search: params.slice_search,
                max_doublings: params.max_doublings,
            },
        };

        info!(
            n = y.len(),
            mean_trees = params.n_trees,
            precision_trees = params.n_precision_trees,
            scale_mixture = params.scale_mixture,
            "initialized sampler"
        );

        Ok(Self {
            params,
            mean,
            precision,
            y_observed: y.clone(),
            y,
            truncated: data.truncated,
            latent,
            iteration: 0,
            last: IterationSummary::default(),
        })
    }

    /// Runs one full iteration: mean backfit, precision backfit, truncated
    /// response imputation and the latent sweep.
    pub fn step<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<IterationSummary, DrBartError> {
        let mean_moves = backfit_mean(&mut self.mean, &self.y, &self.precision.fit, rng)?;
        let precision_moves =
            backfit_precision(&mut self.precision, &self.y, &self.mean.fit, rng)?;
        debug!(
            births = mean_moves.births,
            birth_accepts = mean_moves.birth_accepts,
            deaths = mean_moves.deaths,
            death_accepts = mean_moves.death_accepts,
            "mean ensemble moves"
        );
        debug!(
            births = precision_moves.births,
            birth_accepts = precision_moves.birth_accepts,
            deaths = precision_moves.deaths,
            death_accepts = precision_moves.death_accepts,
            "precision ensemble moves"
        );

        impute_truncated(
            &mut self.y,
            &self.y_observed,
            &self.truncated,
            &self.mean.fit,
            &self.precision.fit,
            rng,
        );

        let latent = update_latent(&mut self.mean, &mut self.precision, &self.y, &self.latent, rng);
        debug!(
            mean_trees = latent.mean_trees,
            precision_trees = latent.precision_trees,
            resampled = latent.resampled,
            skipped = latent.skipped,
            "latent sweep"
        );

        let log_likelihood = self.log_likelihood();
        debug!(log_likelihood, "unnormalized log-likelihood");

        self.iteration += 1;
        self.last = IterationSummary {
            mean_moves,
            precision_moves,
            latent,
            log_likelihood,
        };

        Ok(self.last)
    }

    /// Runs the chain until `burn + draws * thin` iterations have completed,
    /// recording every retained draw in `sink`.
    ///
    /// A fatal numeric error stops the run; draws recorded before it stay in
    /// the sink.
    pub fn run<R, S>(&mut self, rng: &mut R, sink: &mut S) -> Result<(), DrBartError>
    where
        R: Rng + ?Sized,
        S: SnapshotSink + ?Sized,
    {
        let total = self.params.total_iterations();
        while self.iteration < total {
            let i = self.iteration;
            if self.params.print_every > 0 && i % self.params.print_every == 0 {
                info!(
                    iteration = i,
                    total,
                    percent = 100 * i / total,
                    "sampling"
                );
            }

            self.step(rng)?;

            if self.params.is_retained(i) {
                sink.record(self.draw());
            }
        }

        Ok(())
    }

    /// Snapshot of the current state, labelled with the last completed
    /// iteration.
    pub fn draw(&self) -> Draw {
        Draw {
            iteration: self.iteration.saturating_sub(1),
            precision_scale: self.params.phi0,
            latent_boundaries: latent_boundaries(
                &self.mean,
                &self.precision,
                self.params.scale_mixture,
            ),
            latent: self.latent().to_vec(),
            mean_trees: self.mean.trees.iter().map(DecisionTree::to_snapshot).collect(),
            precision_trees: self
                .precision
                .trees
                .iter()
                .map(DecisionTree::to_snapshot)
                .collect(),
            mean_moves: self.last.mean_moves,
            precision_moves: self.last.precision_moves,
        }
    }

    /// Gaussian log-likelihood of the working response given both fits,
    /// without the `ln(2π)` normalization folded into a constant.
    pub fn log_likelihood(&self) -> f64 {
        let mut total = 0.0;
        Zip::from(&self.y)
            .and(&self.mean.fit)
            .and(&self.precision.fit)
            .for_each(|&y, &mu, &prec| {
                let r = (y - mu) * prec.sqrt();
                total += -LN_SQRT_2PI + 0.5 * prec.ln() - 0.5 * r * r;
            });
        total
    }

    /// Completed iterations.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Summary of the last completed iteration.
    pub fn last_summary(&self) -> &IterationSummary {
        &self.last
    }

    /// Running fit of the mean ensemble.
    pub fn mean_fit(&self) -> &Array1<f64> {
        &self.mean.fit
    }

    /// Running fit of the precision ensemble.
    pub fn precision_fit(&self) -> &Array1<f64> {
        &self.precision.fit
    }

    /// Current latent covariate of every observation.
    pub fn latent(&self) -> ArrayView1<f64> {
        self.mean.x.column(LATENT_COLUMN)
    }

    /// Working response, with truncated entries imputed.
    pub fn response(&self) -> &Array1<f64> {
        &self.y
    }

    /// The mean ensemble.
    pub fn mean_ensemble(&self) -> &Ensemble {
        &self.mean
    }

    /// The precision ensemble.
    pub fn precision_ensemble(&self) -> &Ensemble {
        &self.precision
    }
}

fn sample_sd(y: &Array1<f64>, ybar: f64) -> f64 {
    let n = y.len() as f64;
    let ss: f64 = y.iter().map(|v| (v - ybar) * (v - ybar)).sum();
    (ss / (n - 1.0)).sqrt()
}
