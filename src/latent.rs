//! Resampling of the latent covariate.
//!
//! The latent covariate lives in column 0 of the mean covariates (and of
//! the precision covariates in scale-mixture mode). Only trees that split on
//! it see a change when an observation's latent value moves, so the update
//! works against those trees alone and keeps the rest of the fit fixed.
//!
//! An observation is only moved when, with it taken out, every leaf of every
//! tree that splits on the latent covariate still holds at least
//! `min_occupancy` observations. Observations that fail the check keep their
//! value for this sweep.

use ndarray::{Array1, ArrayView1};
use rand::Rng;

use crate::backfit::Ensemble;
use crate::math::{ln_normal_pdf, truncated_normal_above};
use crate::slice::SliceSampler;
use crate::tree::{DecisionTree, LeafIndex};

/// Column holding the latent covariate.
pub const LATENT_COLUMN: usize = 0;

/// Observation count of every leaf of one tree.
#[derive(Debug, Clone)]
pub struct LeafOccupancy {
    index: LeafIndex,
    counts: Vec<usize>,
}

impl LeafOccupancy {
    /// Counts the rows of the ensemble's covariates in each leaf of tree `t`.
    pub fn new(ensemble: &Ensemble, t: usize) -> Self {
        let tree = &ensemble.trees[t];
        Self {
            index: tree.leaf_index(),
            counts: tree.leaf_counts(&ensemble.x, &ensemble.grid),
        }
    }

    /// Observations currently in `leaf`.
    #[inline]
    pub fn count(&self, leaf: usize) -> usize {
        self.counts[self.index.position(leaf)]
    }

    /// Checks that, with one observation taken out of `leaf`, no leaf of the
    /// tree holds fewer than `floor` observations.
    pub fn can_remove(&self, leaf: usize, floor: usize) -> bool {
        let target = self.index.position(leaf);
        self.counts.iter().enumerate().all(|(pos, &count)| {
            let count = if pos == target { count.saturating_sub(1) } else { count };
            count >= floor
        })
    }

    /// Takes one observation out of `leaf`.
    pub fn remove(&mut self, leaf: usize) {
        let pos = self.index.position(leaf);
        self.counts[pos] -= 1;
    }

    /// Puts one observation into `leaf`.
    pub fn insert(&mut self, leaf: usize) {
        let pos = self.index.position(leaf);
        self.counts[pos] += 1;
    }

    /// Counts aligned with the tree's leaves in pre-order.
    pub fn counts(&self) -> &[usize] {
        &self.counts
    }
}

/// Settings of one latent sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatentSettings {
    /// Smallest leaf occupancy a move may leave behind.
    pub min_occupancy: usize,
    /// Ceiling on the precision fit after a move.
    pub max_precision: f64,
    /// Whether precision trees also see the latent covariate.
    pub scale_mixture: bool,
    /// Slice sampler over the latent interval.
    pub slice: SliceSampler,
}

/// What one latent sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatentUpdate {
    /// Observations whose latent value was resampled.
    pub resampled: usize,
    /// Observations skipped by the occupancy check.
    pub skipped: usize,
    /// Mean trees splitting on the latent covariate.
    pub mean_trees: usize,
    /// Precision trees splitting on the latent covariate, zero outside
    /// scale-mixture mode.
    pub precision_trees: usize,
}

/// Trees of one ensemble that split on the latent covariate, with their
/// occupancy tables.
struct LatentTrees {
    trees: Vec<usize>,
    occupancy: Vec<LeafOccupancy>,
}

impl LatentTrees {
    fn new(ensemble: &Ensemble) -> Self {
        let trees = ensemble.trees_using(LATENT_COLUMN);
        let occupancy = trees
            .iter()
            .map(|&t| LeafOccupancy::new(ensemble, t))
            .collect();
        Self { trees, occupancy }
    }

    fn empty() -> Self {
        Self {
            trees: Vec::new(),
            occupancy: Vec::new(),
        }
    }

    fn leaves_of(&self, ensemble: &Ensemble, row: ArrayView1<f64>, out: &mut Vec<usize>) {
        out.clear();
        out.extend(
            self.trees
                .iter()
                .map(|&t| ensemble.trees[t].route_to_leaf(row, &ensemble.grid)),
        );
    }

    fn can_remove(&self, leaves: &[usize], floor: usize) -> bool {
        self.occupancy
            .iter()
            .zip(leaves)
            .all(|(occupancy, &leaf)| occupancy.can_remove(leaf, floor))
    }

    fn remove(&mut self, leaves: &[usize]) {
        for (occupancy, &leaf) in self.occupancy.iter_mut().zip(leaves) {
            occupancy.remove(leaf);
        }
    }

    fn insert(&mut self, leaves: &[usize]) {
        for (occupancy, &leaf) in self.occupancy.iter_mut().zip(leaves) {
            occupancy.insert(leaf);
        }
    }
}

fn leaf_sum(trees: &[DecisionTree], selected: &[usize], leaves: &[usize]) -> f64 {
    selected
        .iter()
        .zip(leaves)
        .map(|(&t, &leaf)| trees[t].value[leaf])
        .sum()
}

fn leaf_product(trees: &[DecisionTree], selected: &[usize], leaves: &[usize]) -> f64 {
    selected
        .iter()
        .zip(leaves)
        .map(|(&t, &leaf)| trees[t].value[leaf])
        .product()
}

/// Redraws every truncated response from `N(mean_fit, 1 / precision_fit)`
/// restricted to values above its observed bound.
pub fn impute_truncated<R: Rng + ?Sized>(
    y: &mut Array1<f64>,
    observed: &Array1<f64>,
    truncated: &[bool],
    mean_fit: &Array1<f64>,
    precision_fit: &Array1<f64>,
    rng: &mut R,
) {
    for (k, &is_truncated) in truncated.iter().enumerate() {
        if !is_truncated {
            continue;
        }
        let sd = 1.0 / precision_fit[k].sqrt();
        y[k] = truncated_normal_above(mean_fit[k], sd, observed[k], rng);
    }
}

/// Latent grid values currently acting as split boundaries, ascending and
/// de-duplicated, always including the first and last value of the mean
/// ensemble's latent grid.
pub fn latent_boundaries(mean: &Ensemble, precision: &Ensemble, scale_mixture: bool) -> Vec<f64> {
    let cuts = mean.grid.values(LATENT_COLUMN);
    let mut boundaries = Vec::new();
    if let (Some(&first), Some(&last)) = (cuts.first(), cuts.last()) {
        boundaries.push(first);
        boundaries.push(last);
    }

    let mut collect = |ensemble: &Ensemble| {
        for tree in &ensemble.trees {
            boundaries.extend(
                tree.split_boundaries(LATENT_COLUMN)
                    .into_iter()
                    .map(|c| ensemble.grid.value(LATENT_COLUMN, c)),
            );
        }
    };
    collect(mean);
    if scale_mixture {
        collect(precision);
    }

    boundaries.sort_by(f64::total_cmp);
    boundaries.dedup();
    boundaries
}

/// Sweeps over every observation in order, slice-sampling its latent value
/// given `y` and the trees that split on the latent covariate.
///
/// Keeps the running fits of both ensembles exact: the mean fit is
/// rebuilt from the partial fit and the moved observation's new leaves, and
/// in scale-mixture mode the precision fit likewise, capped at
/// `max_precision`.
pub fn update_latent<R: Rng + ?Sized>(
    mean: &mut Ensemble,
    precision: &mut Ensemble,
    y: &Array1<f64>,
    settings: &LatentSettings,
    rng: &mut R,
) -> LatentUpdate {
    let scale_mixture = settings.scale_mixture;
    let mut mean_latent = LatentTrees::new(mean);
    let mut precision_latent = if scale_mixture {
        LatentTrees::new(precision)
    } else {
        LatentTrees::empty()
    };

    let mut update = LatentUpdate {
        mean_trees: mean_latent.trees.len(),
        precision_trees: precision_latent.trees.len(),
        ..LatentUpdate::default()
    };

    let mut mean_leaves = Vec::with_capacity(mean_latent.trees.len());
    let mut precision_leaves = Vec::with_capacity(precision_latent.trees.len());

    for k in 0..mean.n_observations() {
        mean_latent.leaves_of(mean, mean.x.row(k), &mut mean_leaves);
        precision_latent.leaves_of(precision, precision.x.row(k), &mut precision_leaves);

        if !mean_latent.can_remove(&mean_leaves, settings.min_occupancy)
            || !precision_latent.can_remove(&precision_leaves, settings.min_occupancy)
        {
            update.skipped += 1;
            continue;
        }

        mean_latent.remove(&mean_leaves);
        precision_latent.remove(&precision_leaves);

        let partial_mean = mean.fit[k] - leaf_sum(&mean.trees, &mean_latent.trees, &mean_leaves);
        let partial_precision = if scale_mixture {
            precision.fit[k]
                / leaf_product(&precision.trees, &precision_latent.trees, &precision_leaves)
        } else {
            precision.fit[k]
        };

        let mut mean_row = mean.x.row(k).to_owned();
        let mut precision_row = precision.x.row(k).to_owned();
        let (yk, current) = (y[k], mean_row[LATENT_COLUMN]);

        let latent_mean_trees = &mean_latent.trees;
        let latent_precision_trees = &precision_latent.trees;
        let (mean_ref, precision_ref) = (&*mean, &*precision);
        let mut density = |u: f64| {
            mean_row[LATENT_COLUMN] = u;
            let mu = partial_mean
                + latent_mean_trees
                    .iter()
                    .map(|&t| mean_ref.trees[t].predict(mean_row.view(), &mean_ref.grid))
                    .sum::<f64>();
            let prec = if scale_mixture {
                precision_row[LATENT_COLUMN] = u;
                partial_precision
                    * latent_precision_trees
                        .iter()
                        .map(|&t| {
                            precision_ref.trees[t].predict(precision_row.view(), &precision_ref.grid)
                        })
                        .product::<f64>()
            } else {
                partial_precision
            };
            ln_normal_pdf(yk, mu, 1.0 / prec.sqrt())
        };

        let u = settings.slice.sample(current, &mut density, rng);

        mean.x[[k, LATENT_COLUMN]] = u;
        mean_latent.leaves_of(mean, mean.x.row(k), &mut mean_leaves);
        mean_latent.insert(&mean_leaves);
        mean.fit[k] = partial_mean + leaf_sum(&mean.trees, &mean_latent.trees, &mean_leaves);

        if scale_mixture {
            precision.x[[k, LATENT_COLUMN]] = u;
            precision_latent.leaves_of(precision, precision.x.row(k), &mut precision_leaves);
            precision_latent.insert(&precision_leaves);
            let product =
                leaf_product(&precision.trees, &precision_latent.trees, &precision_leaves);
            precision.fit[k] = (partial_precision * product).min(settings.max_precision);
        }

        update.resampled += 1;
    }

    update
}
