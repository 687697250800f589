//! Birth/death Metropolis-Hastings proposals on a single tree.
//!
//! A proposal is computed in full against the unchanged tree. The tree is
//! only mutated after the move is accepted, so a rejected proposal leaves the
//! structure and leaf values untouched.
//!
//! Two proposal kinds share the same move selection and tree-prior terms:
//! - `BirthDeath` integrates the leaf parameters out and compares closed-form
//!   marginal likelihoods.
//! - `ReversibleJump` draws the new leaf parameters from the leaf prior and
//!   compares conditional likelihoods at the proposed and current values.

use std::str::FromStr;

use ndarray::Array2;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::cutpoints::CutpointGrid;
use crate::error::DrBartError;
use crate::ops::{LeafModel, LeafPosterior, ResidualView, TreePrior};
use crate::stats::SufficientStats;
use crate::tree::DecisionTree;

/// Variants indicate how a structural move treats leaf parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalKind {
    /// Leaf parameters integrated out.
    #[default]
    BirthDeath,
    /// Leaf parameters proposed from their prior.
    ReversibleJump,
}

impl FromStr for ProposalKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "birth_death" | "birthdeath" => Ok(ProposalKind::BirthDeath),
            "reversible_jump" | "rj" => Ok(ProposalKind::ReversibleJump),
            _ => Err(format!("Unknown proposal kind: {}", s)),
        }
    }
}

/// The structural move that was attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Move {
    /// Grow a leaf into a split with two leaves.
    Birth,
    /// Collapse a split whose children are leaves.
    Death,
    /// Nothing could be proposed.
    None,
}

/// Result of one proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProposalOutcome {
    /// Move that was attempted.
    pub kind: Move,
    /// Whether the move was accepted and applied.
    pub accepted: bool,
}

impl ProposalOutcome {
    fn none() -> Self {
        Self {
            kind: Move::None,
            accepted: false,
        }
    }

    fn rejected(kind: Move) -> Self {
        Self {
            kind,
            accepted: false,
        }
    }

    fn accepted(kind: Move) -> Self {
        Self {
            kind,
            accepted: true,
        }
    }
}

/// Data and priors a proposal is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct ProposalContext<'a> {
    /// Covariates, one row per observation.
    pub x: &'a Array2<f64>,
    /// Cutpoints for the columns of `x`.
    pub grid: &'a CutpointGrid,
    /// Residuals the tree is fit to.
    pub residuals: ResidualView<'a>,
    /// Leaf model of the ensemble.
    pub model: &'a LeafModel,
    /// Tree-shape prior of the ensemble.
    pub prior: &'a TreePrior,
    /// Smallest number of observations a new child may hold.
    pub min_leaf_size: usize,
}

/// Proposes and accepts or rejects one birth or death move on `tree`.
pub fn propose<R: Rng + ?Sized>(
    tree: &mut DecisionTree,
    kind: ProposalKind,
    ctx: &ProposalContext,
    rng: &mut R,
) -> Result<ProposalOutcome, DrBartError> {
    let good_leaves: Vec<usize> = tree
        .leaves()
        .into_iter()
        .filter(|&leaf| tree.can_split(leaf, ctx.grid))
        .collect();

    let birth_probability = if good_leaves.is_empty() {
        0.0
    } else if tree.n_nodes() == 1 {
        1.0
    } else {
        ctx.prior.birth_probability
    };

    if rng.gen::<f64>() < birth_probability {
        birth(tree, kind, ctx, &good_leaves, birth_probability, rng)
    } else {
        let nogs = tree.nogs();
        if nogs.is_empty() {
            return Ok(ProposalOutcome::none());
        }
        death(tree, kind, ctx, &good_leaves, &nogs, birth_probability, rng)
    }
}

fn birth<R: Rng + ?Sized>(
    tree: &mut DecisionTree,
    kind: ProposalKind,
    ctx: &ProposalContext,
    good_leaves: &[usize],
    birth_probability: f64,
    rng: &mut R,
) -> Result<ProposalOutcome, DrBartError> {
    let node = good_leaves[rng.gen_range(0..good_leaves.len())];

    let features = tree.splittable_features(node, ctx.grid);
    let feature = features[rng.gen_range(0..features.len())];
    let Some((lower, upper)) = tree.cutpoint_range(node, feature, ctx.grid) else {
        return Ok(ProposalOutcome::none());
    };
    let cutpoint = rng.gen_range(lower..=upper);

    let depth = tree.node_depth(node);
    let grow_node = ctx.prior.split_probability(depth);
    let grow_child = ctx.prior.split_probability(depth + 1);

    // With a single usable feature a child can only split again if the
    // chosen cutpoint left room on its side of the range.
    let (grow_left, grow_right) = if features.len() > 1 {
        (grow_child, grow_child)
    } else {
        (
            if cutpoint > lower { grow_child } else { 0.0 },
            if cutpoint < upper { grow_child } else { 0.0 },
        )
    };

    let death_probability_after =
        if good_leaves.len() > 1 || grow_left > 0.0 || grow_right > 0.0 {
            1.0 - ctx.prior.birth_probability
        } else {
            1.0
        };

    let n_nogs = tree.nogs().len() as f64;
    let pick_nog_after = match tree.parent(node) {
        None => 1.0,
        Some(parent) if tree.is_nog(parent) => 1.0 / n_nogs,
        Some(_) => 1.0 / (n_nogs + 1.0),
    };
    let pick_leaf = 1.0 / good_leaves.len() as f64;

    let (left, right) = split_statistics(tree, node, feature, cutpoint, ctx);
    let min_size = ctx.min_leaf_size.max(1);
    if left.n < min_size || right.n < min_size {
        return Ok(ProposalOutcome::rejected(Move::Birth));
    }

    let log_structure = grow_node.ln()
        + (1.0 - grow_left).ln()
        + (1.0 - grow_right).ln()
        + death_probability_after.ln()
        + pick_nog_after.ln()
        - (1.0 - grow_node).ln()
        - birth_probability.ln()
        - pick_leaf.ln();

    let (log_likelihood, left_value, right_value) = match kind {
        ProposalKind::BirthDeath => {
            let ratio = ctx.model.log_marginal(&left) + ctx.model.log_marginal(&right)
                - ctx.model.log_marginal(&(left + right));
            (ratio, None, None)
        }
        ProposalKind::ReversibleJump => {
            let left_value = ctx.model.sample_prior(rng)?;
            let right_value = ctx.model.sample_prior(rng)?;
            let ratio = ctx.model.log_likelihood(&left, left_value)
                + ctx.model.log_likelihood(&right, right_value)
                - ctx.model.log_likelihood(&(left + right), tree.value[node]);
            (ratio, Some(left_value), Some(right_value))
        }
    };

    if rng.gen::<f64>().ln() >= log_structure + log_likelihood {
        return Ok(ProposalOutcome::rejected(Move::Birth));
    }

    let left_value = match left_value {
        Some(value) => value,
        None => ctx.model.sample_posterior(&left, rng)?,
    };
    let right_value = match right_value {
        Some(value) => value,
        None => ctx.model.sample_posterior(&right, rng)?,
    };
    tree.split_leaf(node, feature, cutpoint, left_value, right_value)?;

    Ok(ProposalOutcome::accepted(Move::Birth))
}

fn death<R: Rng + ?Sized>(
    tree: &mut DecisionTree,
    kind: ProposalKind,
    ctx: &ProposalContext,
    good_leaves: &[usize],
    nogs: &[usize],
    birth_probability: f64,
    rng: &mut R,
) -> Result<ProposalOutcome, DrBartError> {
    let node = nogs[rng.gen_range(0..nogs.len())];
    let (Some(left_node), Some(right_node)) = (tree.left_child(node), tree.right_child(node))
    else {
        return Ok(ProposalOutcome::none());
    };

    let grow_node = ctx.prior.split_probability(tree.node_depth(node));
    let grow_left = ctx.prior.grow_probability(tree, left_node, ctx.grid);
    let grow_right = ctx.prior.grow_probability(tree, right_node, ctx.grid);

    let birth_probability_after = if tree.parent(node).is_none() {
        1.0
    } else {
        ctx.prior.birth_probability
    };

    // After the death the node itself is splittable and its children are gone.
    let n_good_after = good_leaves.len() + 1
        - usize::from(tree.can_split(left_node, ctx.grid))
        - usize::from(tree.can_split(right_node, ctx.grid));
    let pick_leaf_after = 1.0 / n_good_after as f64;
    let death_probability = 1.0 - birth_probability;
    let pick_nog = 1.0 / nogs.len() as f64;

    let (left, right) = children_statistics(tree, left_node, right_node, ctx);
    let merged = left + right;

    let log_structure = (1.0 - grow_node).ln()
        + birth_probability_after.ln()
        + pick_leaf_after.ln()
        - grow_node.ln()
        - (1.0 - grow_left).ln()
        - (1.0 - grow_right).ln()
        - death_probability.ln()
        - pick_nog.ln();

    let (log_likelihood, value) = match kind {
        ProposalKind::BirthDeath => {
            let ratio = ctx.model.log_marginal(&merged)
                - ctx.model.log_marginal(&left)
                - ctx.model.log_marginal(&right);
            (ratio, None)
        }
        ProposalKind::ReversibleJump => {
            let value = ctx.model.sample_prior(rng)?;
            let ratio = ctx.model.log_likelihood(&merged, value)
                - ctx.model.log_likelihood(&left, tree.value[left_node])
                - ctx.model.log_likelihood(&right, tree.value[right_node]);
            (ratio, Some(value))
        }
    };

    if rng.gen::<f64>().ln() >= log_structure + log_likelihood {
        return Ok(ProposalOutcome::rejected(Move::Death));
    }

    let value = match value {
        Some(value) => value,
        None => ctx.model.sample_posterior(&merged, rng)?,
    };
    tree.collapse_node(node, value)?;

    Ok(ProposalOutcome::accepted(Move::Death))
}

/// Statistics of the observations in leaf `node`, divided by the candidate
/// rule `x[feature] < grid[feature][cutpoint]`.
pub fn split_statistics(
    tree: &DecisionTree,
    node: usize,
    feature: usize,
    cutpoint: usize,
    ctx: &ProposalContext,
) -> (SufficientStats, SufficientStats) {
    let threshold = ctx.grid.value(feature, cutpoint);
    let mut left = SufficientStats::default();
    let mut right = SufficientStats::default();

    for (i, row) in ctx.x.rows().into_iter().enumerate() {
        if tree.route_to_leaf(row, ctx.grid) != node {
            continue;
        }
        let (r, w) = (ctx.residuals.residuals[i], ctx.residuals.weight(i));
        if row[feature] < threshold {
            left.insert(r, w);
        } else {
            right.insert(r, w);
        }
    }

    (left, right)
}

fn children_statistics(
    tree: &DecisionTree,
    left_node: usize,
    right_node: usize,
    ctx: &ProposalContext,
) -> (SufficientStats, SufficientStats) {
    let mut left = SufficientStats::default();
    let mut right = SufficientStats::default();

    for (i, row) in ctx.x.rows().into_iter().enumerate() {
        let leaf = tree.route_to_leaf(row, ctx.grid);
        let (r, w) = (ctx.residuals.residuals[i], ctx.residuals.weight(i));
        if leaf == left_node {
            left.insert(r, w);
        } else if leaf == right_node {
            right.insert(r, w);
        }
    }

    (left, right)
}
