//! Per-draw output records.
//!
//! A retained draw carries the latent state and a snapshot of every tree in
//! both ensembles: mean trees first, then precision trees, each in ensemble
//! order. The order is identical across draws so that draws can be aligned
//! positionally after the run.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::backfit::MoveTally;
use crate::tree::TreeError;

/// One node of a [`TreeSnapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SnapshotNode {
    /// Heap number: root is 1, children of `id` are `2 * id` and `2 * id + 1`.
    pub id: u64,
    /// Split feature, 0 for leaves.
    pub feature: usize,
    /// Index into the feature's cutpoint grid, 0 for leaves.
    pub cutpoint: usize,
    /// Leaf parameter.
    pub value: f64,
}

/// Structure and leaf values of one tree, in pre-order.
///
/// The text form has the node count on the first line followed by one
/// `id feature cutpoint value` line per node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    /// Nodes in pre-order.
    pub nodes: Vec<SnapshotNode>,
}

impl fmt::Display for TreeSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{}", self.nodes.len())?;
        for node in &self.nodes {
            writeln!(
                f,
                "{} {} {} {:e}",
                node.id, node.feature, node.cutpoint, node.value
            )?;
        }
        Ok(())
    }
}

impl FromStr for TreeSnapshot {
    type Err = TreeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |msg: String| TreeError::InvalidSnapshot(msg);
        let mut lines = s.lines().map(str::trim).filter(|line| !line.is_empty());

        let count: usize = lines
            .next()
            .ok_or_else(|| invalid("empty snapshot".to_string()))?
            .parse()
            .map_err(|e| invalid(format!("bad node count: {e}")))?;

        let mut nodes = Vec::with_capacity(count);
        for line in lines {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 4 {
                return Err(invalid(format!("expected 4 fields, got `{line}`")));
            }
            let bad = |e: &dyn fmt::Display| invalid(format!("bad field in `{line}`: {e}"));
            nodes.push(SnapshotNode {
                id: fields[0].parse().map_err(|e| bad(&e))?,
                feature: fields[1].parse().map_err(|e| bad(&e))?,
                cutpoint: fields[2].parse().map_err(|e| bad(&e))?,
                value: fields[3].parse().map_err(|e| bad(&e))?,
            });
        }

        if nodes.len() != count {
            return Err(invalid(format!(
                "header announces {count} nodes, found {}",
                nodes.len()
            )));
        }

        Ok(Self { nodes })
    }
}

/// Everything retained from one MCMC iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draw {
    /// Iteration the draw was taken at, counting burn-in.
    pub iteration: usize,
    /// Scalar precision scale of the draw.
    pub precision_scale: f64,
    /// Latent-covariate grid values currently acting as leaf boundaries,
    /// ascending, always including both ends of the latent grid.
    pub latent_boundaries: Vec<f64>,
    /// Latent covariate of every observation.
    pub latent: Vec<f64>,
    /// Mean ensemble trees in ensemble order.
    pub mean_trees: Vec<TreeSnapshot>,
    /// Precision ensemble trees in ensemble order.
    pub precision_trees: Vec<TreeSnapshot>,
    /// Birth/death activity of the mean ensemble at this iteration.
    pub mean_moves: MoveTally,
    /// Birth/death activity of the precision ensemble at this iteration.
    pub precision_moves: MoveTally,
}

/// Receives retained draws as the chain produces them.
pub trait SnapshotSink {
    /// Called once per retained draw, in iteration order.
    fn record(&mut self, draw: Draw);
}

/// Keeps every draw in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    /// Draws in the order they were recorded.
    pub draws: Vec<Draw>,
}

impl MemorySink {
    /// Creates an empty sink with room for `capacity` draws.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            draws: Vec::with_capacity(capacity),
        }
    }
}

impl SnapshotSink for MemorySink {
    fn record(&mut self, draw: Draw) {
        self.draws.push(draw);
    }
}
