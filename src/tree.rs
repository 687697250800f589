//! A Binary Decision Tree is the core data structure of the sampler. The tree
//! is implemented using an array (vector) representation with explicit child
//! and parent links so that leaves anywhere in the tree can be grown (birth)
//! and pruned (death) in place.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use ndarray::{Array1, Array2, ArrayView1};

use crate::cutpoints::CutpointGrid;
use crate::snapshot::{SnapshotNode, TreeSnapshot};

/// Sentinel used for missing child or parent links.
pub const NO_NODE: usize = usize::MAX;

/// Index of the root node. The root is never freed.
pub const ROOT: usize = 0;

/// Represents errors related to binary decision tree operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TreeError {
    /// When attempting to split a leaf node, if the node is not a leaf.
    #[error("Cannot split a non-leaf node")]
    NonLeafSplit,
    /// When the node index does not refer to a live node.
    #[error("Node index does not exist")]
    InvalidNodeIndex,
    /// When attempting to collapse a node whose children are not both leaves.
    #[error("Node {0} does not have two leaf children")]
    NotCollapsible(usize),
    /// When a snapshot does not describe a valid binary tree.
    #[error("invalid tree snapshot: {0}")]
    InvalidSnapshot(String),
    /// When a split refers to a feature or cutpoint the grid does not have.
    #[error("Split at node {0} lies outside the cutpoint grid")]
    OutsideGrid(usize),
}

/// A `DecisionTree` is an array-based implementation of the binary decision tree.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionTree {
    /// Stores the feature index for splitting at the i'th node.
    pub feature: Vec<usize>,
    /// Stores the index into the feature's cutpoint grid for the i'th node split.
    pub cutpoint: Vec<usize>,
    /// Stores the leaf parameter of the i'th node. Only meaningful for leaves.
    pub value: Vec<f64>,
    left: Vec<usize>,
    right: Vec<usize>,
    parent: Vec<usize>,
    alive: Vec<bool>,
    free: Vec<usize>,
}

impl DecisionTree {
    /// Creates a new `DecisionTree` consisting of a single leaf holding
    /// `init_value`.
    ///
    /// The `i-th` element of each vector holds information about node `i`.
    /// Node 0 is the tree's root. `feature` and `cutpoint` only apply to split
    /// nodes and `value` only to leaves; the remaining entries are arbitrary.
    /// Slots released by a death are kept on a free list and reused by later
    /// births, so node indices are stable while a node is alive but are not
    /// a canonical numbering. Use [`DecisionTree::to_snapshot`] for that.
    pub fn new(init_value: f64) -> Self {
        Self {
            feature: vec![0],
            cutpoint: vec![0],
            value: vec![init_value],
            left: vec![NO_NODE],
            right: vec![NO_NODE],
            parent: vec![NO_NODE],
            alive: vec![true],
            free: Vec::new(),
        }
    }

    /// Adds a new leaf under `parent` and returns its index.
    fn add_node(&mut self, parent: usize, value: f64) -> usize {
        if let Some(node) = self.free.pop() {
            self.feature[node] = 0;
            self.cutpoint[node] = 0;
            self.value[node] = value;
            self.left[node] = NO_NODE;
            self.right[node] = NO_NODE;
            self.parent[node] = parent;
            self.alive[node] = true;
            return node;
        }

        let node = self.feature.len();
        self.feature.push(0);
        self.cutpoint.push(0);
        self.value.push(value);
        self.left.push(NO_NODE);
        self.right.push(NO_NODE);
        self.parent.push(parent);
        self.alive.push(true);
        node
    }

    fn release_node(&mut self, node: usize) {
        self.alive[node] = false;
        self.free.push(node);
    }

    /// Number of node slots, live or free. Scratch buffers indexed by node
    /// must have at least this length.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.feature.len()
    }

    /// Number of live nodes.
    pub fn n_nodes(&self) -> usize {
        self.feature.len() - self.free.len()
    }

    /// Checks whether `index` refers to a live node.
    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        index < self.alive.len() && self.alive[index]
    }

    /// Returns the left child of _this_ node.
    #[inline]
    pub fn left_child(&self, index: usize) -> Option<usize> {
        (self.left[index] != NO_NODE).then_some(self.left[index])
    }

    /// Returns the right child of _this_ node.
    #[inline]
    pub fn right_child(&self, index: usize) -> Option<usize> {
        (self.right[index] != NO_NODE).then_some(self.right[index])
    }

    /// Returns the parent of _this_ node, `None` for the root.
    #[inline]
    pub fn parent(&self, index: usize) -> Option<usize> {
        (self.parent[index] != NO_NODE).then_some(self.parent[index])
    }

    /// Checks whether the passed index is a leaf node.
    #[inline(always)]
    pub fn is_leaf(&self, index: usize) -> bool {
        self.left[index] == NO_NODE
    }

    /// Checks whether the node is internal with two leaf children, i.e. a
    /// candidate for a death move.
    pub fn is_nog(&self, index: usize) -> bool {
        !self.is_leaf(index) && self.is_leaf(self.left[index]) && self.is_leaf(self.right[index])
    }

    /// Computes the depth of _this_ node in the `DecisionTree`.
    #[inline]
    pub fn node_depth(&self, index: usize) -> usize {
        let mut depth = 0;
        let mut current = index;

        while let Some(parent) = self.parent(current) {
            depth += 1;
            current = parent;
        }

        depth
    }

    /// Live nodes in pre-order (node, left subtree, right subtree).
    pub fn preorder(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.n_nodes());
        let mut stack = vec![ROOT];
        while let Some(node) = stack.pop() {
            order.push(node);
            if !self.is_leaf(node) {
                stack.push(self.right[node]);
                stack.push(self.left[node]);
            }
        }
        order
    }

    /// Leaf nodes in pre-order.
    pub fn leaves(&self) -> Vec<usize> {
        self.preorder()
            .into_iter()
            .filter(|&node| self.is_leaf(node))
            .collect()
    }

    /// Internal nodes whose children are both leaves, in pre-order.
    pub fn nogs(&self) -> Vec<usize> {
        self.preorder()
            .into_iter()
            .filter(|&node| self.is_nog(node))
            .collect()
    }

    /// Number of leaf nodes.
    pub fn n_leaves(&self) -> usize {
        (self.n_nodes() + 1) / 2
    }

    /// Inclusive range of cutpoint indices available for `feature` at `node`.
    ///
    /// Starts from the whole grid and narrows it by every ancestor that
    /// splits on `feature`: below a split at `c` the left subtree keeps
    /// `[L, c - 1]` and the right subtree keeps `[c + 1, U]`. Returns `None`
    /// when the range is empty.
    pub fn cutpoint_range(
        &self,
        node: usize,
        feature: usize,
        grid: &CutpointGrid,
    ) -> Option<(usize, usize)> {
        let mut lower: isize = 0;
        let mut upper: isize = grid.len(feature) as isize - 1;

        let mut child = node;
        while let Some(parent) = self.parent(child) {
            if self.feature[parent] == feature {
                let c = self.cutpoint[parent] as isize;
                if self.left[parent] == child {
                    upper = upper.min(c - 1);
                } else {
                    lower = lower.max(c + 1);
                }
            }
            child = parent;
        }

        (lower <= upper).then(|| (lower as usize, upper as usize))
    }

    /// Features with at least one legal cutpoint at `node`.
    pub fn splittable_features(&self, node: usize, grid: &CutpointGrid) -> Vec<usize> {
        (0..grid.n_covariates())
            .filter(|&feature| self.cutpoint_range(node, feature, grid).is_some())
            .collect()
    }

    /// Checks whether any feature has a legal cutpoint at `node`.
    pub fn can_split(&self, node: usize, grid: &CutpointGrid) -> bool {
        (0..grid.n_covariates()).any(|feature| self.cutpoint_range(node, feature, grid).is_some())
    }

    /// Descends from the root to the leaf that `sample` falls in.
    #[inline]
    pub fn route_to_leaf(&self, sample: ArrayView1<f64>, grid: &CutpointGrid) -> usize {
        let mut node = ROOT;
        while !self.is_leaf(node) {
            let feature = self.feature[node];
            node = if sample[feature] < grid.value(feature, self.cutpoint[node]) {
                self.left[node]
            } else {
                self.right[node]
            };
        }
        node
    }

    /// Predicts the leaf value for a single sample.
    #[inline]
    pub fn predict(&self, sample: ArrayView1<f64>, grid: &CutpointGrid) -> f64 {
        self.value[self.route_to_leaf(sample, grid)]
    }

    /// Leaf value of every row of `x`.
    pub fn fit(&self, x: &Array2<f64>, grid: &CutpointGrid) -> Array1<f64> {
        let mut out = Array1::zeros(x.nrows());
        self.fit_into(x, grid, &mut out);
        out
    }

    /// Writes the leaf value of every row of `x` into `out`.
    pub fn fit_into(&self, x: &Array2<f64>, grid: &CutpointGrid, out: &mut Array1<f64>) {
        debug_assert_eq!(x.nrows(), out.len());
        for (row, slot) in x.rows().into_iter().zip(out.iter_mut()) {
            *slot = self.predict(row, grid);
        }
    }

    /// Maps each leaf to a dense position, rebuilt whenever the structure
    /// changes.
    pub fn leaf_index(&self) -> LeafIndex {
        let leaves = self.leaves();
        let mut position = vec![NO_NODE; self.capacity()];
        for (pos, &leaf) in leaves.iter().enumerate() {
            position[leaf] = pos;
        }
        LeafIndex { leaves, position }
    }

    /// Number of rows of `x` in each leaf, aligned with [`DecisionTree::leaves`].
    pub fn leaf_counts(&self, x: &Array2<f64>, grid: &CutpointGrid) -> Vec<usize> {
        let index = self.leaf_index();
        let mut counts = vec![0; index.len()];
        for row in x.rows() {
            counts[index.position(self.route_to_leaf(row, grid))] += 1;
        }
        counts
    }

    /// Cutpoint indices used by splits on `feature`.
    pub fn split_boundaries(&self, feature: usize) -> BTreeSet<usize> {
        self.preorder()
            .into_iter()
            .filter(|&node| !self.is_leaf(node) && self.feature[node] == feature)
            .map(|node| self.cutpoint[node])
            .collect()
    }

    /// Checks that every split refers to a feature and cutpoint index present
    /// in `grid`. Trees grown against `grid` always pass; rebuilt snapshots
    /// should be checked before prediction.
    pub fn validate_grid(&self, grid: &CutpointGrid) -> Result<(), TreeError> {
        for node in self.preorder() {
            if self.is_leaf(node) {
                continue;
            }
            let feature = self.feature[node];
            if feature >= grid.n_covariates() || self.cutpoint[node] >= grid.len(feature) {
                return Err(TreeError::OutsideGrid(node));
            }
        }
        Ok(())
    }

    /// Checks whether any split uses `feature`.
    pub fn uses_covariate(&self, feature: usize) -> bool {
        self.preorder()
            .into_iter()
            .any(|node| !self.is_leaf(node) && self.feature[node] == feature)
    }

    /// Splits a leaf node into an internal node with two new leaves.
    pub fn split_leaf(
        &mut self,
        node_index: usize,
        feature: usize,
        cutpoint: usize,
        left_value: f64,
        right_value: f64,
    ) -> Result<(usize, usize), TreeError> {
        if !self.contains(node_index) {
            return Err(TreeError::InvalidNodeIndex);
        }

        if !self.is_leaf(node_index) {
            return Err(TreeError::NonLeafSplit);
        }

        let left_child_index = self.add_node(node_index, left_value);
        let right_child_index = self.add_node(node_index, right_value);

        self.feature[node_index] = feature;
        self.cutpoint[node_index] = cutpoint;
        self.left[node_index] = left_child_index;
        self.right[node_index] = right_child_index;

        Ok((left_child_index, right_child_index))
    }

    /// Collapses an internal node whose children are both leaves back into a
    /// leaf holding `value`.
    pub fn collapse_node(&mut self, node_index: usize, value: f64) -> Result<(), TreeError> {
        if !self.contains(node_index) {
            return Err(TreeError::InvalidNodeIndex);
        }

        if !self.is_nog(node_index) {
            return Err(TreeError::NotCollapsible(node_index));
        }

        let (left, right) = (self.left[node_index], self.right[node_index]);
        self.release_node(left);
        self.release_node(right);

        self.feature[node_index] = 0;
        self.cutpoint[node_index] = 0;
        self.value[node_index] = value;
        self.left[node_index] = NO_NODE;
        self.right[node_index] = NO_NODE;

        Ok(())
    }

    /// Canonical description of the tree, independent of slot layout.
    ///
    /// Nodes are emitted in pre-order with heap numbering: the root is 1 and
    /// node `id` has children `2 * id` and `2 * id + 1`, so trees deeper than
    /// 63 levels cannot be numbered. Leaves carry feature and cutpoint 0.
    pub fn to_snapshot(&self) -> TreeSnapshot {
        let mut nodes = Vec::with_capacity(self.n_nodes());
        let mut stack = vec![(1u64, ROOT)];
        while let Some((id, node)) = stack.pop() {
            if self.is_leaf(node) {
                nodes.push(SnapshotNode {
                    id,
                    feature: 0,
                    cutpoint: 0,
                    value: self.value[node],
                });
            } else {
                nodes.push(SnapshotNode {
                    id,
                    feature: self.feature[node],
                    cutpoint: self.cutpoint[node],
                    value: self.value[node],
                });
                stack.push((2 * id + 1, self.right[node]));
                stack.push((2 * id, self.left[node]));
            }
        }
        TreeSnapshot { nodes }
    }

    /// Rebuilds a tree from a snapshot produced by [`DecisionTree::to_snapshot`].
    ///
    /// Only the structure is checked here; use
    /// [`DecisionTree::validate_grid`] before predicting with a snapshot that
    /// did not come from this crate.
    pub fn from_snapshot(snapshot: &TreeSnapshot) -> Result<Self, TreeError> {
        let nodes: HashMap<u64, &SnapshotNode> =
            snapshot.nodes.iter().map(|node| (node.id, node)).collect();
        if nodes.len() != snapshot.nodes.len() {
            return Err(TreeError::InvalidSnapshot("duplicate node id".to_string()));
        }
        let root = nodes
            .get(&1)
            .ok_or_else(|| TreeError::InvalidSnapshot("missing root node".to_string()))?;

        let mut tree = DecisionTree::new(root.value);
        let mut visited = 0;
        let mut stack = vec![(1u64, ROOT)];
        while let Some((id, node)) = stack.pop() {
            visited += 1;
            let entry = nodes[&id];
            let left_id = id.checked_mul(2);
            let right_id = left_id.and_then(|left| left.checked_add(1));
            let child = |key: Option<u64>| key.and_then(|key| nodes.get(&key));
            match (child(left_id), child(right_id)) {
                (None, None) => tree.value[node] = entry.value,
                (Some(left), Some(right)) => {
                    let (left_index, right_index) = tree.split_leaf(
                        node,
                        entry.feature,
                        entry.cutpoint,
                        left.value,
                        right.value,
                    )?;
                    tree.value[node] = entry.value;
                    stack.push((right.id, right_index));
                    stack.push((left.id, left_index));
                }
                _ => {
                    return Err(TreeError::InvalidSnapshot(format!(
                        "node {id} has exactly one child"
                    )))
                }
            }
        }

        if visited != nodes.len() {
            return Err(TreeError::InvalidSnapshot(
                "snapshot contains nodes unreachable from the root".to_string(),
            ));
        }

        Ok(tree)
    }
}

impl fmt::Display for DecisionTree {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_snapshot())
    }
}

/// Dense positions for the leaves of one tree.
///
/// Built from the tree's current structure and discarded once the structure
/// changes; it holds no references into the tree.
#[derive(Debug, Clone)]
pub struct LeafIndex {
    /// Leaf node indices in pre-order.
    pub leaves: Vec<usize>,
    position: Vec<usize>,
}

impl LeafIndex {
    /// Dense position of `leaf`.
    #[inline(always)]
    pub fn position(&self, leaf: usize) -> usize {
        self.position[leaf]
    }

    /// Number of leaves.
    #[inline]
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    /// Checks whether the index holds no leaves.
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }
}
