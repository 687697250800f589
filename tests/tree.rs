use drbart::cutpoints::CutpointGrid;
use drbart::tree::{DecisionTree, TreeError, ROOT};

use ndarray::{array, Array2};

fn grid() -> CutpointGrid {
    CutpointGrid::new(vec![vec![0.25, 0.5, 0.75], vec![1.0, 2.0]]).unwrap()
}

fn data() -> Array2<f64> {
    array![
        [0.1, 0.5],
        [0.3, 1.5],
        [0.5, 2.5],
        [0.6, 0.5],
        [0.9, 1.5],
        [0.95, 2.5],
    ]
}

#[test]
fn test_tree_primitives() {
    let mut tree = DecisionTree::new(1.5);

    assert_eq!(tree.n_nodes(), 1);
    assert!(tree.is_leaf(ROOT));
    assert_eq!(tree.parent(ROOT), None);
    assert!(tree.nogs().is_empty());

    let (left, right) = tree.split_leaf(ROOT, 0, 1, -1.0, 1.0).unwrap();

    // Test children and parent links of split node
    assert_eq!(tree.left_child(ROOT), Some(left));
    assert_eq!(tree.right_child(ROOT), Some(right));
    assert_eq!(tree.parent(left), Some(ROOT));
    assert_eq!(tree.node_depth(right), 1);

    // Test is leaf value
    assert!(!tree.is_leaf(ROOT));
    assert!(tree.is_leaf(left));
    assert!(tree.is_leaf(right));
    assert!(tree.is_nog(ROOT));

    assert_eq!(tree.leaves(), vec![left, right]);
    assert_eq!(tree.n_leaves(), 2);
    assert_eq!(tree.value[right], 1.0);
}

#[test]
fn test_split_errors() {
    let mut tree = DecisionTree::new(0.0);
    tree.split_leaf(ROOT, 0, 1, 0.0, 0.0).unwrap();

    assert_eq!(
        tree.split_leaf(ROOT, 0, 0, 0.0, 0.0),
        Err(TreeError::NonLeafSplit)
    );
    assert_eq!(
        tree.split_leaf(42, 0, 0, 0.0, 0.0),
        Err(TreeError::InvalidNodeIndex)
    );
}

#[test]
fn test_collapse_and_slot_reuse() {
    let mut tree = DecisionTree::new(0.0);
    let (left, right) = tree.split_leaf(ROOT, 0, 1, 1.0, 2.0).unwrap();
    tree.split_leaf(left, 1, 0, 3.0, 4.0).unwrap();

    // Root has an internal child, so it cannot be collapsed
    assert_eq!(tree.collapse_node(ROOT, 0.0), Err(TreeError::NotCollapsible(ROOT)));
    assert_eq!(tree.nogs(), vec![left]);

    tree.collapse_node(left, 5.0).unwrap();
    assert_eq!(tree.n_nodes(), 3);
    assert!(tree.is_leaf(left));
    assert_eq!(tree.value[left], 5.0);

    // Freed slots are reused by the next birth
    let capacity = tree.capacity();
    tree.split_leaf(right, 1, 1, 6.0, 7.0).unwrap();
    assert_eq!(tree.capacity(), capacity);
    assert_eq!(tree.n_nodes(), 5);
}

#[test]
fn test_cutpoint_range_narrows_along_path() {
    let grid = grid();
    let mut tree = DecisionTree::new(0.0);

    assert_eq!(tree.cutpoint_range(ROOT, 0, &grid), Some((0, 2)));

    let (left, right) = tree.split_leaf(ROOT, 0, 1, 0.0, 0.0).unwrap();
    assert_eq!(tree.cutpoint_range(left, 0, &grid), Some((0, 0)));
    assert_eq!(tree.cutpoint_range(right, 0, &grid), Some((2, 2)));
    // Other covariates keep their full range
    assert_eq!(tree.cutpoint_range(left, 1, &grid), Some((0, 1)));

    let (left_left, _) = tree.split_leaf(left, 0, 0, 0.0, 0.0).unwrap();
    assert_eq!(tree.cutpoint_range(left_left, 0, &grid), None);
    assert_eq!(tree.splittable_features(left_left, &grid), vec![1]);
    assert!(tree.can_split(left_left, &grid));
}

#[test]
fn test_routing_and_fit() {
    let grid = grid();
    let x = data();
    let mut tree = DecisionTree::new(0.0);
    let (left, right) = tree.split_leaf(ROOT, 0, 1, -1.0, 1.0).unwrap();

    // Values equal to the threshold go right
    assert_eq!(tree.route_to_leaf(x.row(2), &grid), right);
    assert_eq!(tree.route_to_leaf(x.row(1), &grid), left);

    let fit = tree.fit(&x, &grid);
    assert_eq!(fit.to_vec(), vec![-1.0, -1.0, 1.0, 1.0, 1.0, 1.0]);
    assert_eq!(tree.leaf_counts(&x, &grid), vec![2, 4]);
}

#[test]
fn test_split_boundaries_and_usage() {
    let mut tree = DecisionTree::new(0.0);
    let (left, right) = tree.split_leaf(ROOT, 1, 1, 0.0, 0.0).unwrap();
    tree.split_leaf(left, 0, 0, 0.0, 0.0).unwrap();
    tree.split_leaf(right, 0, 2, 0.0, 0.0).unwrap();

    assert!(tree.uses_covariate(0));
    assert!(tree.uses_covariate(1));
    assert_eq!(tree.split_boundaries(0).into_iter().collect::<Vec<_>>(), vec![0, 2]);
    assert_eq!(tree.split_boundaries(1).into_iter().collect::<Vec<_>>(), vec![1]);

    let stump = DecisionTree::new(0.0);
    assert!(!stump.uses_covariate(0));
    assert!(stump.split_boundaries(0).is_empty());
}

#[test]
fn test_snapshot_uses_heap_numbering() {
    let mut tree = DecisionTree::new(0.0);
    let (left, _) = tree.split_leaf(ROOT, 0, 1, 1.0, 2.0).unwrap();
    let (_, left_right) = tree.split_leaf(left, 1, 0, 3.0, 4.0).unwrap();
    tree.value[left_right] = 4.5;

    let snapshot = tree.to_snapshot();
    let ids: Vec<u64> = snapshot.nodes.iter().map(|node| node.id).collect();
    assert_eq!(ids, vec![1, 2, 4, 5, 3]);

    let leaf = &snapshot.nodes[3];
    assert_eq!((leaf.feature, leaf.cutpoint, leaf.value), (0, 0, 4.5));
    assert_eq!((snapshot.nodes[1].feature, snapshot.nodes[1].cutpoint), (1, 0));
}

#[test]
fn test_snapshot_round_trip_reproduces_fit() {
    let grid = grid();
    let x = data();
    let mut tree = DecisionTree::new(0.0);
    let (left, right) = tree.split_leaf(ROOT, 0, 2, 0.0, -2.0).unwrap();
    tree.split_leaf(left, 1, 0, 0.125, -0.75).unwrap();
    tree.split_leaf(right, 1, 1, 3.0, 1.0e-3).unwrap();
    // Free a slot so the arena layout differs from a fresh build
    tree.collapse_node(right, 9.0).unwrap();

    let rebuilt = DecisionTree::from_snapshot(&tree.to_snapshot()).unwrap();
    assert_eq!(rebuilt.fit(&x, &grid), tree.fit(&x, &grid));
    assert_eq!(rebuilt.to_snapshot(), tree.to_snapshot());
    assert_eq!(rebuilt.to_string(), tree.to_string());
}
