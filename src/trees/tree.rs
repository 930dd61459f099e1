//! Flat tree storage and traversal.
//!
//! A [`Tree`] keeps its decision nodes and its leaf values in two separate
//! arrays. Node 0 is the root; a tree with no nodes is a single leaf.
//! Trees are built once through [`TreeBuilder`], validated, and never mutated
//! afterwards.

use std::fmt;

use super::categories::{word_contains, CategoricalRule, CategoriesStorage};
use super::node::{ChildRef, MissingType, Node, NodeFlags};

// ============================================================================
// TreeValidationError
// ============================================================================

/// Structural validation errors for [`Tree`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeValidationError {
    /// Tree has no leaf values.
    #[error("tree has no leaves")]
    EmptyTree,
    /// Leaf count does not match the binary tree identity.
    #[error("tree with {n_nodes} nodes must have {} leaves, got {n_leaves}", .n_nodes + 1)]
    LeafCountMismatch { n_nodes: usize, n_leaves: usize },
    /// A child reference points outside the node or leaf arrays.
    #[error("node {node}: child {child:?} out of bounds")]
    ChildOutOfBounds { node: u32, child: ChildRef },
    /// A node or leaf is reached more than once (DAG or cycle).
    #[error("{0:?} is reachable more than once")]
    DuplicateVisit(ChildRef),
    /// A node or leaf exists but cannot be reached from the root.
    #[error("{0:?} is unreachable from the root")]
    Unreachable(ChildRef),
    /// A categorical node references a missing bitset.
    #[error("node {node}: categorical set {set} out of bounds ({n_sets} sets)")]
    InvalidCategorySet { node: u32, set: u32, n_sets: usize },
}

// ============================================================================
// Tree
// ============================================================================

/// An immutable decision tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    nodes: Box<[Node]>,
    leaf_values: Box<[f64]>,
    categories: CategoriesStorage,
    n_categorical: usize,
}

impl Tree {
    /// A tree without decision nodes.
    pub fn single_leaf(value: f64) -> Self {
        Self {
            nodes: Box::new([]),
            leaf_values: Box::new([value]),
            categories: CategoriesStorage::empty(),
            n_categorical: 0,
        }
    }

    /// Number of decision nodes.
    #[inline]
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of leaves, always `n_nodes() + 1`.
    #[inline]
    pub fn n_leaves(&self) -> usize {
        self.nodes.len() + 1
    }

    /// Number of categorical decision nodes.
    #[inline]
    pub fn n_categorical(&self) -> usize {
        self.n_categorical
    }

    #[inline]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    #[inline]
    pub fn leaf_values(&self) -> &[f64] {
        &self.leaf_values
    }

    #[inline]
    pub fn categories(&self) -> &CategoriesStorage {
        &self.categories
    }

    /// Largest feature index used by any split.
    pub fn max_split_feature(&self) -> Option<u32> {
        self.nodes.iter().map(|n| n.split_feature).max()
    }

    /// Predict the leaf value for one row.
    ///
    /// `features` must cover every split feature of the tree.
    #[inline]
    pub fn predict(&self, features: &[f64]) -> f64 {
        self.predict_leaf(features).0
    }

    /// Index of the leaf reached by one row.
    #[inline]
    pub fn leaf_index(&self, features: &[f64]) -> u32 {
        self.predict_leaf(features).1
    }

    /// Traverse from the root and return `(leaf value, leaf index)`.
    pub fn predict_leaf(&self, features: &[f64]) -> (f64, u32) {
        if self.nodes.is_empty() {
            return (self.leaf_values[0], 0);
        }

        let mut idx = 0usize;
        loop {
            let node = &self.nodes[idx];
            let value = features[node.split_feature as usize];
            if self.goes_left(node, value) {
                if node.flags.contains(NodeFlags::LEFT_LEAF) {
                    return (self.leaf_values[node.left as usize], node.left);
                }
                idx = node.left as usize;
            } else {
                if node.flags.contains(NodeFlags::RIGHT_LEAF) {
                    return (self.leaf_values[node.right as usize], node.right);
                }
                idx = node.right as usize;
            }
        }
    }

    #[inline]
    fn goes_left(&self, node: &Node, value: f64) -> bool {
        if node.is_categorical() {
            self.categorical_goes_left(node, value)
        } else {
            node.numeric_goes_left(value)
        }
    }

    #[inline]
    fn categorical_goes_left(&self, node: &Node, value: f64) -> bool {
        let category = if value.is_nan() {
            if node.flags.contains(NodeFlags::MISSING_NAN) {
                return false;
            }
            0
        } else {
            // truncation toward zero, like the training tool's int cast
            let category = value as i32;
            if category < 0 {
                return false;
            }
            category as u32
        };

        if node.flags.contains(NodeFlags::CAT_ONE_HOT) {
            node.threshold as u32 == category
        } else if node.flags.contains(NodeFlags::CAT_SMALL) {
            word_contains(node.threshold as u32, category)
        } else {
            self.categories.contains(node.threshold as u32, category)
        }
    }

    /// Check that the nodes form a proper binary tree rooted at node 0.
    pub fn validate(&self) -> Result<(), TreeValidationError> {
        let n_nodes = self.nodes.len();
        let n_leaves = self.leaf_values.len();
        if n_leaves == 0 {
            return Err(TreeValidationError::EmptyTree);
        }
        if n_leaves != n_nodes + 1 {
            return Err(TreeValidationError::LeafCountMismatch { n_nodes, n_leaves });
        }
        if n_nodes == 0 {
            return Ok(());
        }

        let mut seen_nodes = vec![false; n_nodes];
        let mut seen_leaves = vec![false; n_leaves];
        let mut stack = vec![0u32];
        seen_nodes[0] = true;

        while let Some(node_idx) = stack.pop() {
            let node = &self.nodes[node_idx as usize];
            if node.is_categorical()
                && !node.flags.contains(NodeFlags::CAT_ONE_HOT)
                && !node.flags.contains(NodeFlags::CAT_SMALL)
            {
                let set = node.threshold as u32;
                if set as usize >= self.categories.n_sets() {
                    return Err(TreeValidationError::InvalidCategorySet {
                        node: node_idx,
                        set,
                        n_sets: self.categories.n_sets(),
                    });
                }
            }

            for child in [node.left_child(), node.right_child()] {
                let (seen, idx) = match child {
                    ChildRef::Leaf(idx) => (&mut seen_leaves, idx),
                    ChildRef::Node(idx) => (&mut seen_nodes, idx),
                };
                let Some(slot) = seen.get_mut(idx as usize) else {
                    return Err(TreeValidationError::ChildOutOfBounds {
                        node: node_idx,
                        child,
                    });
                };
                if *slot {
                    return Err(TreeValidationError::DuplicateVisit(child));
                }
                *slot = true;
                if let ChildRef::Node(idx) = child {
                    stack.push(idx);
                }
            }
        }

        if let Some(idx) = seen_nodes.iter().position(|s| !s) {
            return Err(TreeValidationError::Unreachable(ChildRef::Node(idx as u32)));
        }
        if let Some(idx) = seen_leaves.iter().position(|s| !s) {
            return Err(TreeValidationError::Unreachable(ChildRef::Leaf(idx as u32)));
        }
        Ok(())
    }
}

impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tree(nodes={}, leaves={}, categorical={})",
            self.n_nodes(),
            self.n_leaves(),
            self.n_categorical
        )
    }
}

// ============================================================================
// TreeBuilder
// ============================================================================

/// Builder for [`Tree`].
///
/// Nodes are appended in index order; children are given as [`ChildRef`]s
/// that may point forward to nodes not yet added.
#[derive(Debug, Default)]
pub struct TreeBuilder {
    nodes: Vec<Node>,
    bitsets: Vec<u32>,
    boundaries: Vec<u32>,
    n_categorical: usize,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n_nodes: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(n_nodes),
            ..Self::default()
        }
    }

    /// Add a numeric split (`value <= threshold` goes left). Returns the node index.
    pub fn add_numeric(
        &mut self,
        split_feature: u32,
        threshold: f64,
        default_left: bool,
        missing: MissingType,
        left: ChildRef,
        right: ChildRef,
    ) -> u32 {
        let idx = self.nodes.len() as u32;
        self.nodes.push(Node::numeric(
            split_feature,
            threshold,
            default_left,
            missing,
            left,
            right,
        ));
        idx
    }

    /// Add a categorical split whose left set is `bitset`. Returns the node index.
    pub fn add_categorical(
        &mut self,
        split_feature: u32,
        bitset: &[u32],
        default_left: bool,
        missing: MissingType,
        left: ChildRef,
        right: ChildRef,
    ) -> u32 {
        let (threshold, rule_flags) = match CategoricalRule::classify(bitset) {
            CategoricalRule::OneHot(category) => (f64::from(category), NodeFlags::CAT_ONE_HOT),
            CategoricalRule::Small(word) => (f64::from(word), NodeFlags::CAT_SMALL),
            CategoricalRule::Bitset => (f64::from(self.push_bitset(bitset)), NodeFlags::empty()),
        };
        let idx = self.nodes.len() as u32;
        self.nodes.push(Node::categorical(
            split_feature,
            threshold,
            rule_flags,
            default_left,
            missing,
            left,
            right,
        ));
        self.n_categorical += 1;
        idx
    }

    fn push_bitset(&mut self, bitset: &[u32]) -> u32 {
        if self.boundaries.is_empty() {
            self.boundaries.push(0);
        }
        self.bitsets.extend_from_slice(bitset);
        self.boundaries.push(self.bitsets.len() as u32);
        (self.boundaries.len() - 2) as u32
    }

    /// Attach the leaf values and validate the structure.
    pub fn build(self, leaf_values: Vec<f64>) -> Result<Tree, TreeValidationError> {
        let tree = Tree {
            nodes: self.nodes.into_boxed_slice(),
            leaf_values: leaf_values.into_boxed_slice(),
            categories: CategoriesStorage::new(self.bitsets, self.boundaries),
            n_categorical: self.n_categorical,
        };
        tree.validate()?;
        Ok(tree)
    }
}
