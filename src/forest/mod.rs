//! Tree ensembles with round-robin output groups.

use crate::trees::Tree;

/// An ordered collection of trees.
///
/// Trees are stored in boosting order. Each boosting round contributes one
/// tree per output group, so tree `i` belongs to group `i % n_groups`.
#[derive(Debug, Clone, PartialEq)]
pub struct Forest {
    trees: Vec<Tree>,
    n_groups: u32,
    /// Random-forest mode: outputs are averaged instead of summed.
    average_output: bool,
}

impl Forest {
    /// Create an empty forest with the given number of output groups.
    ///
    /// A forest with zero groups holds no complete round and is rejected by
    /// [`Ensemble::new`](crate::Ensemble::new).
    pub fn new(n_groups: u32) -> Self {
        Self {
            trees: Vec::new(),
            n_groups,
            average_output: false,
        }
    }

    /// Create a forest for regression (single output group).
    pub fn for_regression() -> Self {
        Self::new(1)
    }

    /// Average tree outputs over the rounds used instead of summing them.
    pub fn with_average_output(mut self, average_output: bool) -> Self {
        self.average_output = average_output;
        self
    }

    /// Append the next tree in boosting order.
    pub fn push_tree(&mut self, tree: Tree) {
        self.trees.push(tree);
    }

    /// Number of trees.
    #[inline]
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Number of output groups (trees per round).
    #[inline]
    pub fn n_groups(&self) -> u32 {
        self.n_groups
    }

    /// Number of complete boosting rounds.
    #[inline]
    pub fn n_rounds(&self) -> usize {
        self.trees
            .len()
            .checked_div(self.n_groups as usize)
            .unwrap_or(0)
    }

    #[inline]
    pub fn average_output(&self) -> bool {
        self.average_output
    }

    #[inline]
    pub fn tree(&self, idx: usize) -> &Tree {
        &self.trees[idx]
    }

    /// Output group of tree `idx`.
    #[inline]
    pub fn tree_group(&self, idx: usize) -> u32 {
        idx.checked_rem(self.n_groups as usize).unwrap_or(0) as u32
    }

    pub fn trees(&self) -> impl Iterator<Item = &Tree> {
        self.trees.iter()
    }

    /// Iterate over trees with their group assignments.
    pub fn trees_with_groups(&self) -> impl Iterator<Item = (&Tree, u32)> {
        self.trees
            .iter()
            .enumerate()
            .map(|(i, t)| (t, self.tree_group(i)))
    }

    /// Clamp a requested round count: 0, or more than available, means all.
    #[inline]
    pub fn resolve_rounds(&self, n_rounds: usize) -> usize {
        let all = self.n_rounds();
        if n_rounds == 0 || n_rounds > all {
            all
        } else {
            n_rounds
        }
    }

    /// Weight applied to every tree output when `n_rounds` rounds are used.
    #[inline]
    pub fn round_coef(&self, n_rounds: usize) -> f64 {
        if self.average_output && n_rounds > 0 {
            1.0 / n_rounds as f64
        } else {
            1.0
        }
    }

    /// Sum the raw outputs of the first `n_rounds` rounds into `output[..n_groups]`.
    ///
    /// `n_rounds` is used as given (see [`resolve_rounds`](Self::resolve_rounds)).
    /// `features` must cover every split feature and `output` must hold at
    /// least `n_groups` values.
    pub fn predict_raw_into(&self, features: &[f64], n_rounds: usize, output: &mut [f64]) {
        let n_groups = self.n_groups as usize;
        let output = &mut output[..n_groups];
        output.fill(0.0);
        if n_groups == 0 {
            return;
        }

        let coef = self.round_coef(n_rounds);
        for round in self.trees[..n_rounds * n_groups].chunks_exact(n_groups) {
            for (out, tree) in output.iter_mut().zip(round) {
                *out += tree.predict(features) * coef;
            }
        }
    }

    /// Raw outputs of all rounds for one row.
    pub fn predict_row(&self, features: &[f64]) -> Vec<f64> {
        let mut output = vec![0.0; self.n_groups as usize];
        self.predict_raw_into(features, self.n_rounds(), &mut output);
        output
    }

    /// Write the reached leaf index of every tree in the first `n_rounds` rounds.
    ///
    /// Indices are in tree order; `output` must hold `n_rounds * n_groups` values.
    pub fn leaf_indices_into(&self, features: &[f64], n_rounds: usize, output: &mut [u32]) {
        let n_trees = n_rounds * self.n_groups as usize;
        for (out, tree) in output[..n_trees].iter_mut().zip(&self.trees) {
            *out = tree.leaf_index(features);
        }
    }
}
