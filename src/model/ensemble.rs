//! Loaded GBDT ensemble.
//!
//! High-level wrapper around [`Forest`] with model metadata, the output
//! transform, and the single-row prediction surface.

use std::fmt;

use ndarray::{Array2, ArrayView2};

use crate::forest::Forest;
use crate::predict::{PredictConfig, PredictError, PredictionOutput, Predictor};

use super::transform::OutputTransform;

/// Errors raised when assembling an [`Ensemble`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("tree {tree} splits on feature {feature}, model has {n_features} features")]
    SplitFeatureOutOfRange {
        tree: usize,
        feature: u32,
        n_features: usize,
    },

    #[error("forest has no output groups")]
    NoOutputGroups,

    #[error("{n_trees} trees do not fill whole rounds of {n_groups} groups")]
    IncompleteRound { n_trees: usize, n_groups: u32 },

    #[error("{n_names} feature names given for {n_features} features")]
    FeatureNamesMismatch { n_names: usize, n_features: usize },
}

/// An immutable, loaded tree ensemble.
///
/// Built once by a loader, then shared read-only. All prediction methods take
/// `&self` and caller-owned buffers, so one `Ensemble` can serve any number
/// of threads at once.
///
/// # Example
///
/// ```ignore
/// use leafcast::compat::lightgbm;
///
/// let model = lightgbm::load_text_file("model.txt", true)?;
/// let score = model.predict_single(&features, 0)?;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Ensemble {
    forest: Forest,
    n_features: usize,
    name: String,
    feature_names: Vec<String>,
    transform: OutputTransform,
}

impl Ensemble {
    /// Assemble an ensemble, checking the forest against the feature count.
    pub fn new(
        forest: Forest,
        n_features: usize,
        transform: OutputTransform,
    ) -> Result<Self, ModelError> {
        if forest.n_groups() == 0 {
            return Err(ModelError::NoOutputGroups);
        }
        if forest.n_trees() % forest.n_groups() as usize != 0 {
            return Err(ModelError::IncompleteRound {
                n_trees: forest.n_trees(),
                n_groups: forest.n_groups(),
            });
        }
        for (tree_idx, tree) in forest.trees().enumerate() {
            if let Some(feature) = tree.max_split_feature() {
                if feature as usize >= n_features {
                    return Err(ModelError::SplitFeatureOutOfRange {
                        tree: tree_idx,
                        feature,
                        n_features,
                    });
                }
            }
        }
        Ok(Self {
            forest,
            n_features,
            name: String::new(),
            feature_names: Vec::new(),
            transform,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Attach feature names; an empty list clears them.
    pub fn with_feature_names(mut self, names: Vec<String>) -> Result<Self, ModelError> {
        if !names.is_empty() && names.len() != self.n_features {
            return Err(ModelError::FeatureNamesMismatch {
                n_names: names.len(),
                n_features: self.n_features,
            });
        }
        self.feature_names = names;
        Ok(self)
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    /// Number of boosting rounds.
    #[inline]
    pub fn n_estimators(&self) -> usize {
        self.forest.n_rounds()
    }

    #[inline]
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Number of values produced per row.
    #[inline]
    pub fn n_output_groups(&self) -> usize {
        self.transform.n_outputs(self.n_raw_output_groups())
    }

    /// Number of trees per boosting round.
    #[inline]
    pub fn n_raw_output_groups(&self) -> usize {
        self.forest.n_groups() as usize
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    #[inline]
    pub fn transform(&self) -> OutputTransform {
        self.transform
    }

    #[inline]
    pub fn forest(&self) -> &Forest {
        &self.forest
    }

    // =========================================================================
    // Prediction
    // =========================================================================

    /// Predict one row into `output[..n_output_groups]`.
    ///
    /// Uses the first `n_estimators` rounds; `0` means all of them.
    pub fn predict(
        &self,
        features: &[f64],
        n_estimators: usize,
        output: &mut [f64],
    ) -> Result<(), PredictError> {
        self.check_features(features)?;
        let n_outputs = self.n_output_groups();
        if output.len() < n_outputs {
            return Err(PredictError::OutputTooSmall {
                expected: n_outputs,
                actual: output.len(),
            });
        }
        let n_rounds = self.forest.resolve_rounds(n_estimators);
        self.forest.predict_raw_into(features, n_rounds, output);
        self.transform.transform_row(&mut output[..n_outputs]);
        Ok(())
    }

    /// Predict one output group of one row with all rounds.
    pub fn predict_single(&self, features: &[f64], output_group: usize) -> Result<f64, PredictError> {
        let n_groups = self.n_output_groups();
        if output_group >= n_groups {
            return Err(PredictError::InvalidOutputGroup {
                group: output_group,
                n_groups,
            });
        }
        let mut output = vec![0.0; n_groups];
        self.predict(features, 0, &mut output)?;
        Ok(output[output_group])
    }

    /// Predict a row-major `n_rows x n_cols` matrix into `output`.
    ///
    /// See [`Predictor::predict_into`] for the layout of `output`.
    pub fn predict_dense(
        &self,
        values: &[f64],
        n_rows: usize,
        n_cols: usize,
        output: &mut [f64],
        config: &PredictConfig,
    ) -> Result<(), PredictError> {
        Predictor::new(self).predict_into(values, n_rows, n_cols, output, config)
    }

    /// Predict a row-major matrix into a freshly allocated [`PredictionOutput`].
    pub fn predict_rows(
        &self,
        values: &[f64],
        n_rows: usize,
        n_cols: usize,
        config: &PredictConfig,
    ) -> Result<PredictionOutput, PredictError> {
        Predictor::new(self).predict(values, n_rows, n_cols, config)
    }

    /// Predict an `(n_rows, n_features)` array.
    pub fn predict_array(
        &self,
        features: ArrayView2<'_, f64>,
        config: &PredictConfig,
    ) -> Result<Array2<f64>, PredictError> {
        Predictor::new(self).predict_array(features, config)
    }

    /// Write the leaf index reached in every tree of the first `n_estimators` rounds.
    ///
    /// Indices are written in tree order, `rounds * n_raw_output_groups`
    /// entries; `0` rounds means all. Returns the number of entries written.
    pub fn predict_leaf_indices(
        &self,
        features: &[f64],
        n_estimators: usize,
        indexes: &mut [u32],
    ) -> Result<usize, PredictError> {
        self.check_features(features)?;
        let n_rounds = self.forest.resolve_rounds(n_estimators);
        let n_trees = n_rounds * self.n_raw_output_groups();
        if indexes.len() < n_trees {
            return Err(PredictError::OutputTooSmall {
                expected: n_trees,
                actual: indexes.len(),
            });
        }
        self.forest.leaf_indices_into(features, n_rounds, indexes);
        Ok(n_trees)
    }

    /// Allocating variant of [`predict_leaf_indices`](Self::predict_leaf_indices).
    pub fn leaf_indices(&self, features: &[f64], n_estimators: usize) -> Result<Vec<u32>, PredictError> {
        let n_rounds = self.forest.resolve_rounds(n_estimators);
        let mut indexes = vec![0; n_rounds * self.n_raw_output_groups()];
        self.predict_leaf_indices(features, n_rounds, &mut indexes)?;
        Ok(indexes)
    }

    fn check_features(&self, features: &[f64]) -> Result<(), PredictError> {
        if features.len() < self.n_features {
            return Err(PredictError::FeatureCountMismatch {
                expected: self.n_features,
                actual: features.len(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Ensemble {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Ensemble(name={}, rounds={}, groups={}, features={}, transform={})",
            self.name,
            self.n_estimators(),
            self.n_raw_output_groups(),
            self.n_features,
            self.transform
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trees::{ChildRef, MissingType, Tree, TreeBuilder};
    use approx::assert_abs_diff_eq;

    fn stump(feature: u32, threshold: f64, left: f64, right: f64) -> Tree {
        let mut builder = TreeBuilder::new();
        builder.add_numeric(feature, threshold, false, MissingType::None, ChildRef::Leaf(0), ChildRef::Leaf(1));
        builder.build(vec![left, right]).unwrap()
    }

    fn binary_model(transform: OutputTransform) -> Ensemble {
        let mut forest = Forest::for_regression();
        forest.push_tree(stump(0, 0.0, -1.0, 1.0));
        forest.push_tree(stump(1, 0.0, -0.5, 0.5));
        Ensemble::new(forest, 2, transform).unwrap().with_name("test")
    }

    #[test]
    fn zero_output_groups_rejected() {
        let err = Ensemble::new(Forest::new(0), 1, OutputTransform::Raw).unwrap_err();
        assert_eq!(err, ModelError::NoOutputGroups);

        let mut forest = Forest::new(0);
        forest.push_tree(stump(0, 0.0, -1.0, 1.0));
        assert_eq!(forest.n_rounds(), 0);
        let err = Ensemble::new(forest, 1, OutputTransform::Raw).unwrap_err();
        assert_eq!(err, ModelError::NoOutputGroups);
    }

    #[test]
    fn metadata() {
        let model = binary_model(OutputTransform::Raw);
        assert_eq!(model.n_estimators(), 2);
        assert_eq!(model.n_features(), 2);
        assert_eq!(model.n_output_groups(), 1);
        assert_eq!(model.n_raw_output_groups(), 1);
        assert_eq!(model.name(), "test");
        assert!(model.feature_names().is_empty());
    }

    #[test]
    fn raw_and_transformed() {
        let raw = binary_model(OutputTransform::Raw);
        assert_eq!(raw.predict_single(&[1.0, 1.0], 0).unwrap(), 1.5);

        let prob = binary_model(OutputTransform::Sigmoid { scale: 1.0 });
        let p = prob.predict_single(&[1.0, 1.0], 0).unwrap();
        assert_abs_diff_eq!(p, 1.0 / (1.0 + (-1.5f64).exp()), epsilon = 1e-12);
    }

    #[test]
    fn first_round_matches_first_tree() {
        let model = binary_model(OutputTransform::Raw);
        let row = [1.0, -1.0];
        let mut out = [0.0];
        model.predict(&row, 1, &mut out).unwrap();
        assert_eq!(out[0], model.forest().tree(0).predict(&row));
    }

    #[test]
    fn leaf_indices_follow_tree_order() {
        let model = binary_model(OutputTransform::Raw);
        assert_eq!(model.leaf_indices(&[1.0, -1.0], 0).unwrap(), vec![1, 0]);
        assert_eq!(model.leaf_indices(&[1.0, -1.0], 1).unwrap(), vec![1]);

        let mut buf = [0u32; 1];
        let err = model.predict_leaf_indices(&[1.0, -1.0], 0, &mut buf).unwrap_err();
        assert!(matches!(err, PredictError::OutputTooSmall { expected: 2, actual: 1 }));
    }

    #[test]
    fn argument_errors() {
        let model = binary_model(OutputTransform::Raw);
        assert!(matches!(
            model.predict_single(&[0.0], 0),
            Err(PredictError::FeatureCountMismatch { expected: 2, actual: 1 })
        ));
        assert!(matches!(
            model.predict_single(&[0.0, 0.0], 1),
            Err(PredictError::InvalidOutputGroup { group: 1, n_groups: 1 })
        ));
        let mut empty: [f64; 0] = [];
        assert!(matches!(
            model.predict(&[0.0, 0.0], 0, &mut empty),
            Err(PredictError::OutputTooSmall { .. })
        ));
    }

    #[test]
    fn rejects_inconsistent_forests() {
        let mut forest = Forest::for_regression();
        forest.push_tree(stump(3, 0.0, 0.0, 1.0));
        assert_eq!(
            Ensemble::new(forest, 2, OutputTransform::Raw),
            Err(ModelError::SplitFeatureOutOfRange { tree: 0, feature: 3, n_features: 2 })
        );

        let mut forest = Forest::new(2);
        forest.push_tree(Tree::single_leaf(0.0));
        assert!(matches!(
            Ensemble::new(forest, 1, OutputTransform::Raw),
            Err(ModelError::IncompleteRound { n_trees: 1, n_groups: 2 })
        ));

        let model = binary_model(OutputTransform::Raw);
        assert!(model.with_feature_names(vec!["a".into()]).is_err());
    }

    #[test]
    fn ensemble_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Ensemble>();
    }
}
