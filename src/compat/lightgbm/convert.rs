//! Conversion from LightGBM parsed types to native types.

use tracing::warn;

use crate::forest::Forest;
use crate::model::{Ensemble, ModelError, OutputTransform};
use crate::trees::{ChildRef, Tree, TreeBuilder, TreeValidationError};

use super::text::{DecisionType, LgbModel, LgbObjective, LgbTree};

/// Error type for LightGBM model conversion.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("{field} has {actual} entries, expected {expected}")]
    ArrayLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("invalid child index {child} at node {node}")]
    InvalidChildIndex { node: usize, child: i32 },
    #[error("invalid split feature {feature} at node {node}")]
    InvalidSplitFeature { node: usize, feature: i32 },
    #[error("invalid decision type {bits} at node {node}")]
    InvalidDecisionType { node: usize, bits: u8 },
    #[error("categorical set {threshold} at node {node} out of range ({num_cat} sets)")]
    InvalidCategoryIndex {
        node: usize,
        threshold: f64,
        num_cat: usize,
    },
    #[error("cat_boundaries do not index into cat_threshold")]
    InvalidCategoryBoundaries,
    #[error(transparent)]
    InvalidTree(#[from] TreeValidationError),
    #[error("tree {index}: {source}")]
    InTree {
        index: usize,
        #[source]
        source: Box<ConversionError>,
    },
    #[error("num_tree_per_iteration must be at least 1")]
    NoOutputGroups,
    #[error("no output transform for objective {0}")]
    UnsupportedObjective(String),
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl LgbModel {
    /// Convert to a native [`Ensemble`].
    ///
    /// With `apply_transform` the objective's link function is applied to
    /// predictions; otherwise raw margins are returned.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let model = LgbModel::from_file("model.txt")?;
    /// let ensemble = model.to_ensemble(true)?;
    /// let probability = ensemble.predict_single(&features, 0)?;
    /// ```
    pub fn to_ensemble(&self, apply_transform: bool) -> Result<Ensemble, ConversionError> {
        let n_groups = self.num_groups();
        if n_groups == 0 {
            return Err(ConversionError::NoOutputGroups);
        }

        let mut forest =
            Forest::new(n_groups as u32).with_average_output(self.header.average_output);
        for (index, lgb_tree) in self.trees.iter().enumerate() {
            let tree = lgb_tree.to_tree().map_err(|source| ConversionError::InTree {
                index,
                source: Box::new(source),
            })?;
            forest.push_tree(tree);
        }

        let transform = if apply_transform {
            select_transform(self.header.objective.as_ref(), n_groups)?
        } else {
            OutputTransform::Raw
        };

        let name = if self.header.average_output {
            "lightgbm.rf"
        } else {
            "lightgbm.gbdt"
        };

        let n_features = self.num_features();
        let ensemble = Ensemble::new(forest, n_features, transform)?.with_name(name);

        let names = &self.header.feature_names;
        if !names.is_empty() && names.len() != n_features {
            warn!(
                n_names = names.len(),
                n_features, "ignoring feature names that do not match the feature count"
            );
            return Ok(ensemble);
        }
        Ok(ensemble.with_feature_names(names.clone())?)
    }
}

impl LgbTree {
    /// Convert to a native [`Tree`].
    ///
    /// Categorical thresholds are decoded from `cat_boundaries` /
    /// `cat_threshold` into per-node rules once, here.
    pub fn to_tree(&self) -> Result<Tree, ConversionError> {
        check_len("leaf_value", self.leaf_value.len(), self.num_leaves)?;
        if self.num_leaves == 1 {
            return Ok(Tree::single_leaf(self.leaf_value[0]));
        }

        let n_nodes = self.num_nodes();
        check_len("split_feature", self.split_feature.len(), n_nodes)?;
        check_len("threshold", self.threshold.len(), n_nodes)?;
        check_len("decision_type", self.decision_type.len(), n_nodes)?;
        check_len("left_child", self.left_child.len(), n_nodes)?;
        check_len("right_child", self.right_child.len(), n_nodes)?;

        let mut builder = TreeBuilder::with_capacity(n_nodes);
        for node in 0..n_nodes {
            let bits = self.decision_type[node];
            let dt = DecisionType::from_bits(bits)
                .ok_or(ConversionError::InvalidDecisionType { node, bits })?;

            let feature = self.split_feature[node];
            let feature = u32::try_from(feature)
                .map_err(|_| ConversionError::InvalidSplitFeature { node, feature })?;

            let left = self.child_ref(node, self.left_child[node])?;
            let right = self.child_ref(node, self.right_child[node])?;

            if dt.is_categorical {
                let bitset = self.category_bitset(node)?;
                builder.add_categorical(feature, bitset, dt.default_left, dt.missing_type, left, right);
            } else {
                builder.add_numeric(
                    feature,
                    self.threshold[node],
                    dt.default_left,
                    dt.missing_type,
                    left,
                    right,
                );
            }
        }

        Ok(builder.build(self.leaf_value.clone())?)
    }

    /// Decode a child reference: `c >= 0` is node `c`, `c < 0` is leaf `!c`.
    fn child_ref(&self, node: usize, child: i32) -> Result<ChildRef, ConversionError> {
        let invalid = ConversionError::InvalidChildIndex { node, child };
        if child >= 0 {
            if child as usize >= self.num_nodes() {
                return Err(invalid);
            }
            Ok(ChildRef::Node(child as u32))
        } else {
            let leaf = !child;
            if leaf as usize >= self.num_leaves {
                return Err(invalid);
            }
            Ok(ChildRef::Leaf(leaf as u32))
        }
    }

    /// The left-going category bitset of a categorical node.
    fn category_bitset(&self, node: usize) -> Result<&[u32], ConversionError> {
        let threshold = self.threshold[node];
        let out_of_range = ConversionError::InvalidCategoryIndex {
            node,
            threshold,
            num_cat: self.num_cat,
        };
        if !(threshold >= 0.0 && threshold.fract() == 0.0) {
            return Err(out_of_range);
        }
        let cat_idx = threshold as usize;
        if cat_idx >= self.num_cat {
            return Err(out_of_range);
        }

        let start = self.cat_boundaries.get(cat_idx).copied();
        let end = self.cat_boundaries.get(cat_idx + 1).copied();
        match (start, end) {
            (Some(start), Some(end))
                if start <= end && end as usize <= self.cat_threshold.len() =>
            {
                Ok(&self.cat_threshold[start as usize..end as usize])
            }
            _ => Err(ConversionError::InvalidCategoryBoundaries),
        }
    }
}

fn check_len(field: &'static str, actual: usize, expected: usize) -> Result<(), ConversionError> {
    if actual != expected {
        return Err(ConversionError::ArrayLength {
            field,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Pick the output transform matching a LightGBM objective.
pub fn select_transform(
    objective: Option<&LgbObjective>,
    n_groups: usize,
) -> Result<OutputTransform, ConversionError> {
    let Some(objective) = objective else {
        return Err(ConversionError::UnsupportedObjective("<missing>".to_string()));
    };
    let transform = match objective {
        LgbObjective::Regression(_) | LgbObjective::Ranking(_) => OutputTransform::Identity,
        LgbObjective::LogLink(_) => OutputTransform::Exp,
        LgbObjective::Binary { sigmoid } => OutputTransform::Sigmoid { scale: *sigmoid },
        LgbObjective::CrossEntropy => OutputTransform::Sigmoid { scale: 1.0 },
        LgbObjective::MulticlassOva { sigmoid, .. } => OutputTransform::Sigmoid { scale: *sigmoid },
        LgbObjective::Multiclass { num_class } => {
            if *num_class != n_groups {
                warn!(
                    num_class,
                    n_groups, "multiclass objective disagrees with trees per iteration"
                );
            }
            OutputTransform::Softmax
        }
        LgbObjective::Unknown(name) => {
            return Err(ConversionError::UnsupportedObjective(name.clone()));
        }
    };
    Ok(transform)
}
