//! Block-based batch predictor.
//!
//! [`Predictor`] drives an [`Ensemble`] over a row-major dense matrix. Rows are
//! processed in blocks: every tree of the requested rounds visits all rows of a
//! block before the next tree is touched, so a tree's nodes stay hot in cache
//! while the block is scored. Blocks are independent and are sharded across
//! rayon workers when more than one thread is requested.

use std::ops::Range;

use bon::Builder;
use ndarray::{Array2, ArrayView2};

use crate::model::Ensemble;
use crate::utils::{run_with_threads, Parallelism};

use super::output::PredictionOutput;

/// Default block size for batch processing.
pub const DEFAULT_BLOCK_SIZE: usize = 64;

// =============================================================================
// PredictError
// =============================================================================

/// Errors raised by the prediction surface.
///
/// All of them are shape or argument errors detected before any tree is
/// evaluated; prediction itself cannot fail.
#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    #[error("feature vector has {actual} values, model needs at least {expected}")]
    FeatureCountMismatch { expected: usize, actual: usize },

    #[error("output buffer has {actual} slots, {expected} required")]
    OutputTooSmall { expected: usize, actual: usize },

    #[error("dense input has {len} values, expected {n_rows} rows x {n_cols} columns")]
    ShapeMismatch {
        len: usize,
        n_rows: usize,
        n_cols: usize,
    },

    #[error("output group {group} out of range, model has {n_groups} groups")]
    InvalidOutputGroup { group: usize, n_groups: usize },

    #[error("output group range {start}..{end} invalid, model has {n_groups} groups")]
    InvalidOutputRange {
        start: usize,
        end: usize,
        n_groups: usize,
    },

    #[error("failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

// =============================================================================
// PredictConfig
// =============================================================================

/// Options for batch prediction.
///
/// # Example
///
/// ```
/// use leafcast::predict::PredictConfig;
///
/// // All rounds, sequential, every output group
/// let config = PredictConfig::default();
/// assert_eq!(config.n_threads, 1);
///
/// // First 10 rounds on 4 threads, second output group only
/// let config = PredictConfig::builder()
///     .n_estimators(10)
///     .n_threads(4)
///     .output_groups(1..2)
///     .build();
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
#[builder(derive(Clone, Debug))]
pub struct PredictConfig {
    /// Number of boosting rounds to use. `0` means all.
    #[builder(default)]
    pub n_estimators: usize,

    /// Worker threads: `1` sequential, `0` the global rayon pool, `n` a dedicated pool.
    #[builder(default = 1)]
    pub n_threads: usize,

    /// Output groups to write per row. `None` writes all of them.
    pub output_groups: Option<Range<usize>>,

    /// Rows scored together per block. Default: 64.
    #[builder(default = DEFAULT_BLOCK_SIZE)]
    pub block_size: usize,
}

impl Default for PredictConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl PredictConfig {
    /// Resolve the output group range against a model's group count.
    pub fn resolve_groups(&self, n_groups: usize) -> Result<Range<usize>, PredictError> {
        match &self.output_groups {
            None => Ok(0..n_groups),
            Some(range) if range.start < range.end && range.end <= n_groups => Ok(range.clone()),
            Some(range) => Err(PredictError::InvalidOutputRange {
                start: range.start,
                end: range.end,
                n_groups,
            }),
        }
    }
}

// =============================================================================
// Predictor
// =============================================================================

/// Batch predictor over a borrowed [`Ensemble`].
#[derive(Debug, Clone, Copy)]
pub struct Predictor<'m> {
    ensemble: &'m Ensemble,
}

impl<'m> Predictor<'m> {
    pub fn new(ensemble: &'m Ensemble) -> Self {
        Self { ensemble }
    }

    #[inline]
    pub fn ensemble(&self) -> &'m Ensemble {
        self.ensemble
    }

    /// Predict a row-major `n_rows x n_cols` matrix into `output`.
    ///
    /// Each row writes `groups.len()` values, where `groups` is the resolved
    /// `config.output_groups`. Row `r` starts at `output[r * groups.len()]`.
    pub fn predict_into(
        &self,
        values: &[f64],
        n_rows: usize,
        n_cols: usize,
        output: &mut [f64],
        config: &PredictConfig,
    ) -> Result<(), PredictError> {
        check_shape(values, n_rows, n_cols)?;
        let n_features = self.ensemble.n_features();
        if n_cols < n_features {
            return Err(PredictError::FeatureCountMismatch {
                expected: n_features,
                actual: n_cols,
            });
        }
        let groups = config.resolve_groups(self.ensemble.n_output_groups())?;
        let stride = groups.len();
        let required = n_rows
            .checked_mul(stride)
            .ok_or(PredictError::ShapeMismatch {
                len: values.len(),
                n_rows,
                n_cols,
            })?;
        if output.len() < required {
            return Err(PredictError::OutputTooSmall {
                expected: required,
                actual: output.len(),
            });
        }
        if n_rows == 0 {
            return Ok(());
        }

        let n_rounds = self.ensemble.forest().resolve_rounds(config.n_estimators);
        let block_size = config.block_size.max(1);
        let output = &mut output[..required];

        run_with_threads(config.n_threads, |parallelism: Parallelism| {
            parallelism.maybe_par_chunks_mut(output, block_size.saturating_mul(stride), |block_idx, out_block| {
                let first_row = block_idx * block_size;
                let block_rows = out_block.len() / stride;
                let block_values = &values[first_row * n_cols..(first_row + block_rows) * n_cols];
                self.predict_block(block_values, n_cols, n_rounds, &groups, out_block);
            });
        })?;
        Ok(())
    }

    /// Predict a row-major matrix into a freshly allocated output.
    pub fn predict(
        &self,
        values: &[f64],
        n_rows: usize,
        n_cols: usize,
        config: &PredictConfig,
    ) -> Result<PredictionOutput, PredictError> {
        check_shape(values, n_rows, n_cols)?;
        let groups = config.resolve_groups(self.ensemble.n_output_groups())?;
        let mut output = PredictionOutput::zeros(n_rows, groups.len());
        self.predict_into(values, n_rows, n_cols, output.as_mut_slice(), config)?;
        Ok(output)
    }

    /// Predict an `(n_rows, n_cols)` array, returning `(n_rows, n_groups)`.
    pub fn predict_array(
        &self,
        features: ArrayView2<'_, f64>,
        config: &PredictConfig,
    ) -> Result<Array2<f64>, PredictError> {
        let (n_rows, n_cols) = features.dim();
        let owned: Vec<f64>;
        let values = match features.as_slice() {
            Some(values) => values,
            None => {
                owned = features.iter().copied().collect();
                &owned
            }
        };
        Ok(self.predict(values, n_rows, n_cols, config)?.into_array())
    }

    /// Score one block of rows. `out_block` holds `groups.len()` values per row.
    fn predict_block(
        &self,
        values: &[f64],
        n_cols: usize,
        n_rounds: usize,
        groups: &Range<usize>,
        out_block: &mut [f64],
    ) {
        let forest = self.ensemble.forest();
        let n_raw = forest.n_groups() as usize;
        let stride = groups.len();
        let n_rows = out_block.len() / stride;
        let coef = forest.round_coef(n_rounds);

        let mut raw = vec![0.0; n_rows * n_raw];
        for (tree, group) in forest.trees_with_groups().take(n_rounds * n_raw) {
            let group = group as usize;
            for row_idx in 0..n_rows {
                let row = &values[row_idx * n_cols..(row_idx + 1) * n_cols];
                raw[row_idx * n_raw + group] += tree.predict(row) * coef;
            }
        }

        let transform = self.ensemble.transform();
        for (raw_row, out_row) in raw.chunks_exact_mut(n_raw).zip(out_block.chunks_exact_mut(stride)) {
            transform.transform_row(raw_row);
            out_row.copy_from_slice(&raw_row[groups.clone()]);
        }
    }
}

/// `values` must hold exactly `n_rows * n_cols` entries.
fn check_shape(values: &[f64], n_rows: usize, n_cols: usize) -> Result<(), PredictError> {
    match n_rows.checked_mul(n_cols) {
        Some(len) if len == values.len() => Ok(()),
        _ => Err(PredictError::ShapeMismatch {
            len: values.len(),
            n_rows,
            n_cols,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forest::Forest;
    use crate::model::OutputTransform;
    use crate::trees::{ChildRef, MissingType, Tree, TreeBuilder};
    use approx::assert_abs_diff_eq;

    fn stump(feature: u32, threshold: f64, left: f64, right: f64) -> Tree {
        let mut builder = TreeBuilder::new();
        builder.add_numeric(feature, threshold, false, MissingType::None, ChildRef::Leaf(0), ChildRef::Leaf(1));
        builder.build(vec![left, right]).unwrap()
    }

    /// Two features, two rounds, value = [f0 > 0.5] + 10 * [f1 > 0.5].
    fn regression_model() -> Ensemble {
        let mut forest = Forest::for_regression();
        forest.push_tree(stump(0, 0.5, 0.0, 1.0));
        forest.push_tree(stump(1, 0.5, 0.0, 10.0));
        Ensemble::new(forest, 2, OutputTransform::Raw).unwrap()
    }

    fn three_class_model() -> Ensemble {
        let mut forest = Forest::new(3);
        forest.push_tree(stump(0, 0.5, 1.0, 0.0));
        forest.push_tree(stump(0, 0.5, 0.0, 1.0));
        forest.push_tree(Tree::single_leaf(0.5));
        Ensemble::new(forest, 1, OutputTransform::Softmax).unwrap()
    }

    #[test]
    fn dense_matches_single_row() {
        let model = regression_model();
        let values = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let out = Predictor::new(&model)
            .predict(&values, 4, 2, &PredictConfig::default())
            .unwrap();
        assert_eq!(out.as_slice(), &[0.0, 1.0, 10.0, 11.0]);
    }

    #[test]
    fn first_round_only() {
        let model = regression_model();
        let config = PredictConfig::builder().n_estimators(1).build();
        let out = Predictor::new(&model).predict(&[1.0, 1.0], 1, 2, &config).unwrap();
        assert_eq!(out.as_slice(), &[1.0]);
    }

    #[test]
    fn extra_columns_are_ignored() {
        let model = regression_model();
        let values = [1.0, 1.0, 99.0, 0.0, 1.0, -99.0];
        let out = Predictor::new(&model)
            .predict(&values, 2, 3, &PredictConfig::default())
            .unwrap();
        assert_eq!(out.as_slice(), &[11.0, 10.0]);
    }

    #[test]
    fn blocks_and_threads_agree() {
        let model = regression_model();
        let n_rows = 301;
        let values: Vec<f64> = (0..n_rows * 2).map(|i| ((i * 7) % 5) as f64 / 4.0).collect();

        let expected = Predictor::new(&model)
            .predict(&values, n_rows, 2, &PredictConfig::default())
            .unwrap();
        for (n_threads, block_size) in [(1, 7), (2, 64), (4, 1), (0, 16)] {
            let config = PredictConfig::builder()
                .n_threads(n_threads)
                .block_size(block_size)
                .build();
            let out = Predictor::new(&model).predict(&values, n_rows, 2, &config).unwrap();
            assert_eq!(out, expected, "n_threads={n_threads} block_size={block_size}");
        }
    }

    #[test]
    fn transform_applied_before_group_selection() {
        let model = three_class_model();
        let all = Predictor::new(&model)
            .predict(&[0.0], 1, 1, &PredictConfig::default())
            .unwrap();
        assert_abs_diff_eq!(all.row(0).iter().sum::<f64>(), 1.0, epsilon = 1e-12);

        let config = PredictConfig::builder().output_groups(1..3).build();
        let subset = Predictor::new(&model).predict(&[0.0], 1, 1, &config).unwrap();
        assert_eq!(subset.shape(), (1, 2));
        assert_eq!(subset.row(0), &all.row(0)[1..3]);
    }

    #[test]
    fn array_input_handles_non_contiguous_views() {
        let model = regression_model();
        let columns_first = Array2::from_shape_vec((2, 3), vec![0.0, 1.0, 1.0, 1.0, 0.0, 1.0]).unwrap();
        let rows = columns_first.t();
        let out = Predictor::new(&model)
            .predict_array(rows, &PredictConfig::default())
            .unwrap();
        assert_eq!(out.dim(), (3, 1));
        assert_eq!(out.column(0).to_vec(), vec![10.0, 1.0, 11.0]);
    }

    #[test]
    fn shape_errors() {
        let model = regression_model();
        let predictor = Predictor::new(&model);
        let config = PredictConfig::default();

        let err = predictor.predict(&[0.0; 5], 2, 2, &config).unwrap_err();
        assert!(matches!(err, PredictError::ShapeMismatch { len: 5, .. }));

        let err = predictor.predict(&[0.0; 2], 2, 1, &config).unwrap_err();
        assert!(matches!(err, PredictError::FeatureCountMismatch { expected: 2, actual: 1 }));

        let mut small = [0.0; 1];
        let err = predictor.predict_into(&[0.0; 4], 2, 2, &mut small, &config).unwrap_err();
        assert!(matches!(err, PredictError::OutputTooSmall { expected: 2, actual: 1 }));

        let bad = PredictConfig::builder().output_groups(0..2).build();
        let err = predictor.predict(&[0.0; 2], 1, 2, &bad).unwrap_err();
        assert!(matches!(err, PredictError::InvalidOutputRange { end: 2, n_groups: 1, .. }));
    }

    #[test]
    fn overflowing_row_count_is_a_shape_error() {
        let model = regression_model();
        let predictor = Predictor::new(&model);
        let config = PredictConfig::default();

        let err = predictor.predict(&[0.0; 4], usize::MAX, 2, &config).unwrap_err();
        assert!(matches!(err, PredictError::ShapeMismatch { len: 4, n_rows: usize::MAX, n_cols: 2 }));

        let mut out = [0.0; 2];
        let err = predictor
            .predict_into(&[0.0; 4], usize::MAX / 2 + 1, 2, &mut out, &config)
            .unwrap_err();
        assert!(matches!(err, PredictError::ShapeMismatch { len: 4, .. }));
    }

    #[test]
    fn zero_rows() {
        let model = regression_model();
        let out = Predictor::new(&model)
            .predict(&[], 0, 2, &PredictConfig::default())
            .unwrap();
        assert_eq!(out.shape(), (0, 1));
    }
}
