//! Batch prediction for tree ensembles.
//!
//! Single rows are scored directly through [`Ensemble`](crate::model::Ensemble).
//! This module provides the batch path: [`Predictor`] walks a row-major dense
//! matrix in blocks of [`DEFAULT_BLOCK_SIZE`] rows, optionally in parallel.
//!
//! # Quick Start
//!
//! ```ignore
//! use leafcast::predict::{PredictConfig, Predictor};
//!
//! let config = PredictConfig::builder().n_threads(0).build();
//! let output = Predictor::new(&model).predict(&values, n_rows, n_cols, &config)?;
//! ```
//!
//! # Output Format
//!
//! Predictions are returned as [`PredictionOutput`], a flat row-major buffer
//! with shape `(n_rows, n_groups)`. For regression, `n_groups = 1`.
//! For multiclass with K classes, `n_groups = K`.

mod output;
mod predictor;

pub use output::PredictionOutput;
pub use predictor::{PredictConfig, PredictError, Predictor, DEFAULT_BLOCK_SIZE};
