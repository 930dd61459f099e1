//! leafcast: gradient boosted tree inference for Rust.
//!
//! Loads LightGBM models (text or JSON) into an immutable [`Ensemble`] and
//! evaluates it on single rows or dense row-major batches.
//!
//! # Layout
//!
//! - [`trees`]: flat node arrays and tree traversal
//! - [`forest`]: trees grouped into boosting rounds and output groups
//! - [`model`]: the loaded [`Ensemble`] and its [`OutputTransform`]
//! - [`predict`]: blocked, optionally parallel batch prediction
//! - [`compat`]: LightGBM parsers and converters
//!
//! # Example
//!
//! ```ignore
//! use leafcast::compat::lightgbm;
//! use leafcast::PredictConfig;
//!
//! let model = lightgbm::load_text_file("model.txt", true)?;
//! let output = model.predict_rows(&values, n_rows, n_cols, &PredictConfig::default())?;
//! ```

pub mod compat;
pub mod forest;
pub mod model;
pub mod predict;
pub mod testing;
pub mod trees;
pub mod utils;

pub use compat::lightgbm::LoadError;
pub use forest::Forest;
pub use model::{Ensemble, ModelError, OutputTransform};
pub use predict::{PredictConfig, PredictError, PredictionOutput, Predictor};
pub use trees::{ChildRef, MissingType, Node, NodeFlags, Tree, TreeBuilder};
