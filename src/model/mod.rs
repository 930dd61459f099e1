//! Loaded models.
//!
//! - [`Ensemble`]: a forest plus metadata and its output transform
//! - [`OutputTransform`]: post-processing of summed tree outputs

mod ensemble;
pub mod transform;

pub use ensemble::{Ensemble, ModelError};
pub use transform::OutputTransform;
