//! Output transformation for inference.
//!
//! The [`OutputTransform`] enum defines how the summed raw tree outputs of a
//! row are converted to final predictions. It is selected once, when a model
//! is loaded, from the objective recorded in the model file.
//!
//! # Variants
//!
//! - [`Raw`](OutputTransform::Raw): Raw margins were requested, nothing is applied
//! - [`Identity`](OutputTransform::Identity): Objective has no link function (regression, ranking)
//! - [`Sigmoid`](OutputTransform::Sigmoid): Scaled logistic sigmoid (binary, one-vs-all)
//! - [`Softmax`](OutputTransform::Softmax): Softmax across output groups (multiclass)
//! - [`Exp`](OutputTransform::Exp): Exponential (log-link objectives like poisson)

use std::fmt;

/// Inference-time output transformation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum OutputTransform {
    /// Raw margins; no transformation.
    #[default]
    Raw,

    /// No transformation; the objective's output is the margin.
    Identity,

    /// Logistic sigmoid: output = 1 / (1 + exp(-scale * margin)).
    Sigmoid { scale: f64 },

    /// Softmax: output_i = exp(margin_i) / sum(exp(margin_j)).
    Softmax,

    /// Exponential: output = exp(margin).
    Exp,
}

impl OutputTransform {
    /// Number of outputs produced from `n_raw` raw group sums.
    ///
    /// Every supported transform preserves arity.
    #[inline]
    pub fn n_outputs(&self, n_raw: usize) -> usize {
        n_raw
    }

    /// Short lowercase name of the transform.
    pub fn name(&self) -> &'static str {
        match self {
            OutputTransform::Raw => "raw",
            OutputTransform::Identity => "identity",
            OutputTransform::Sigmoid { .. } => "sigmoid",
            OutputTransform::Softmax => "softmax",
            OutputTransform::Exp => "exp",
        }
    }

    /// Apply the transformation in-place to the raw outputs of one row.
    ///
    /// # NaN/Inf Behavior
    ///
    /// NaN and Inf inputs propagate through without panics.
    #[inline]
    pub fn transform_row(&self, row: &mut [f64]) {
        match *self {
            OutputTransform::Raw | OutputTransform::Identity => {}
            OutputTransform::Sigmoid { scale } => {
                for x in row.iter_mut() {
                    *x = sigmoid(scale * *x);
                }
            }
            OutputTransform::Softmax => softmax_inplace(row),
            OutputTransform::Exp => {
                for x in row.iter_mut() {
                    *x = x.exp();
                }
            }
        }
    }
}

impl fmt::Display for OutputTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputTransform::Sigmoid { scale } => write!(f, "sigmoid(scale={scale})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Numerically stable sigmoid.
#[inline]
fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Numerically stable softmax in-place.
/// Subtracts max before exponentiating to avoid overflow.
#[inline]
fn softmax_inplace(row: &mut [f64]) {
    if row.is_empty() {
        return;
    }

    let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    let mut sum = 0.0;
    for x in row.iter_mut() {
        *x = (*x - max).exp();
        sum += *x;
    }

    if sum > 0.0 {
        for x in row.iter_mut() {
            *x /= sum;
        }
    }
}
