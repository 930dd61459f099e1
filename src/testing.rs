//! Testing utilities for leafcast.
//!
//! Assertion helpers shared by unit tests and integration tests.
//!
//! ```ignore
//! use leafcast::testing::{assert_predictions_match, DEFAULT_TOLERANCE};
//! ```

use crate::predict::PredictionOutput;
use approx::AbsDiffEq;

/// Default tolerance for floating point comparisons.
/// This is appropriate for most predictions where values are O(1).
pub const DEFAULT_TOLERANCE: f64 = 1e-7;

/// Assert that two f64 values are approximately equal.
///
/// # Examples
///
/// ```
/// # use leafcast::assert_approx_eq;
/// assert_approx_eq!(1.0, 1.0001, 0.001);
/// ```
///
/// # Panics
///
/// Panics if the absolute difference exceeds tolerance.
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $tolerance:expr) => {{
        let left_val: f64 = $left;
        let right_val: f64 = $right;
        let tol: f64 = $tolerance;
        let diff = (left_val - right_val).abs();
        if !(diff <= tol) && left_val.to_bits() != right_val.to_bits() {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`\n right: `{:?}`\n  diff: `{:?}` > tolerance `{:?}`",
                left_val, right_val, diff, tol
            );
        }
    }};
    ($left:expr, $right:expr, $tolerance:expr, $($arg:tt)+) => {{
        let left_val: f64 = $left;
        let right_val: f64 = $right;
        let tol: f64 = $tolerance;
        let diff = (left_val - right_val).abs();
        if !(diff <= tol) && left_val.to_bits() != right_val.to_bits() {
            panic!(
                "assertion failed: `(left ≈ right)` - {}\n  left: `{:?}`\n right: `{:?}`\n  diff: `{:?}` > tolerance `{:?}`",
                format_args!($($arg)+), left_val, right_val, diff, tol
            );
        }
    }};
}

/// Assert that two slices are approximately equal element-wise.
///
/// # Panics
///
/// Panics if lengths differ or any element differs by more than tolerance.
pub fn assert_slice_approx_eq(actual: &[f64], expected: &[f64], tolerance: f64, context: &str) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "{context}: length mismatch - got {}, expected {}",
        actual.len(),
        expected.len()
    );

    for (i, (a, e)) in actual.iter().zip(expected.iter()).enumerate() {
        assert!(
            a.abs_diff_eq(e, tolerance),
            "{context}[{i}]: {a} ≠ {e} (diff={}, tolerance={tolerance})",
            (a - e).abs()
        );
    }
}

/// Git-style diff between expected and actual predictions, differing rows only.
fn diff_predictions(actual: &PredictionOutput, expected: &PredictionOutput, epsilon: f64) -> String {
    let mut result = String::new();
    let (rows, cols) = actual.shape();
    result.push_str(&format!("Shape: ({rows}, {cols})\n"));
    result.push_str(&format!("Epsilon: {epsilon:.0e}\n\n"));

    for (i, (act_row, exp_row)) in actual.rows().zip(expected.rows()).enumerate() {
        let row_differs = act_row
            .iter()
            .zip(exp_row.iter())
            .any(|(a, e)| !a.abs_diff_eq(e, epsilon));
        if !row_differs {
            continue;
        }

        result.push_str(&format!("[{i:3}] -"));
        for val in exp_row {
            result.push_str(&format!(" {val:>12.8}"));
        }
        result.push_str("  (expected)\n      +");
        for val in act_row {
            result.push_str(&format!(" {val:>12.8}"));
        }
        result.push_str("  (actual)\n      Δ");
        for (a, e) in act_row.iter().zip(exp_row.iter()) {
            if a.abs_diff_eq(e, epsilon) {
                result.push_str(&format!(" {:>12}", "-"));
            } else {
                result.push_str(&format!(" {:>+12.2e}", a - e));
            }
        }
        result.push('\n');
    }

    result
}

/// Assert that two [`PredictionOutput`]s are approximately equal.
///
/// On failure, shows a git-style diff of differing rows.
///
/// # Panics
///
/// Panics if shapes differ or if any value differs by more than `epsilon`.
pub fn assert_predictions_eq(
    actual: &PredictionOutput,
    expected: &PredictionOutput,
    epsilon: f64,
    context: &str,
) {
    if actual.shape() != expected.shape() {
        panic!(
            "\n{context}: shape mismatch\n- {:?}  (expected)\n+ {:?}  (actual)\n",
            expected.shape(),
            actual.shape()
        );
    }

    let diff_count = actual
        .as_slice()
        .iter()
        .zip(expected.as_slice())
        .filter(|(a, e)| !a.abs_diff_eq(e, epsilon))
        .count();
    if diff_count > 0 {
        let total = actual.as_slice().len();
        let diff_output = diff_predictions(actual, expected, epsilon);
        panic!("\n{context}: {diff_count}/{total} values differ\n\n{diff_output}");
    }
}

/// Assert that a batch of predictions matches expected rows.
///
/// # Panics
///
/// Panics if shapes differ or if any value differs by more than tolerance.
pub fn assert_predictions_match(
    actual: &PredictionOutput,
    expected: &[Vec<f64>],
    tolerance: f64,
    context: &str,
) {
    let n_groups = expected.first().map_or(actual.n_groups(), Vec::len);
    let flat: Vec<f64> = expected.iter().flatten().copied().collect();
    assert_eq!(
        flat.len(),
        expected.len() * n_groups,
        "{context}: expected rows have uneven lengths"
    );
    let expected_output = PredictionOutput::new(flat, expected.len(), n_groups);
    assert_predictions_eq(actual, &expected_output, tolerance, context);
}
