//! Prediction output types.

use ndarray::Array2;

/// Prediction output: flat storage with shape metadata.
///
/// Stores predictions in row-major layout.
/// Each row contains `n_groups` values (1 for regression, K for K-class).
///
/// # Memory Layout
///
/// ```text
/// data[row * n_groups + group] = prediction for (row, group)
/// ```
///
/// # Example
///
/// ```
/// use leafcast::predict::PredictionOutput;
///
/// // 3 rows, 2 groups
/// let output = PredictionOutput::new(vec![0.1, -0.2, 0.3, -0.4, 0.5, -0.6], 3, 2);
///
/// assert_eq!(output.row(0), &[0.1, -0.2]);
/// assert_eq!(output.row(1), &[0.3, -0.4]);
/// assert_eq!(output.row(2), &[0.5, -0.6]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionOutput {
    data: Vec<f64>,
    n_rows: usize,
    n_groups: usize,
}

impl PredictionOutput {
    /// Create a new prediction output.
    ///
    /// # Panics
    ///
    /// Panics if `data.len() != n_rows * n_groups`.
    pub fn new(data: Vec<f64>, n_rows: usize, n_groups: usize) -> Self {
        assert_eq!(
            data.len(),
            n_rows * n_groups,
            "Data length {} does not match shape {}x{}",
            data.len(),
            n_rows,
            n_groups
        );
        Self {
            data,
            n_rows,
            n_groups,
        }
    }

    /// Create an output initialized to zeros.
    pub fn zeros(n_rows: usize, n_groups: usize) -> Self {
        Self {
            data: vec![0.0; n_rows * n_groups],
            n_rows,
            n_groups,
        }
    }

    #[inline]
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    #[inline]
    pub fn n_groups(&self) -> usize {
        self.n_groups
    }

    /// Shape as (rows, groups).
    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.n_rows, self.n_groups)
    }

    /// Predictions of a single row.
    ///
    /// # Panics
    ///
    /// Panics if `row_idx >= n_rows`.
    #[inline]
    pub fn row(&self, row_idx: usize) -> &[f64] {
        let start = row_idx * self.n_groups;
        &self.data[start..start + self.n_groups]
    }

    #[inline]
    pub fn row_mut(&mut self, row_idx: usize) -> &mut [f64] {
        let start = row_idx * self.n_groups;
        &mut self.data[start..start + self.n_groups]
    }

    /// Iterate over rows.
    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        self.data.chunks_exact(self.n_groups.max(1))
    }

    /// One group's value for every row (allocates).
    pub fn column(&self, group: usize) -> Vec<f64> {
        self.rows().map(|r| r[group]).collect()
    }

    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }

    /// Convert into an `(n_rows, n_groups)` array without copying.
    pub fn into_array(self) -> Array2<f64> {
        let shape = (self.n_rows, self.n_groups);
        Array2::from_shape_vec(shape, self.data)
            .unwrap_or_else(|_| unreachable!("length checked at construction"))
    }
}
