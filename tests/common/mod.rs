//! Test case loading utilities for integration tests.
//!
//! Test cases live next to their models under `tests/test-cases/lightgbm`:
//! a `<name>.cases.json` file holds input rows and the expected outputs.
//! For assertion helpers, use `leafcast::testing`.

#![allow(dead_code)]

use std::fs::File;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

#[allow(unused_imports)]
pub use leafcast::assert_approx_eq;
#[allow(unused_imports)]
pub use leafcast::testing::{assert_predictions_match, assert_slice_approx_eq, DEFAULT_TOLERANCE};

/// Directory holding the LightGBM models and their test cases.
pub fn lightgbm_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/test-cases/lightgbm")
}

/// Path of a LightGBM fixture file.
pub fn lightgbm_path(name: &str) -> PathBuf {
    lightgbm_dir().join(name)
}

/// Load a JSON file and deserialize it.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> T {
    let file =
        File::open(path).unwrap_or_else(|e| panic!("Failed to open {}: {e}", path.display()));
    serde_json::from_reader(file)
        .unwrap_or_else(|e| panic!("Failed to parse {}: {e}", path.display()))
}

/// Input rows plus expected outputs for one model.
///
/// `null` entries in `features` stand for missing values (NaN).
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "E: Deserialize<'de>"))]
pub struct TestCases<E> {
    pub model: String,
    pub num_features: usize,
    pub features: Vec<Vec<Option<f64>>>,
    pub expected: E,
    #[serde(default)]
    pub expected_raw: Option<E>,
    #[serde(default)]
    pub expected_first_round: Option<E>,
}

impl<E: DeserializeOwned> TestCases<E> {
    pub fn load(name: &str) -> Self {
        load_json(&lightgbm_path(&format!("{name}.cases.json")))
    }
}

impl<E> TestCases<E> {
    pub fn model_path(&self) -> PathBuf {
        lightgbm_path(&self.model)
    }

    pub fn num_rows(&self) -> usize {
        self.features.len()
    }

    /// Rows with `null` replaced by NaN.
    pub fn rows(&self) -> Vec<Vec<f64>> {
        self.features
            .iter()
            .map(|row| row.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
            .collect()
    }

    /// All rows flattened into a row-major buffer.
    pub fn dense(&self) -> Vec<f64> {
        self.rows().into_iter().flatten().collect()
    }
}
