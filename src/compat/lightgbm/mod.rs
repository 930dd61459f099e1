//! LightGBM model loading.
//!
//! Two on-disk formats are supported:
//!
//! - the text format written by `save_model()` ([`text`])
//! - the JSON formats: LightGBM's `dump_model()` output and node-id based
//!   dumps that reference children by `nodeid` ([`json`])
//!
//! Both parse into the same [`LgbModel`] intermediate, which [`convert`]
//! turns into a native [`Ensemble`].
//!
//! # Example
//!
//! ```ignore
//! use leafcast::compat::lightgbm;
//!
//! let ensemble = lightgbm::load_text_file("model.txt", true)?;
//! let score = ensemble.predict_single(&[0.5, 1.0, 3.0], 0)?;
//! ```

pub mod convert;
pub mod json;
pub mod text;

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use tracing::{debug, warn};

use crate::model::Ensemble;

pub use convert::{select_transform, ConversionError};
pub use json::{JsonError, MAX_NESTING_DEPTH};
pub use text::{DecisionType, LgbHeader, LgbModel, LgbObjective, LgbTree, ParseError};

/// Format versions written by LightGBM releases this loader was checked against.
const KNOWN_VERSIONS: &[&str] = &["v2", "v3", "v4"];

/// Error type for the one-step loaders.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("text model: {0}")]
    Text(#[from] ParseError),
    #[error("JSON model: {0}")]
    Json(#[from] JsonError),
    #[error("conversion: {0}")]
    Conversion(#[from] ConversionError),
}

/// Load a text model file into an [`Ensemble`].
pub fn load_text_file(path: impl AsRef<Path>, apply_transform: bool) -> Result<Ensemble, LoadError> {
    let path = path.as_ref();
    debug!(path = %path.display(), "loading LightGBM text model");
    let file = File::open(path)?;
    load_text_reader(BufReader::new(file), apply_transform)
}

/// Load a text model from any reader.
pub fn load_text_reader(mut reader: impl Read, apply_transform: bool) -> Result<Ensemble, LoadError> {
    let mut content = String::new();
    reader.read_to_string(&mut content)?;
    load_text_str(&content, apply_transform)
}

/// Load a text model from a string.
pub fn load_text_str(content: &str, apply_transform: bool) -> Result<Ensemble, LoadError> {
    let model = LgbModel::from_string(content)?;
    finish(&model, apply_transform, "text")
}

/// Load a JSON model file into an [`Ensemble`].
pub fn load_json_file(path: impl AsRef<Path>, apply_transform: bool) -> Result<Ensemble, LoadError> {
    let path = path.as_ref();
    debug!(path = %path.display(), "loading LightGBM JSON model");
    let file = File::open(path)?;
    load_json_reader(file, apply_transform)
}

/// Load a JSON model from any reader.
pub fn load_json_reader(reader: impl Read, apply_transform: bool) -> Result<Ensemble, LoadError> {
    let model = LgbModel::from_json_reader(reader)?;
    finish(&model, apply_transform, "json")
}

/// Load a JSON model from a string.
pub fn load_json_str(content: &str, apply_transform: bool) -> Result<Ensemble, LoadError> {
    let model = LgbModel::from_json_str(content)?;
    finish(&model, apply_transform, "json")
}

fn finish(model: &LgbModel, apply_transform: bool, format: &str) -> Result<Ensemble, LoadError> {
    let version = model.header.version.as_str();
    if !version.is_empty() && !KNOWN_VERSIONS.contains(&version) {
        warn!(version, "unrecognized LightGBM model version, loading anyway");
    }

    let ensemble = model.to_ensemble(apply_transform)?;
    debug!(
        format,
        name = ensemble.name(),
        trees = ensemble.forest().n_trees(),
        rounds = ensemble.n_estimators(),
        groups = ensemble.n_output_groups(),
        features = ensemble.n_features(),
        transform = %ensemble.transform(),
        "loaded LightGBM model"
    );
    Ok(ensemble)
}
