//! External format compatibility loaders.
//!
//! Loaders parse models written by other frameworks and convert them to
//! native leafcast types.

pub mod lightgbm;

pub use lightgbm::{ConversionError, LgbModel, LoadError};
