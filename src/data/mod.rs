//! Data structures shared by training and validation
//!
//! Provides the labeled sample record that trees, forests and the
//! cross-validation harness all operate on.

mod sample;

pub use sample::{Action, FeatureValue, Sample};
