//! Crate error types

use thiserror::Error;

/// Errors that can occur while training or validating forests
#[derive(Error, Debug)]
pub enum Error {
    #[error("missing parameters")]
    MissingParameters,

    #[error("missing property {0}")]
    MissingProperty(String),

    #[error("folds cant be bigger than data length: {folds} > {len}")]
    FoldsExceedLength { folds: usize, len: usize },

    #[error("both params must be of same length: {left} != {right}")]
    LengthMismatch { left: usize, right: usize },

    #[error("cannot build a tree from an empty sample set")]
    EmptySampleSet,

    #[error("no data stored under key {0}")]
    MissingData(String),

    #[error("no trees survived training for fold {fold}")]
    EmptyForest { fold: usize },

    #[error("storage operation failed: {0}")]
    Storage(String),

    #[error("job queue operation failed: {0}")]
    Queue(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for crate operations
pub type Result<T> = std::result::Result<T, Error>;
