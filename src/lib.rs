//! # Crypto Forest - Validated Random Forests for Trading Signals
//!
//! This library trains ensembles of decision-tree classifiers on labeled
//! market feature vectors and evaluates them with k-fold cross-validation,
//! scoring each held-out fold by accuracy and by simulated trading returns.
//!
//! ## Modules
//!
//! - `data` - The labeled sample record trees and forests operate on
//! - `models` - Decision tree induction and the forest ensemble
//! - `storage` - Blob-store and job-queue capabilities, plus an in-process backend
//! - `worker` - The tree-build job executed by the worker pool
//! - `validator` - Cross-validation harness and the returns simulation

pub mod data;
pub mod error;
pub mod models;
pub mod storage;
pub mod validator;
pub mod worker;

pub use data::{Action, FeatureValue, Sample};
pub use error::{Error, Result};
pub use models::{Forest, ForestBuilder, ForestConfig, TreeNode};
pub use validator::{validate, validate_results, FoldReport, ValidationSummary};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::data::{Action, FeatureValue, Sample};
    pub use crate::error::{Error, Result};
    pub use crate::models::{build_tree, Forest, ForestBuilder, ForestConfig, TreeNode};
    pub use crate::storage::{BlobStore, JobQueue, MemoryBackend};
    pub use crate::validator::{
        calculate_returns, validate, validate_fold, validate_results, FoldReport,
        ValidationSummary,
    };
}
