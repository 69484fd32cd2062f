//! Tree and forest models
//!
//! Provides decision-tree induction and the per-fold forest ensemble.

mod decision_tree;
mod forest;

pub use decision_tree::{build_tree, gini, Question, SplitStats, TreeNode};
pub use forest::{Forest, ForestBuilder, ForestConfig};
