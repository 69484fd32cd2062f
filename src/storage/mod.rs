//! Storage and job-queue capabilities
//!
//! The trainer treats durable storage and the tree-build worker pool as
//! opaque collaborators: blobs are JSON payloads stored under string keys
//! with idempotent overwrite, and tree jobs are fire-and-forget submissions
//! whose completions arrive on a separate channel in bounded batches.

mod memory;

pub use memory::MemoryBackend;

use crate::error::Result;
use crate::models::TreeNode;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Prefix under which every persisted tree lives
pub const TREES_PREFIX: &str = "trees/";

/// Key for the held-out chunk list uploaded after training
pub const VALIDATION_CHUNKS_KEY: &str = "validation-chunks";

/// Completions are drained at most this many per call
pub const COMPLETION_BATCH: usize = 10;

/// Key for a fold's training partition
pub fn fold_data_key(fold: usize) -> String {
    format!("data-fold-{fold}")
}

/// Key under which one trained tree is persisted
pub fn tree_key(fold: usize, number: usize) -> String {
    format!("{TREES_PREFIX}fold{fold}/tree{number}")
}

/// Durable key-addressed blob storage
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store a payload under a key, overwriting any previous value
    async fn upload(&self, key: &str, payload: Value) -> Result<()>;

    /// Fetch a payload; an absent key is None, not an error
    async fn download(&self, key: &str) -> Result<Option<Value>>;

    /// Every stored key starting with the prefix
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Remote pool executing tree-build jobs
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue one tree-build unit of work. Completion is observed through
    /// `next_completions`, never through this call's resolution.
    async fn submit(&self, job: TreeJob) -> Result<()>;

    /// Wait until at least one completion is available, then drain up to
    /// [`COMPLETION_BATCH`] of them
    async fn next_completions(&self) -> Result<Vec<JobCompletion>>;
}

/// One tree-build unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeJob {
    pub features: Vec<String>,
    pub data_key: String,
    pub fold: usize,
    pub number: usize,
    pub sample_size: usize,
    pub seed: u64,
}

/// Notification that one submitted job finished
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCompletion {
    pub fold: usize,
    pub number: usize,
    pub outcome: JobOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobOutcome {
    /// The tree trained and was durably recorded under `key`
    Trained { key: String },
    Failed { reason: String },
}

/// Persisted form of one trained ensemble member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeRecord {
    pub fold: usize,
    pub number: usize,
    pub tree: TreeNode,
}

/// Serialize and upload a value under a key
pub async fn put_json<S, T>(store: &S, key: &str, value: &T) -> Result<()>
where
    S: BlobStore + ?Sized,
    T: Serialize,
{
    store.upload(key, serde_json::to_value(value)?).await
}

/// Download and deserialize a value; absent keys are None
pub async fn get_json<S, T>(store: &S, key: &str) -> Result<Option<T>>
where
    S: BlobStore + ?Sized,
    T: DeserializeOwned,
{
    match store.download(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_follow_the_per_fold_namespace() {
        assert_eq!(fold_data_key(3), "data-fold-3");
        assert_eq!(tree_key(2, 7), "trees/fold2/tree7");
        assert!(tree_key(0, 0).starts_with(TREES_PREFIX));
    }
}
