//! K-fold cross-validation harness
//!
//! Partitions the labeled dataset into contiguous folds, trains one forest
//! per fold on everything outside it, and scores each fold's held-out
//! samples by classification accuracy and by simulated trading returns.

mod returns;

pub use returns::calculate_returns;

use crate::data::{Action, Sample};
use crate::error::{Error, Result};
use crate::models::{Forest, ForestBuilder, ForestConfig};
use crate::storage::{
    fold_data_key, get_json, put_json, BlobStore, JobQueue, TreeRecord, TREES_PREFIX,
    VALIDATION_CHUNKS_KEY,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Permits for in-flight fold pipelines. One permit keeps fold dispatch
/// strictly sequential, the backpressure bound the downstream worker pool
/// is sized for.
const FOLD_DISPATCH_PERMITS: usize = 1;

/// Out-of-fold metrics for one trained forest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldReport {
    pub fold: usize,
    pub accuracy: f64,
    pub predicted_returns: f64,
    pub expected_returns: f64,
}

/// Cross-validation results aggregated over every fold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub folds: Vec<FoldReport>,
    pub accuracy: f64,
    pub predicted_returns: f64,
    pub expected_returns: f64,
}

impl ValidationSummary {
    fn from_reports(folds: Vec<FoldReport>) -> Self {
        let n = folds.len() as f64;
        Self {
            accuracy: folds.iter().map(|r| r.accuracy).sum::<f64>() / n,
            predicted_returns: folds.iter().map(|r| r.predicted_returns).sum::<f64>() / n,
            expected_returns: folds.iter().map(|r| r.expected_returns).sum::<f64>() / n,
            folds,
        }
    }
}

/// Partition `data` into `folds` contiguous chunks of ⌈len/folds⌉ items,
/// the last chunk possibly shorter. Concatenating the chunks in order
/// reconstructs `data` exactly.
pub fn chunk_array<T: Clone>(data: &[T], folds: usize) -> Result<Vec<Vec<T>>> {
    if folds == 0 {
        return Err(Error::MissingParameters);
    }
    if folds > data.len() {
        return Err(Error::FoldsExceedLength {
            folds,
            len: data.len(),
        });
    }
    let chunk_size = (data.len() + folds - 1) / folds;
    Ok(data.chunks(chunk_size).map(|c| c.to_vec()).collect())
}

/// Concatenate every chunk except `index`, preserving relative order
pub fn merge_without<T: Clone>(index: usize, chunks: &[Vec<T>]) -> Vec<T> {
    chunks
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != index)
        .flat_map(|(_, chunk)| chunk.iter().cloned())
        .collect()
}

/// Fraction of predictions matching the held-out samples' actions
pub fn compare_with_out_of_bag(predictions: &[Action], out_of_fold: &[Sample]) -> Result<f64> {
    if predictions.len() != out_of_fold.len() {
        return Err(Error::LengthMismatch {
            left: predictions.len(),
            right: out_of_fold.len(),
        });
    }
    let matching = predictions
        .iter()
        .zip(out_of_fold)
        .filter(|(predicted, sample)| **predicted == sample.action)
        .count();
    Ok(matching as f64 / out_of_fold.len() as f64)
}

async fn retry_once<T, F, Fut>(delay: Duration, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match operation().await {
        Ok(value) => Ok(value),
        Err(err) => {
            warn!(%err, "remote operation failed, retrying once");
            tokio::time::sleep(delay).await;
            operation().await
        }
    }
}

/// Train one forest per fold.
///
/// Parameters are validated before any partitioning or upload happens.
/// Fold pipelines (upload training partition, build forest, persist trees)
/// run under a dispatch permit held end to end, so fold `i + 1` only
/// starts once fold `i` has fully resolved. After the last fold the chunk
/// list itself is uploaded for later scoring.
pub async fn validate<S, Q>(
    folds: usize,
    features: &[String],
    data: &[Sample],
    store: &S,
    queue: &Q,
    config: &ForestConfig,
) -> Result<()>
where
    S: BlobStore + ?Sized,
    Q: JobQueue + ?Sized,
{
    if folds == 0 || features.is_empty() || data.is_empty() {
        return Err(Error::MissingParameters);
    }
    let chunks = chunk_array(data, folds)?;
    let builder = ForestBuilder::new(config.clone());
    let dispatch = Semaphore::new(FOLD_DISPATCH_PERMITS);

    for index in 0..chunks.len() {
        let _permit = dispatch
            .acquire()
            .await
            .expect("fold dispatch semaphore is never closed");

        let training = merge_without(index, &chunks);
        let key = fold_data_key(index);
        info!(fold = index, samples = training.len(), "uploading training partition");
        retry_once(config.retry_delay, || put_json(store, &key, &training)).await?;

        builder.build(store, queue, features, index, &key).await?;
    }

    put_json(store, VALIDATION_CHUNKS_KEY, &chunks).await?;
    info!(folds = chunks.len(), "all folds trained");
    Ok(())
}

/// Score one held-out fold against its trained forest
pub fn validate_fold(fold_samples: &[Sample], forest: &Forest) -> Result<FoldReport> {
    let predictions: Vec<Action> = fold_samples
        .par_iter()
        .map(|sample| forest.classify(sample))
        .collect();

    let accuracy = compare_with_out_of_bag(&predictions, fold_samples)?;
    let expected_returns = calculate_returns(fold_samples)?;

    let predicted: Vec<Sample> = fold_samples
        .iter()
        .zip(&predictions)
        .map(|(sample, &action)| sample.relabeled(action))
        .collect();
    let predicted_returns = calculate_returns(&predicted)?;

    Ok(FoldReport {
        fold: forest.fold,
        accuracy,
        predicted_returns,
        expected_returns,
    })
}

/// Score every trained forest against its held-out fold.
///
/// Downloads the persisted tree records, groups them by fold, fetches the
/// chunk list uploaded by [`validate`] and aggregates the per-fold metrics
/// into means.
pub async fn validate_results<S>(store: &S) -> Result<ValidationSummary>
where
    S: BlobStore + ?Sized,
{
    let keys = store.list_keys(TREES_PREFIX).await?;
    if keys.is_empty() {
        return Err(Error::MissingData(TREES_PREFIX.to_string()));
    }

    let mut grouped: BTreeMap<usize, Vec<TreeRecord>> = BTreeMap::new();
    for key in keys {
        let record: TreeRecord = get_json(store, &key)
            .await?
            .ok_or_else(|| Error::MissingData(key))?;
        grouped.entry(record.fold).or_default().push(record);
    }

    let chunks: Vec<Vec<Sample>> = get_json(store, VALIDATION_CHUNKS_KEY)
        .await?
        .ok_or_else(|| Error::MissingData(VALIDATION_CHUNKS_KEY.to_string()))?;

    let mut reports = Vec::with_capacity(grouped.len());
    for (fold, mut records) in grouped {
        records.sort_by_key(|r| r.number);
        let forest = Forest::new(fold, records.into_iter().map(|r| r.tree).collect());
        let chunk = chunks
            .get(fold)
            .ok_or_else(|| Error::MissingData(format!("validation chunk {fold}")))?;

        let report = validate_fold(chunk, &forest)?;
        info!(
            fold,
            accuracy = report.accuracy,
            predicted_returns = report.predicted_returns,
            expected_returns = report.expected_returns,
            "fold scored"
        );
        reports.push(report);
    }

    let summary = ValidationSummary::from_reports(reports);
    info!(
        accuracy = summary.accuracy,
        predicted_returns = summary.predicted_returns,
        expected_returns = summary.expected_returns,
        "validation complete"
    );
    Ok(summary)
}
