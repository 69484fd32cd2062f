//! Tree-build job body
//!
//! This is the unit of work a pool member executes: fetch the fold's
//! training partition, draw a stratified bootstrap sample, grow one
//! randomized tree and persist it. The persisted record is what makes a
//! job count as done; a crash before upload reports the job as failed.

use crate::data::{Action, Sample};
use crate::error::{Error, Result};
use crate::models::build_tree;
use crate::storage::{get_json, put_json, tree_key, BlobStore, TreeJob, TreeRecord};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

/// Draw a bootstrap sample with a class floor: a fifth of the picks come
/// from BUY rows and a fifth from NOTHING rows, so a heavily imbalanced
/// fold still exposes both classes to every tree. All picks are with
/// replacement; an empty stratum falls back to the whole set.
fn stratified_sample(size: usize, data: &[Sample], rng: &mut ChaCha8Rng) -> Vec<Sample> {
    let buys: Vec<&Sample> = data.iter().filter(|s| s.action == Action::Buy).collect();
    let nothings: Vec<&Sample> = data.iter().filter(|s| s.action == Action::Nothing).collect();

    let pick = |pool: &[&Sample], rng: &mut ChaCha8Rng| -> Sample {
        match pool.choose(rng) {
            Some(sample) => (*sample).clone(),
            None => data.choose(rng).cloned().unwrap(),
        }
    };

    let fifth = (size / 5).max(1);
    let mut sample = Vec::with_capacity(fifth * 5);
    for _ in 0..fifth * 3 {
        sample.push(data.choose(rng).cloned().unwrap());
    }
    for _ in 0..fifth {
        sample.push(pick(&buys, rng));
        sample.push(pick(&nothings, rng));
    }
    sample
}

/// Execute one tree job against the store. Returns the key the trained
/// tree was persisted under.
pub async fn run_tree_job<S>(store: &S, job: &TreeJob) -> Result<String>
where
    S: BlobStore + ?Sized,
{
    let data: Vec<Sample> = get_json(store, &job.data_key)
        .await?
        .ok_or_else(|| Error::MissingData(job.data_key.clone()))?;
    if data.is_empty() {
        return Err(Error::EmptySampleSet);
    }

    let mut rng = ChaCha8Rng::seed_from_u64(job.seed);
    let sample = stratified_sample(job.sample_size, &data, &mut rng);
    let tree = build_tree(&job.features, &sample, true, &mut rng)?;

    debug!(
        fold = job.fold,
        number = job.number,
        depth = tree.depth(),
        leaves = tree.n_leaves(),
        "tree trained"
    );

    let key = tree_key(job.fold, job.number);
    let record = TreeRecord {
        fold: job.fold,
        number: job.number,
        tree,
    };
    put_json(store, &key, &record).await?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;

    fn training_data() -> Vec<Sample> {
        (0..40)
            .map(|i| {
                let action = if i % 4 == 0 { Action::Buy } else { Action::Nothing };
                Sample::new(action).with("RSI", (i % 10) as f64)
            })
            .collect()
    }

    #[test]
    fn stratified_sample_keeps_both_classes_present() {
        let data = training_data();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let sample = stratified_sample(50, &data, &mut rng);

        assert_eq!(sample.len(), 50);
        assert!(sample.iter().any(|s| s.action == Action::Buy));
        assert!(sample.iter().any(|s| s.action == Action::Nothing));
    }

    #[test]
    fn stratified_sample_survives_a_single_class() {
        let data: Vec<Sample> = (0..10)
            .map(|i| Sample::new(Action::Nothing).with("RSI", i as f64))
            .collect();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let sample = stratified_sample(20, &data, &mut rng);

        assert_eq!(sample.len(), 20);
        assert!(sample.iter().all(|s| s.action == Action::Nothing));
    }

    #[tokio::test]
    async fn job_persists_the_tree_before_reporting_done() {
        let backend = MemoryBackend::new();
        put_json(&backend, "data-fold-0", &training_data())
            .await
            .unwrap();

        let job = TreeJob {
            features: vec!["RSI".to_string()],
            data_key: "data-fold-0".to_string(),
            fold: 0,
            number: 2,
            sample_size: 30,
            seed: 9,
        };
        let key = run_tree_job(&backend, &job).await.unwrap();

        assert_eq!(key, "trees/fold0/tree2");
        let record: TreeRecord = get_json(&backend, &key).await.unwrap().unwrap();
        assert_eq!(record.fold, 0);
        assert_eq!(record.number, 2);
    }

    #[tokio::test]
    async fn missing_training_data_fails_the_job() {
        let backend = MemoryBackend::new();
        let job = TreeJob {
            features: vec!["RSI".to_string()],
            data_key: "data-fold-9".to_string(),
            fold: 9,
            number: 0,
            sample_size: 10,
            seed: 1,
        };
        let err = run_tree_job(&backend, &job).await.unwrap_err();
        assert!(matches!(err, Error::MissingData(_)));
    }
}
