//! Forest training and ensemble classification

use crate::data::{Action, Sample};
use crate::error::{Error, Result};
use crate::models::TreeNode;
use crate::storage::{
    get_json, tree_key, BlobStore, JobOutcome, JobQueue, TreeJob, TreeRecord,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{error, info, warn};

/// Forest training configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestConfig {
    /// Number of trees per fold
    pub forest_size: usize,
    /// Stratified bootstrap sample size per tree
    pub sample_size: usize,
    /// Fixed delay before the single retry of a failed remote operation
    pub retry_delay: Duration,
    /// Base seed; per-tree seeds derive from it
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            forest_size: 1,
            sample_size: 500,
            retry_delay: Duration::from_secs(1),
            seed: 42,
        }
    }
}

/// An ordered ensemble of trees trained for one fold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forest {
    pub fold: usize,
    pub trees: Vec<TreeNode>,
}

impl Forest {
    pub fn new(fold: usize, trees: Vec<TreeNode>) -> Self {
        Self { fold, trees }
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    /// Vote by summing leaf proportions across trees.
    ///
    /// Only BUY and NOTHING scores count, and BUY needs a strictly higher
    /// score: under uncertainty the ensemble stays out of the market.
    pub fn classify(&self, sample: &Sample) -> Action {
        let mut buy = 0.0;
        let mut nothing = 0.0;
        for tree in &self.trees {
            let proportions = tree.classify(sample);
            buy += proportions.get(&Action::Buy).copied().unwrap_or(0.0);
            nothing += proportions.get(&Action::Nothing).copied().unwrap_or(0.0);
        }
        if buy > nothing {
            Action::Buy
        } else {
            Action::Nothing
        }
    }
}

/// Trains one forest per fold by dispatching tree jobs to the worker pool
/// and collecting their completions.
#[derive(Debug, Clone, Default)]
pub struct ForestBuilder {
    config: ForestConfig,
}

impl ForestBuilder {
    pub fn new(config: ForestConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ForestConfig {
        &self.config
    }

    fn job(&self, features: &[String], data_key: &str, fold: usize, number: usize) -> TreeJob {
        TreeJob {
            features: features.to_vec(),
            data_key: data_key.to_string(),
            fold,
            number,
            sample_size: self.config.sample_size,
            seed: self.config.seed.wrapping_add(number as u64),
        }
    }

    /// Train the fold's ensemble.
    ///
    /// Every member is an independent job: submitted up front, then awaited
    /// through the completion channel. A member that fails is resubmitted
    /// once after the configured delay; a member that fails again is
    /// dropped and the forest proceeds degraded. The returned future only
    /// resolves once every surviving member has been trained AND durably
    /// recorded; a forest with zero survivors aborts the fold.
    pub async fn build<S, Q>(
        &self,
        store: &S,
        queue: &Q,
        features: &[String],
        fold: usize,
        data_key: &str,
    ) -> Result<Forest>
    where
        S: BlobStore + ?Sized,
        Q: JobQueue + ?Sized,
    {
        let forest_size = self.config.forest_size;
        info!(fold, forest_size, "training forest");

        let bar = ProgressBar::new(forest_size as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
                .unwrap()
                .progress_chars("=> "),
        );
        bar.set_message(format!("Fold #{fold}"));

        for number in 0..forest_size {
            queue.submit(self.job(features, data_key, fold, number)).await?;
        }

        let mut pending: HashSet<usize> = (0..forest_size).collect();
        let mut retried: HashSet<usize> = HashSet::new();
        let mut trained: Vec<usize> = Vec::new();

        while !pending.is_empty() {
            for completion in queue.next_completions().await? {
                if completion.fold != fold || !pending.contains(&completion.number) {
                    continue;
                }
                match completion.outcome {
                    JobOutcome::Trained { .. } => {
                        pending.remove(&completion.number);
                        trained.push(completion.number);
                        bar.inc(1);
                    }
                    JobOutcome::Failed { reason } => {
                        if retried.insert(completion.number) {
                            warn!(
                                fold,
                                number = completion.number,
                                reason = %reason,
                                "tree job failed, retrying once"
                            );
                            tokio::time::sleep(self.config.retry_delay).await;
                            queue
                                .submit(self.job(features, data_key, fold, completion.number))
                                .await?;
                        } else {
                            warn!(
                                fold,
                                number = completion.number,
                                reason = %reason,
                                "tree job failed after retry, dropping from forest"
                            );
                            pending.remove(&completion.number);
                            bar.inc(1);
                        }
                    }
                }
            }
        }
        bar.finish_and_clear();

        if trained.is_empty() {
            error!(
                fold,
                features = features.len(),
                forest_size,
                "no trees survived training"
            );
            return Err(Error::EmptyForest { fold });
        }
        if trained.len() < forest_size {
            warn!(
                fold,
                trained = trained.len(),
                forest_size,
                "forest is degraded"
            );
        }

        trained.sort_unstable();
        let mut trees = Vec::with_capacity(trained.len());
        for number in trained {
            let key = tree_key(fold, number);
            let record: TreeRecord = get_json(store, &key)
                .await?
                .ok_or_else(|| Error::MissingData(key))?;
            trees.push(record.tree);
        }

        info!(fold, trees = trees.len(), "forest trained");
        Ok(Forest::new(fold, trees))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn leaf(proportions: &[(Action, f64)]) -> TreeNode {
        TreeNode::Leaf {
            proportions: proportions.iter().copied().collect::<BTreeMap<_, _>>(),
        }
    }

    fn probe() -> Sample {
        Sample::new(Action::Nothing).with("EMA8", 1.0)
    }

    #[test]
    fn doubt_resolves_to_nothing() {
        let forest = Forest::new(
            0,
            vec![
                leaf(&[(Action::Nothing, 1.0)]),
                leaf(&[(Action::Buy, 0.5), (Action::Nothing, 0.5)]),
                leaf(&[(Action::Nothing, 1.0)]),
            ],
        );
        // BUY 0.5 vs NOTHING 2.5
        assert_eq!(forest.classify(&probe()), Action::Nothing);
    }

    #[test]
    fn clear_majority_resolves_to_buy() {
        let forest = Forest::new(
            0,
            vec![
                leaf(&[(Action::Buy, 1.0)]),
                leaf(&[(Action::Buy, 1.0)]),
                leaf(&[(Action::Nothing, 1.0)]),
            ],
        );
        // BUY 2 vs NOTHING 1
        assert_eq!(forest.classify(&probe()), Action::Buy);
    }

    #[test]
    fn an_exact_tie_stays_out_of_the_market() {
        let forest = Forest::new(0, vec![leaf(&[(Action::Buy, 0.5), (Action::Nothing, 0.5)])]);
        assert_eq!(forest.classify(&probe()), Action::Nothing);
    }

    #[test]
    fn sell_proportions_do_not_count() {
        let forest = Forest::new(
            0,
            vec![
                leaf(&[(Action::Sell, 0.9), (Action::Buy, 0.1)]),
                leaf(&[(Action::Buy, 0.2), (Action::Sell, 0.8)]),
            ],
        );
        // BUY 0.3 vs NOTHING 0.0; SELL is never scored
        assert_eq!(forest.classify(&probe()), Action::Buy);
    }

    #[test]
    fn classification_is_idempotent_across_calls() {
        let forest = Forest::new(
            0,
            vec![leaf(&[(Action::Buy, 0.7), (Action::Nothing, 0.3)])],
        );
        let sample = probe();
        assert_eq!(forest.classify(&sample), forest.classify(&sample));
    }
}
