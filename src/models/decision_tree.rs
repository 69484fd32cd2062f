//! Decision tree induction over labeled samples
//!
//! Trees are built CART-style: at every node the candidate questions are
//! scored by Gini information gain and the best one partitions the samples
//! into a matched branch and a rest branch. A trained tree is plain data,
//! evaluated by walking it; nothing is generated or executed.

use crate::data::{Action, FeatureValue, Sample};
use crate::error::{Error, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Minimum number of features considered when subsampling at a node
const MIN_RANDOM_FEATURES: usize = 2;

/// Split predicate over one feature.
///
/// Flags match by equality, numbers by greater-or-equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub feature: String,
    pub value: FeatureValue,
}

impl Question {
    pub fn new(feature: &str, value: impl Into<FeatureValue>) -> Self {
        Self {
            feature: feature.to_string(),
            value: value.into(),
        }
    }

    /// Whether the sample falls on the matched side of this split
    pub fn matches(&self, sample: &Sample) -> bool {
        match (self.value, sample.value(&self.feature)) {
            (FeatureValue::Flag(expected), Some(FeatureValue::Flag(actual))) => actual == expected,
            (FeatureValue::Number(threshold), Some(FeatureValue::Number(actual))) => {
                actual >= threshold
            }
            _ => false,
        }
    }
}

/// Diagnostics recorded at each internal node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitStats {
    /// Feature the node splits on
    pub feature: String,
    /// Number of samples that reached the node
    pub samples: usize,
    /// Information gain the split achieved
    pub gain: f64,
}

/// A trained tree node: either a class-proportion leaf or an internal
/// split owning both children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TreeNode {
    Leaf {
        proportions: BTreeMap<Action, f64>,
    },
    Internal {
        question: Question,
        split: SplitStats,
        matched: Box<TreeNode>,
        rest: Box<TreeNode>,
    },
}

impl TreeNode {
    /// Walk the tree and return the class proportions of the leaf the
    /// sample lands in
    pub fn classify(&self, sample: &Sample) -> &BTreeMap<Action, f64> {
        match self {
            TreeNode::Leaf { proportions } => proportions,
            TreeNode::Internal {
                question,
                matched,
                rest,
                ..
            } => {
                if question.matches(sample) {
                    matched.classify(sample)
                } else {
                    rest.classify(sample)
                }
            }
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, TreeNode::Leaf { .. })
    }

    pub fn depth(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 1,
            TreeNode::Internal { matched, rest, .. } => 1 + matched.depth().max(rest.depth()),
        }
    }

    pub fn n_leaves(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 1,
            TreeNode::Internal { matched, rest, .. } => matched.n_leaves() + rest.n_leaves(),
        }
    }
}

/// Gini impurity over the labels present in `samples`: `1 - sum(p^2)`.
///
/// 0 for a pure set, approaching its maximum as classes balance out.
pub fn gini(samples: &[&Sample]) -> f64 {
    let n = samples.len() as f64;
    [Action::Nothing, Action::Sell, Action::Buy]
        .iter()
        .filter(|action| samples.iter().any(|s| s.action == **action))
        .fold(1.0, |impurity, action| {
            let prob = samples.iter().filter(|s| s.action == *action).count() as f64 / n;
            impurity - prob * prob
        })
}

fn information_gain(matched: &[&Sample], rest: &[&Sample], current_uncertainty: f64) -> f64 {
    let p = matched.len() as f64 / (matched.len() + rest.len()) as f64;
    current_uncertainty - p * gini(matched) - (1.0 - p) * gini(rest)
}

/// Distinct values a feature takes across the samples, in discovery order
fn unique_values(feature: &str, samples: &[&Sample]) -> Vec<FeatureValue> {
    let mut values: Vec<FeatureValue> = Vec::new();
    for sample in samples {
        if let Some(value) = sample.value(feature) {
            if !values.contains(&value) {
                values.push(value);
            }
        }
    }
    values
}

fn partition<'a>(samples: &[&'a Sample], question: &Question) -> (Vec<&'a Sample>, Vec<&'a Sample>) {
    samples
        .iter()
        .copied()
        .partition(|sample| question.matches(sample))
}

struct BestSplit<'a> {
    question: Question,
    gain: f64,
    matched: Vec<&'a Sample>,
    rest: Vec<&'a Sample>,
}

/// Scan every candidate question and keep the strictly best gain seen.
///
/// Features are scanned in their given order and values in discovery order,
/// so ties reproducibly go to the first candidate. Returns None when no
/// question improves on the parent impurity.
fn find_best_split<'a>(features: &[String], samples: &[&'a Sample]) -> Option<BestSplit<'a>> {
    let current_uncertainty = gini(samples);
    let mut best: Option<BestSplit<'a>> = None;

    for feature in features {
        for value in unique_values(feature, samples) {
            let question = Question {
                feature: feature.clone(),
                value,
            };
            let (matched, rest) = partition(samples, &question);
            if matched.is_empty() || rest.is_empty() {
                continue;
            }

            let gain = information_gain(&matched, &rest, current_uncertainty);
            if gain > best.as_ref().map_or(0.0, |b| b.gain) {
                best = Some(BestSplit {
                    question,
                    gain,
                    matched,
                    rest,
                });
            }
        }
    }

    best
}

/// Random feature subset for one node: random size between
/// `MIN_RANDOM_FEATURES` and the full set, drawn without replacement.
/// Re-drawn independently at every node; this is what decorrelates the
/// ensemble members.
fn random_feature_subset(features: &[String], rng: &mut ChaCha8Rng) -> Vec<String> {
    if features.len() <= MIN_RANDOM_FEATURES {
        return features.to_vec();
    }
    let count = rng.gen_range(MIN_RANDOM_FEATURES..=features.len());
    let mut subset = features.to_vec();
    subset.shuffle(rng);
    subset.truncate(count);
    subset
}

fn class_proportions(samples: &[&Sample]) -> BTreeMap<Action, f64> {
    let n = samples.len() as f64;
    let mut proportions = BTreeMap::new();
    for sample in samples {
        *proportions.entry(sample.action).or_insert(0.0) += 1.0;
    }
    for value in proportions.values_mut() {
        *value /= n;
    }
    proportions
}

/// Build a decision tree over `samples`.
///
/// With `randomize` set, each node considers only a fresh random subset of
/// `features`; recursion always continues with the original full set. A
/// node whose best achievable gain is zero becomes a leaf holding the
/// empirical label frequencies of the samples that reached it.
///
/// An empty sample set is a caller error.
pub fn build_tree(
    features: &[String],
    samples: &[Sample],
    randomize: bool,
    rng: &mut ChaCha8Rng,
) -> Result<TreeNode> {
    if samples.is_empty() {
        return Err(Error::EmptySampleSet);
    }
    let refs: Vec<&Sample> = samples.iter().collect();
    Ok(build_node(features, &refs, randomize, rng))
}

fn build_node(
    features: &[String],
    samples: &[&Sample],
    randomize: bool,
    rng: &mut ChaCha8Rng,
) -> TreeNode {
    let candidates = if randomize {
        random_feature_subset(features, rng)
    } else {
        features.to_vec()
    };

    match find_best_split(&candidates, samples) {
        Some(split) => {
            let matched = build_node(features, &split.matched, randomize, rng);
            let rest = build_node(features, &split.rest, randomize, rng);
            TreeNode::Internal {
                split: SplitStats {
                    feature: split.question.feature.clone(),
                    samples: split.matched.len() + split.rest.len(),
                    gain: split.gain,
                },
                question: split.question,
                matched: Box::new(matched),
                rest: Box::new(rest),
            }
        }
        None => TreeNode::Leaf {
            proportions: class_proportions(samples),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn features(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(42)
    }

    #[test]
    fn gini_is_zero_for_a_pure_set() {
        let samples: Vec<Sample> = (0..5)
            .map(|i| Sample::new(Action::Buy).with("RSI", i as f64))
            .collect();
        let refs: Vec<&Sample> = samples.iter().collect();
        assert_eq!(gini(&refs), 0.0);
    }

    #[test]
    fn gini_peaks_for_balanced_classes() {
        let samples = vec![
            Sample::new(Action::Buy).with("RSI", 1.0),
            Sample::new(Action::Nothing).with("RSI", 2.0),
        ];
        let refs: Vec<&Sample> = samples.iter().collect();
        assert!((gini(&refs) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn pure_set_becomes_a_unit_leaf() {
        let samples: Vec<Sample> = (0..4)
            .map(|i| Sample::new(Action::Nothing).with("RSI", i as f64))
            .collect();

        let tree = build_tree(&features(&["RSI"]), &samples, false, &mut rng()).unwrap();
        match tree {
            TreeNode::Leaf { proportions } => {
                assert_eq!(proportions.get(&Action::Nothing), Some(&1.0));
                assert_eq!(proportions.len(), 1);
            }
            _ => panic!("expected a leaf for a pure sample set"),
        }
    }

    #[test]
    fn single_sample_becomes_a_leaf() {
        let samples = vec![Sample::new(Action::Buy).with("RSI", 30.0)];
        let tree = build_tree(&features(&["RSI"]), &samples, false, &mut rng()).unwrap();
        assert!(tree.is_leaf());
    }

    #[test]
    fn empty_sample_set_is_a_caller_error() {
        let err = build_tree(&features(&["RSI"]), &[], false, &mut rng()).unwrap_err();
        assert!(matches!(err, Error::EmptySampleSet));
    }

    #[test]
    fn separable_classes_split_on_the_separating_feature() {
        let mut samples = Vec::new();
        for i in 0..10 {
            let action = if i < 5 { Action::Nothing } else { Action::Buy };
            samples.push(
                Sample::new(action)
                    .with("RSI", i as f64)
                    .with("volume", 1.0),
            );
        }

        let tree = build_tree(&features(&["volume", "RSI"]), &samples, false, &mut rng()).unwrap();
        match &tree {
            TreeNode::Internal { question, split, .. } => {
                assert_eq!(question.feature, "RSI");
                assert_eq!(split.samples, 10);
                assert!(split.gain > 0.0);
            }
            _ => panic!("expected an internal node"),
        }

        for sample in &samples {
            let proportions = tree.classify(sample);
            assert_eq!(proportions.get(&sample.action), Some(&1.0));
        }
    }

    #[test]
    fn ties_go_to_the_first_feature_scanned() {
        // RSI and RSI_copy carry identical information; the scan order must
        // decide reproducibly.
        let samples: Vec<Sample> = (0..6)
            .map(|i| {
                let action = if i < 3 { Action::Nothing } else { Action::Buy };
                Sample::new(action)
                    .with("RSI", i as f64)
                    .with("RSI_copy", i as f64)
            })
            .collect();

        let tree =
            build_tree(&features(&["RSI", "RSI_copy"]), &samples, false, &mut rng()).unwrap();
        match tree {
            TreeNode::Internal { question, .. } => assert_eq!(question.feature, "RSI"),
            _ => panic!("expected an internal node"),
        }
    }

    #[test]
    fn flag_features_split_by_equality() {
        let samples = vec![
            Sample::new(Action::Buy).with("engulfing", true),
            Sample::new(Action::Buy).with("engulfing", true),
            Sample::new(Action::Nothing).with("engulfing", false),
            Sample::new(Action::Nothing).with("engulfing", false),
        ];

        let tree = build_tree(&features(&["engulfing"]), &samples, false, &mut rng()).unwrap();
        let buy_side = tree.classify(&Sample::new(Action::Nothing).with("engulfing", true));
        assert_eq!(buy_side.get(&Action::Buy), Some(&1.0));
    }

    #[test]
    fn classification_is_idempotent() {
        let samples: Vec<Sample> = (0..20)
            .map(|i| {
                let action = if i % 3 == 0 { Action::Buy } else { Action::Nothing };
                Sample::new(action).with("RSI", (i % 7) as f64)
            })
            .collect();
        let tree = build_tree(&features(&["RSI"]), &samples, false, &mut rng()).unwrap();

        let probe = Sample::new(Action::Nothing).with("RSI", 3.0);
        assert_eq!(tree.classify(&probe), tree.classify(&probe));
    }

    #[test]
    fn same_seed_builds_the_same_randomized_tree() {
        let samples: Vec<Sample> = (0..30)
            .map(|i| {
                let action = if i % 2 == 0 { Action::Buy } else { Action::Nothing };
                Sample::new(action)
                    .with("RSI", (i % 5) as f64)
                    .with("EMA8", (i % 3) as f64)
                    .with("volume", (i % 7) as f64)
            })
            .collect();
        let names = features(&["RSI", "EMA8", "volume"]);

        let mut rng_a = ChaCha8Rng::seed_from_u64(7);
        let mut rng_b = ChaCha8Rng::seed_from_u64(7);
        let tree_a = build_tree(&names, &samples, true, &mut rng_a).unwrap();
        let tree_b = build_tree(&names, &samples, true, &mut rng_b).unwrap();
        assert_eq!(tree_a, tree_b);
    }

    #[test]
    fn leaf_proportions_sum_to_one() {
        let samples: Vec<Sample> = (0..9)
            .map(|i| {
                let action = match i % 3 {
                    0 => Action::Buy,
                    1 => Action::Sell,
                    _ => Action::Nothing,
                };
                // One shared value: nothing separates the classes.
                Sample::new(action).with("RSI", 1.0)
            })
            .collect();

        let tree = build_tree(&features(&["RSI"]), &samples, false, &mut rng()).unwrap();
        match tree {
            TreeNode::Leaf { proportions } => {
                let total: f64 = proportions.values().sum();
                assert!((total - 1.0).abs() < 1e-12);
                assert_eq!(proportions.len(), 3);
            }
            _ => panic!("expected a leaf when no split separates classes"),
        }
    }

    #[test]
    fn tree_round_trips_through_json() {
        let samples = vec![
            Sample::new(Action::Buy).with("RSI", 1.0),
            Sample::new(Action::Nothing).with("RSI", 2.0),
        ];
        let tree = build_tree(&features(&["RSI"]), &samples, false, &mut rng()).unwrap();

        let json = serde_json::to_value(&tree).unwrap();
        let back: TreeNode = serde_json::from_value(json).unwrap();
        assert_eq!(back, tree);
    }
}
