//! Labeled feature records consumed by trees and forests

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Trading action label attached to every sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
    #[serde(rename = "NOTHING")]
    Nothing,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Buy => write!(f, "BUY"),
            Action::Sell => write!(f, "SELL"),
            Action::Nothing => write!(f, "NOTHING"),
        }
    }
}

/// A single feature value: numeric indicator or boolean pattern flag
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Flag(bool),
    Number(f64),
}

impl From<f64> for FeatureValue {
    fn from(v: f64) -> Self {
        FeatureValue::Number(v)
    }
}

impl From<bool> for FeatureValue {
    fn from(v: bool) -> Self {
        FeatureValue::Flag(v)
    }
}

/// One labeled observation: named feature values plus the action taken.
///
/// Samples are produced by upstream feature engineering and are read-only
/// from here on; every consumer either borrows or clones them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(flatten)]
    pub features: BTreeMap<String, FeatureValue>,
    pub action: Action,
}

impl Sample {
    /// Create a sample with no features yet
    pub fn new(action: Action) -> Self {
        Self {
            features: BTreeMap::new(),
            action,
        }
    }

    /// Add a feature value, consuming and returning the sample
    pub fn with(mut self, name: &str, value: impl Into<FeatureValue>) -> Self {
        self.features.insert(name.to_string(), value.into());
        self
    }

    /// Copy of this sample carrying a different action label
    pub fn relabeled(&self, action: Action) -> Self {
        Self {
            features: self.features.clone(),
            action,
        }
    }

    /// Look up a feature value by name
    pub fn value(&self, name: &str) -> Option<FeatureValue> {
        self.features.get(name).copied()
    }

    /// Look up a numeric feature, treating flags as absent
    pub fn number(&self, name: &str) -> Option<f64> {
        match self.features.get(name) {
            Some(FeatureValue::Number(v)) => Some(*v),
            _ => None,
        }
    }

    /// Numeric feature required for scoring; absence is a caller error
    pub fn require_number(&self, name: &str) -> Result<f64> {
        self.number(name)
            .ok_or_else(|| Error::MissingProperty(name.to_string()))
    }
}
