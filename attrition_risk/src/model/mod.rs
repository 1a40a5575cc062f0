//! The model capability the pipeline scores against.
//!
//! Any classifier can be plugged in by implementing [`RiskModel`]; the pipeline
//! only ever calls `predict` and `feature_importances` and never trains or
//! mutates the model.
use crate::error::PredictionError;
use crate::types::Features;
use serde::Serialize;

pub mod logistic;

pub use logistic::{FitOptions, LogisticRiskModel, ModelTerm};

/// An already-trained attrition classifier.
pub trait RiskModel: Send + Sync {
    /// Probability in [0, 1] that the client described by `features` churns.
    fn predict(&self, features: &Features) -> Result<f64, PredictionError>;

    /// Raw per-feature weights, in the model's own declaration order.
    /// The pipeline normalizes and sorts them.
    fn feature_importances(&self) -> Vec<FeatureWeight>;
}

/// A feature and its contribution weight.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureWeight {
    pub feature: String,
    pub weight: f64,
}

impl FeatureWeight {
    pub fn new(feature: &str, weight: f64) -> Self {
        Self {
            feature: feature.to_string(),
            weight,
        }
    }
}

/// Normalized feature weights, sorted descending. Weights lie in [0, 1].
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct FeatureImportance(Vec<FeatureWeight>);

impl FeatureImportance {
    /// Wraps weights that are already normalized and sorted.
    pub(crate) fn from_sorted(weights: Vec<FeatureWeight>) -> Self {
        Self(weights)
    }

    pub fn weight_of(&self, feature: &str) -> Option<f64> {
        self.0
            .iter()
            .find(|w| w.feature == feature)
            .map(|w| w.weight)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FeatureWeight> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
