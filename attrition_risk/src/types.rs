use crate::config::TierThresholds;
use crate::error::PredictionError;
use getset::Getters;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single cell of a client's feature map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Numeric(f64),
    Categorical(String),
}

impl FeatureValue {
    /// Finite numbers become `Numeric`, everything else is kept verbatim as `Categorical`.
    /// Integers written with a leading zero (`02134`) are codes, not numbers.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if is_zero_padded(trimmed) {
            return FeatureValue::Categorical(trimmed.to_string());
        }
        match trimmed.parse::<f64>() {
            Ok(v) if v.is_finite() => FeatureValue::Numeric(v),
            _ => FeatureValue::Categorical(trimmed.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FeatureValue::Numeric(v) => Some(*v),
            FeatureValue::Categorical(_) => None,
        }
    }
}

fn is_zero_padded(s: &str) -> bool {
    s.len() > 1 && s.starts_with('0') && s.bytes().all(|b| b.is_ascii_digit())
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FeatureValue::Numeric(v) => write!(f, "{}", v),
            FeatureValue::Categorical(s) => write!(f, "{}", s),
        }
    }
}

/// Named feature values for one client, ordered by name.
pub type Features = BTreeMap<String, FeatureValue>;

/// One validated row of an uploaded dataset. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Getters, Serialize)]
#[getset(get = "pub")]
pub struct ClientRecord {
    id: String,
    name: String,
    features: Features,
    revenue: f64,
    /// Known churn outcome; only present in evaluation datasets.
    ground_truth_label: Option<bool>,
}

impl ClientRecord {
    pub fn new(
        id: &str,
        name: &str,
        revenue: f64,
        features: Features,
        ground_truth_label: Option<bool>,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            features,
            revenue,
            ground_truth_label,
        }
    }

    pub fn feature(&self, name: &str) -> Option<&FeatureValue> {
        self.features.get(name)
    }
}

/// Discretized attrition risk. `Unknown` marks records the model could not score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskTier {
    Low,
    Medium,
    High,
    Unknown,
}

impl RiskTier {
    /// The tiers a successfully scored client can land in.
    pub const SCORED: [RiskTier; 3] = [RiskTier::Low, RiskTier::Medium, RiskTier::High];
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let label = match self {
            RiskTier::Low => "Low",
            RiskTier::Medium => "Medium",
            RiskTier::High => "High",
            RiskTier::Unknown => "Unknown",
        };
        write!(f, "{}", label)
    }
}

/// A client record together with its model output.
///
/// The tier can only be set through the constructors, which derive it from the
/// probability, so the two never disagree.
#[derive(Debug, Clone, PartialEq, Getters, Serialize)]
#[getset(get = "pub")]
pub struct ScoredClient {
    #[serde(flatten)]
    record: ClientRecord,
    risk_probability: Option<f64>,
    risk_tier: RiskTier,
}

impl ScoredClient {
    pub fn scored(record: ClientRecord, probability: f64, thresholds: &TierThresholds) -> Self {
        Self {
            record,
            risk_probability: Some(probability),
            risk_tier: thresholds.classify(probability),
        }
    }

    pub fn unscored(record: ClientRecord) -> Self {
        Self {
            record,
            risk_probability: None,
            risk_tier: RiskTier::Unknown,
        }
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn revenue(&self) -> f64 {
        self.record.revenue
    }

    pub fn is_scored(&self) -> bool {
        self.risk_probability.is_some()
    }

    /// `Some(true)` when the probability reaches the decision threshold.
    pub fn predicted_churn(&self, decision_threshold: f64) -> Option<bool> {
        self.risk_probability.map(|p| p >= decision_threshold)
    }
}

/// Why a record ended up `Unknown`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WarningReason {
    Failed { error: PredictionError },
    TimedOut { elapsed_ms: u64, limit_ms: u64 },
}

impl fmt::Display for WarningReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WarningReason::Failed { error } => write!(f, "{}", error),
            WarningReason::TimedOut {
                elapsed_ms,
                limit_ms,
            } => write!(f, "prediction took {}ms (limit {}ms)", elapsed_ms, limit_ms),
        }
    }
}

/// A non-fatal, per-record scoring problem.
#[derive(Debug, Clone, PartialEq, Getters, Serialize)]
#[getset(get = "pub")]
pub struct ScoringWarning {
    /// Zero-based row index in the uploaded table.
    row: usize,
    client_id: String,
    reason: WarningReason,
}

impl ScoringWarning {
    pub fn new(row: usize, client_id: &str, reason: WarningReason) -> Self {
        Self {
            row,
            client_id: client_id.to_string(),
            reason,
        }
    }
}

impl fmt::Display for ScoringWarning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "row {} (client {}): {}",
            self.row, self.client_id, self.reason
        )
    }
}

/// Loader output: records in input order plus the feature columns they were read from.
#[derive(Debug, Clone, PartialEq, Default, Getters)]
#[getset(get = "pub")]
pub struct Dataset {
    feature_columns: Vec<String>,
    records: Vec<ClientRecord>,
}

impl Dataset {
    pub fn new(feature_columns: Vec<String>, records: Vec<ClientRecord>) -> Self {
        Self {
            feature_columns,
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_parts(self) -> (Vec<String>, Vec<ClientRecord>) {
        (self.feature_columns, self.records)
    }

    /// Number of records carrying a ground truth label.
    pub fn labeled_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.ground_truth_label.is_some())
            .count()
    }
}
