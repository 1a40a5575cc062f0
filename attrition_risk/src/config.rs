//! Pipeline configuration: tier thresholds, decision cut-offs, attrition factors
//! and input column names.
use crate::error::ConfigurationError;
use crate::types::RiskTier;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Probability cut-offs that map a risk probability onto a [`RiskTier`].
///
/// `p < low` is Low, `low <= p < high` is Medium, anything else is High.
/// `low == high` is allowed and leaves the Medium tier empty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierThresholds {
    pub low: f64,
    pub high: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            low: 0.33,
            high: 0.66,
        }
    }
}

impl TierThresholds {
    /// Creates a validated threshold table.
    pub fn new(low: f64, high: f64) -> Result<Self, ConfigurationError> {
        let thresholds = Self { low, high };
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        check_unit_interval("tier threshold low", self.low)?;
        check_unit_interval("tier threshold high", self.high)?;
        if self.low > self.high {
            return Err(ConfigurationError::NonMonotonicTiers {
                low: self.low,
                high: self.high,
            });
        }
        Ok(())
    }

    /// Maps a probability onto its tier.
    pub fn classify(&self, probability: f64) -> RiskTier {
        if probability < self.low {
            RiskTier::Low
        } else if probability < self.high {
            RiskTier::Medium
        } else {
            RiskTier::High
        }
    }
}

/// Which side of the threshold counts as a crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Crossing {
    Above,
    Below,
}

/// A named attrition driver tied to one numeric feature, e.g. "Support Issues"
/// when `support_calls` is above 5.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttritionFactor {
    pub name: String,
    pub feature: String,
    pub threshold: f64,
    pub direction: Crossing,
}

impl AttritionFactor {
    pub fn above(name: &str, feature: &str, threshold: f64) -> Self {
        Self {
            name: name.to_string(),
            feature: feature.to_string(),
            threshold,
            direction: Crossing::Above,
        }
    }

    pub fn below(name: &str, feature: &str, threshold: f64) -> Self {
        Self {
            name: name.to_string(),
            feature: feature.to_string(),
            threshold,
            direction: Crossing::Below,
        }
    }

    /// Strict comparison; a value equal to the threshold does not cross it.
    pub fn is_crossed_by(&self, value: f64) -> bool {
        match self.direction {
            Crossing::Above => value > self.threshold,
            Crossing::Below => value < self.threshold,
        }
    }
}

/// Names of the structural columns in an uploaded table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMapping {
    pub id: String,
    pub name: String,
    pub revenue: String,
    pub label: String,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            id: "id".to_string(),
            name: "name".to_string(),
            revenue: "revenue".to_string(),
            label: "label".to_string(),
        }
    }
}

impl ColumnMapping {
    /// True for columns that are never treated as model features.
    pub fn is_structural(&self, column: &str) -> bool {
        column == self.id || column == self.name || column == self.revenue || column == self.label
    }
}

/// Full pipeline configuration. Every field has a default, so a JSON file only
/// needs to list what it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub tiers: TierThresholds,
    /// Probability at or above which a client is predicted to churn.
    pub decision_threshold: f64,
    /// Revenue strictly above this value makes a client "high value".
    pub high_value_threshold: f64,
    /// Length of the ranked at-risk list in reports.
    pub top_at_risk_limit: usize,
    /// Revenue periods per year; 12 for monthly revenue figures.
    pub revenue_periods_per_year: f64,
    /// Upper bound for a single prediction, in milliseconds.
    pub prediction_timeout_ms: Option<u64>,
    pub factors: Vec<AttritionFactor>,
    pub columns: ColumnMapping,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            tiers: TierThresholds::default(),
            decision_threshold: 0.5,
            high_value_threshold: 20_000.0,
            top_at_risk_limit: 50,
            revenue_periods_per_year: 12.0,
            prediction_timeout_ms: None,
            factors: vec![
                AttritionFactor::above("Support Issues", "support_calls", 5.0),
                AttritionFactor::above("Complaints", "complaints", 2.0),
                AttritionFactor::below("Short Tenure", "tenure", 12.0),
                AttritionFactor::below("Low Product Adoption", "product_count", 2.0),
            ],
            columns: ColumnMapping::default(),
        }
    }
}

impl RiskConfig {
    /// Reads and validates a JSON configuration file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigurationError> {
        let raw = std::fs::read_to_string(path)?;
        let config: RiskConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.tiers.validate()?;
        check_unit_interval("decision threshold", self.decision_threshold)?;
        if !self.high_value_threshold.is_finite() || self.high_value_threshold < 0.0 {
            return Err(ConfigurationError::Negative {
                name: "high value threshold".to_string(),
                value: self.high_value_threshold,
            });
        }
        if !self.revenue_periods_per_year.is_finite() || self.revenue_periods_per_year < 0.0 {
            return Err(ConfigurationError::Negative {
                name: "revenue periods per year".to_string(),
                value: self.revenue_periods_per_year,
            });
        }
        if self.prediction_timeout_ms == Some(0) {
            return Err(ConfigurationError::ZeroTimeout);
        }
        if let Some(factor) = self.factors.iter().find(|f| f.feature.trim().is_empty()) {
            return Err(ConfigurationError::EmptyFactorFeature(factor.name.clone()));
        }
        if let Some(factor) = self.factors.iter().find(|f| !f.threshold.is_finite()) {
            return Err(ConfigurationError::NonFiniteFactorThreshold {
                name: factor.name.clone(),
                value: factor.threshold,
            });
        }
        Ok(())
    }

    pub fn prediction_timeout(&self) -> Option<Duration> {
        self.prediction_timeout_ms.map(Duration::from_millis)
    }
}

fn check_unit_interval(name: &str, value: f64) -> Result<(), ConfigurationError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigurationError::OutOfRange {
            name: name.to_string(),
            value,
        })
    }
}
