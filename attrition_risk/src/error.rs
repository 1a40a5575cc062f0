//! Error types for the `attrition_risk` library.
use polars::prelude::PolarsError;
use serde::Serialize;
use thiserror::Error;

/// Fatal problems with an uploaded table. Aborts the whole upload.
#[derive(Error, Debug)]
pub enum LoadError {
    /// Wraps a `PolarsError` raised while reading or inspecting the table.
    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),
    /// A required column (id, name, revenue) is absent.
    #[error("Column not found: {0}")]
    MissingColumn(String),
    /// The table has the required columns but nothing to score on.
    #[error("Dataset has no feature columns")]
    NoFeatureColumns,
    /// Two rows share the same client id.
    #[error("Duplicate client id: {id}")]
    DuplicateId { id: String },
    /// A cell could not be parsed into the type its column requires.
    #[error("Malformed value {value:?} in row {row}, column {column}")]
    MalformedField {
        row: usize,
        column: String,
        value: String,
    },
}

/// Invalid thresholds or an unreadable configuration file. Fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Tier thresholds are not monotonic: low {low} > high {high}")]
    NonMonotonicTiers { low: f64, high: f64 },
    #[error("{name} must be a finite value in [0, 1], got {value}")]
    OutOfRange { name: String, value: f64 },
    #[error("{name} must be a finite, non-negative value, got {value}")]
    Negative { name: String, value: f64 },
    #[error("Prediction timeout must be greater than zero")]
    ZeroTimeout,
    #[error("Attrition factor {0:?} has an empty feature name")]
    EmptyFactorFeature(String),
    #[error("Attrition factor {name:?} needs a finite threshold, got {value}")]
    NonFiniteFactorThreshold { name: String, value: f64 },
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Why a model could not produce a probability for one record.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum PredictionError {
    #[error("missing required feature {0:?}")]
    MissingFeature(String),
    #[error("feature {feature:?} must be numeric, got {value:?}")]
    NonNumericFeature { feature: String, value: String },
    #[error("model returned an invalid probability {0}")]
    InvalidProbability(f64),
    #[error("{0}")]
    Model(String),
}

/// Problems building or persisting a concrete model.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Training data is empty")]
    EmptyTrainingSet,
    #[error("Every training record needs a ground truth label; {missing} do not")]
    MissingLabels { missing: usize },
    #[error("Training failed: {0}")]
    Fit(String),
    #[error("Prediction failed during training: {0}")]
    Prediction(#[from] PredictionError),
    #[error("Failed to read or write model: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to (de)serialize model: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Top-level error for pipeline operations.
#[derive(Error, Debug)]
pub enum RiskError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// Evaluation was requested on data without (complete) ground truth labels.
    /// Callers can fall back to unlabeled scoring.
    #[error("Evaluation needs ground truth labels on every scored record ({labeled} of {total} labeled)")]
    InsufficientLabels { labeled: usize, total: usize },
    /// The batch was cancelled; the previously cached dataset is untouched.
    #[error("Scoring batch was cancelled")]
    Cancelled,
    /// A report or evaluation was requested before any dataset was scored.
    #[error("No scored dataset is available; load a dataset first")]
    NoScoredDataset,
    #[error("Failed to write output: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to serialize output: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),
}
