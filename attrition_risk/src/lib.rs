//! Client attrition risk scoring and reporting.
//!
//! This library takes a table of client records, scores each client with a
//! pluggable churn model, buckets the population into Low / Medium / High risk
//! tiers, evaluates the model against ground truth labels when they are
//! available, and assembles filtered reports.
//!
//! A record the model cannot score never aborts a batch: it lands in the
//! `Unknown` tier and is listed as a warning.
//!
//! # Example
//!
//! ```ignore
//! use polars::prelude::*;
//! use attrition_risk::{LogisticRiskModel, ModelTerm, ReportType, RiskPipelineBuilder};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let df = df!(
//!         "id" => &["1", "2"],
//!         "name" => &["Acme", "Globex"],
//!         "revenue" => &[15000.0, 25000.0],
//!         "support_calls" => &[9.0, 1.0],
//!         "label" => &[true, false]
//!     )?;
//!
//!     let model = LogisticRiskModel::new(-2.0, vec![ModelTerm::numeric("support_calls", 0.6)]);
//!     let pipeline = RiskPipelineBuilder::new(model)
//!         .tier_thresholds(0.33, 0.66)
//!         .build()?;
//!
//!     pipeline.ingest(&df)?;
//!     let metrics = pipeline.evaluate()?;
//!     println!("AUC: {:?}", metrics.auc());
//!
//!     pipeline.report(ReportType::HighRiskOnly)?.summary();
//!     Ok(())
//! }
//! ```
//!
//! ### Training a model
//!
//! ```ignore
//! use attrition_risk::{loader, ColumnMapping, FitOptions, LogisticRiskModel};
//!
//! let dataset = loader::load_csv("clients.csv", &ColumnMapping::default())?;
//! let model = LogisticRiskModel::fit(
//!     &dataset,
//!     &["support_calls", "tenure"],
//!     &["plan"],
//!     FitOptions::default(),
//! )?;
//! model.save("model.json")?;
//! ```

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod loader;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod scorer;
pub mod types;

pub use crate::aggregate::{aggregate, FactorPrevalence, PopulationAggregate, TierBucket};
pub use crate::cache::{ScoredDataset, SnapshotCache};
pub use crate::config::{AttritionFactor, ColumnMapping, Crossing, RiskConfig, TierThresholds};
pub use crate::diagnostics::{diagnose, DatasetDiagnostics};
pub use crate::error::{ConfigurationError, LoadError, ModelError, PredictionError, RiskError};
pub use crate::metrics::{evaluate, summarize_importances, ConfusionMatrix, PerformanceMetrics};
pub use crate::model::{
    FeatureImportance, FeatureWeight, FitOptions, LogisticRiskModel, ModelTerm, RiskModel,
};
pub use crate::pipeline::{RiskPipeline, RiskPipelineBuilder};
pub use crate::report::{assemble, AtRiskClient, Report, ReportType};
pub use crate::scorer::{CancellationToken, Scorer, ScoringOutcome};
pub use crate::types::{
    ClientRecord, Dataset, FeatureValue, Features, RiskTier, ScoredClient, ScoringWarning,
    WarningReason,
};
