//! Load, score, evaluate, aggregate and report, end to end.
use crate::aggregate::aggregate;
use crate::cache::{fingerprint, ScoredDataset, SnapshotCache};
use crate::config::{AttritionFactor, RiskConfig, TierThresholds};
use crate::error::{ConfigurationError, RiskError};
use crate::loader;
use crate::metrics::{evaluate, summarize_importances, PerformanceMetrics};
use crate::model::RiskModel;
use crate::report::{assemble, Report, ReportType};
use crate::scorer::{CancellationToken, Scorer};
use crate::types::Dataset;
use chrono::Utc;
use polars::prelude::DataFrame;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Builder for a [`RiskPipeline`].
///
/// # Examples
///
/// ```
/// use attrition_risk::{LogisticRiskModel, ModelTerm, RiskPipelineBuilder};
///
/// let model = LogisticRiskModel::new(-1.0, vec![ModelTerm::numeric("support_calls", 0.4)]);
/// let pipeline = RiskPipelineBuilder::new(model)
///     .tier_thresholds(0.3, 0.7)
///     .decision_threshold(0.6)
///     .build()
///     .unwrap();
/// assert_eq!(pipeline.config().decision_threshold, 0.6);
/// ```
pub struct RiskPipelineBuilder {
    model: Arc<dyn RiskModel>,
    config: RiskConfig,
}

impl RiskPipelineBuilder {
    pub fn new<M: RiskModel + 'static>(model: M) -> Self {
        Self::from_shared(Arc::new(model))
    }

    pub fn from_shared(model: Arc<dyn RiskModel>) -> Self {
        Self {
            model,
            config: RiskConfig::default(),
        }
    }

    /// Replaces the whole configuration. Setters called afterwards still apply.
    pub fn config(&mut self, config: RiskConfig) -> &mut Self {
        self.config = config;
        self
    }

    pub fn tier_thresholds(&mut self, low: f64, high: f64) -> &mut Self {
        self.config.tiers = TierThresholds { low, high };
        self
    }

    pub fn decision_threshold(&mut self, threshold: f64) -> &mut Self {
        self.config.decision_threshold = threshold;
        self
    }

    pub fn high_value_threshold(&mut self, revenue: f64) -> &mut Self {
        self.config.high_value_threshold = revenue;
        self
    }

    pub fn top_at_risk_limit(&mut self, limit: usize) -> &mut Self {
        self.config.top_at_risk_limit = limit;
        self
    }

    pub fn prediction_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.config.prediction_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn factors(&mut self, factors: Vec<AttritionFactor>) -> &mut Self {
        self.config.factors = factors;
        self
    }

    /// Validates the configuration and builds the pipeline.
    pub fn build(&self) -> Result<RiskPipeline, ConfigurationError> {
        self.config.validate()?;
        let scorer = Scorer::new(self.config.tiers).with_timeout(self.config.prediction_timeout());
        Ok(RiskPipeline {
            model: Arc::clone(&self.model),
            config: self.config.clone(),
            scorer,
            cache: SnapshotCache::new(),
        })
    }
}

/// Scores uploads against one model and keeps the latest result.
///
/// All methods take `&self`; a pipeline can be shared across threads.
pub struct RiskPipeline {
    model: Arc<dyn RiskModel>,
    config: RiskConfig,
    scorer: Scorer,
    cache: SnapshotCache,
}

impl RiskPipeline {
    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Loads and scores an uploaded table, replacing the cached snapshot.
    ///
    /// A table with the same feature columns and records as the cached one is
    /// not rescored. The snapshot then takes the new upload's source.
    ///
    /// # Errors
    ///
    /// Load errors abort the upload and leave the cache untouched. Per-record
    /// prediction problems never fail the call; they show up as warnings.
    pub fn ingest(&self, df: &DataFrame) -> Result<Arc<ScoredDataset>, RiskError> {
        let dataset = loader::load(df, &self.config.columns)?;
        self.ingest_dataset(dataset)
    }

    /// Reads, loads and scores a CSV file. The path is kept as the snapshot's source.
    pub fn ingest_csv<P: AsRef<Path>>(&self, path: P) -> Result<Arc<ScoredDataset>, RiskError> {
        let path = path.as_ref();
        let dataset = loader::load_csv(path, &self.config.columns)?;
        self.run(dataset, None, Some(path.display().to_string()))
    }

    /// Like [`RiskPipeline::ingest`]; returns [`RiskError::Cancelled`] if
    /// `token` fires before scoring finishes, keeping the previous snapshot.
    pub fn ingest_with_cancellation(
        &self,
        df: &DataFrame,
        token: &CancellationToken,
    ) -> Result<Arc<ScoredDataset>, RiskError> {
        let dataset = loader::load(df, &self.config.columns)?;
        self.run(dataset, Some(token), None)
    }

    /// Scores an already loaded dataset.
    pub fn ingest_dataset(&self, dataset: Dataset) -> Result<Arc<ScoredDataset>, RiskError> {
        self.run(dataset, None, None)
    }

    /// The last successfully scored dataset, if any.
    pub fn latest(&self) -> Option<Arc<ScoredDataset>> {
        self.cache.latest()
    }

    /// Evaluates the latest snapshot against its ground truth labels.
    ///
    /// # Errors
    ///
    /// * `NoScoredDataset` if nothing has been ingested yet.
    /// * `InsufficientLabels` if the data is not fully labeled. Scores,
    ///   aggregates and reports are still available in that case.
    pub fn evaluate(&self) -> Result<PerformanceMetrics, RiskError> {
        let snapshot = self.latest().ok_or(RiskError::NoScoredDataset)?;
        evaluate(snapshot.clients(), self.config.decision_threshold)
    }

    /// Builds a report of `report_type` from the latest snapshot.
    pub fn report(&self, report_type: ReportType) -> Result<Report, RiskError> {
        let snapshot = self.latest().ok_or(RiskError::NoScoredDataset)?;
        Ok(assemble(
            report_type,
            snapshot.clients(),
            snapshot.warnings(),
            snapshot.metrics().as_ref(),
            snapshot.aggregate(),
            &self.config,
        ))
    }

    fn run(
        &self,
        dataset: Dataset,
        token: Option<&CancellationToken>,
        source: Option<String>,
    ) -> Result<Arc<ScoredDataset>, RiskError> {
        if token.is_some_and(CancellationToken::is_cancelled) {
            return Err(RiskError::Cancelled);
        }

        let fingerprint = fingerprint(dataset.feature_columns(), dataset.records())?;
        if let Some(cached) = self.cache.lookup(&fingerprint) {
            debug!(fingerprint = %fingerprint, "Dataset unchanged, reusing cached scores");
            if *cached.source() == source {
                return Ok(cached);
            }
            return Ok(self.cache.replace(cached.with_source(source)));
        }

        let outcome = match token {
            Some(token) => self
                .scorer
                .score_cancellable(dataset.records(), &self.model, token)?,
            None => self.scorer.score(dataset.records(), &self.model),
        };
        let (clients, warnings) = outcome.into_parts();

        let importance = summarize_importances(self.model.feature_importances());
        let aggregate = aggregate(&clients, &importance, &self.config.factors);
        let metrics = if dataset.labeled_count() > 0 {
            let metrics = evaluate(&clients, self.config.decision_threshold).ok();
            if metrics.is_none() {
                debug!("Dataset is only partially labeled; skipping evaluation");
            }
            metrics
        } else {
            None
        };

        info!(
            clients = clients.len(),
            warnings = warnings.len(),
            evaluated = metrics.is_some(),
            "Scored dataset"
        );
        let (feature_columns, _) = dataset.into_parts();
        let snapshot = ScoredDataset::new(
            fingerprint,
            source,
            Utc::now(),
            feature_columns,
            clients,
            warnings,
            importance,
            aggregate,
            metrics,
        );
        Ok(self.cache.replace(snapshot))
    }
}
