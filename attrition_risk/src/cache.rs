//! The last successfully scored dataset, shared as an immutable snapshot.
use crate::aggregate::PopulationAggregate;
use crate::metrics::PerformanceMetrics;
use crate::model::FeatureImportance;
use crate::types::{ClientRecord, ScoredClient, ScoringWarning};
use chrono::{DateTime, Utc};
use getset::Getters;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::{Arc, PoisonError, RwLock};

/// Hex SHA-256 of the feature columns and records in JSON form. Equal inputs
/// give equal fingerprints. Where the data came from is not part of it.
pub fn fingerprint(
    feature_columns: &[String],
    records: &[ClientRecord],
) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(&(feature_columns, records))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Everything derived from one upload. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Getters, Serialize)]
#[getset(get = "pub")]
pub struct ScoredDataset {
    fingerprint: String,
    /// Where the records came from, e.g. a CSV path.
    source: Option<String>,
    scored_at: DateTime<Utc>,
    feature_columns: Vec<String>,
    clients: Vec<ScoredClient>,
    warnings: Vec<ScoringWarning>,
    feature_importance: FeatureImportance,
    aggregate: PopulationAggregate,
    /// Present when every scored record carried a label.
    metrics: Option<PerformanceMetrics>,
}

impl ScoredDataset {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        fingerprint: String,
        source: Option<String>,
        scored_at: DateTime<Utc>,
        feature_columns: Vec<String>,
        clients: Vec<ScoredClient>,
        warnings: Vec<ScoringWarning>,
        feature_importance: FeatureImportance,
        aggregate: PopulationAggregate,
        metrics: Option<PerformanceMetrics>,
    ) -> Self {
        Self {
            fingerprint,
            source,
            scored_at,
            feature_columns,
            clients,
            warnings,
            feature_importance,
            aggregate,
            metrics,
        }
    }

    /// The same scores attributed to another upload.
    pub(crate) fn with_source(&self, source: Option<String>) -> Self {
        Self {
            source,
            ..self.clone()
        }
    }
}

/// Holds at most one [`ScoredDataset`]. Replacement swaps the whole snapshot
/// under a write lock, so readers see either the old or the new one.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    latest: RwLock<Option<Arc<ScoredDataset>>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<Arc<ScoredDataset>> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Cached snapshot for `fingerprint`, if it is the current one.
    pub fn lookup(&self, fingerprint: &str) -> Option<Arc<ScoredDataset>> {
        self.latest()
            .filter(|snapshot| snapshot.fingerprint() == fingerprint)
    }

    pub fn replace(&self, snapshot: ScoredDataset) -> Arc<ScoredDataset> {
        let snapshot = Arc::new(snapshot);
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&snapshot));
        snapshot
    }

    pub fn clear(&self) {
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
