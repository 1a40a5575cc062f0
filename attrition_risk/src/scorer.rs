//! Per-record scoring with failure isolation.
use crate::config::TierThresholds;
use crate::error::{PredictionError, RiskError};
use crate::model::RiskModel;
use crate::types::{ClientRecord, Features, ScoredClient, ScoringWarning, WarningReason};
use getset::Getters;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Cooperative cancellation flag for an in-flight batch.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Scored clients in input order plus one warning per record that could not be scored.
#[derive(Debug, Clone, Default, Getters)]
#[getset(get = "pub")]
pub struct ScoringOutcome {
    clients: Vec<ScoredClient>,
    warnings: Vec<ScoringWarning>,
}

impl ScoringOutcome {
    pub fn into_parts(self) -> (Vec<ScoredClient>, Vec<ScoringWarning>) {
        (self.clients, self.warnings)
    }
}

/// Result of one prediction, before it is attached to its record.
#[derive(Debug)]
enum RecordOutcome {
    Scored(f64),
    Failed(WarningReason),
}

/// Applies a [`RiskModel`] to every record of a batch.
#[derive(Debug, Clone)]
pub struct Scorer {
    thresholds: TierThresholds,
    timeout: Option<Duration>,
}

impl Scorer {
    pub fn new(thresholds: TierThresholds) -> Self {
        Self {
            thresholds,
            timeout: None,
        }
    }

    /// Bounds every prediction call by `timeout`.
    ///
    /// Each call then runs on its own worker thread. Once the limit passes the
    /// record is marked `Unknown` and scoring moves on; a late result is dropped.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Scores every record on the rayon pool. Output order matches `records`.
    ///
    /// A failed, invalid or late prediction never aborts the batch: the record
    /// gets tier `Unknown`, no probability, and a warning.
    pub fn score(&self, records: &[ClientRecord], model: &Arc<dyn RiskModel>) -> ScoringOutcome {
        let outcomes: Vec<RecordOutcome> = records
            .par_iter()
            .map(|record| self.predict_one(record, model))
            .collect();
        self.assemble(records, outcomes)
    }

    /// Like [`Scorer::score`], but stops early once `token` is cancelled.
    ///
    /// # Errors
    ///
    /// [`RiskError::Cancelled`] if the token was cancelled before the batch finished.
    pub fn score_cancellable(
        &self,
        records: &[ClientRecord],
        model: &Arc<dyn RiskModel>,
        token: &CancellationToken,
    ) -> Result<ScoringOutcome, RiskError> {
        let outcomes: Option<Vec<RecordOutcome>> = records
            .par_iter()
            .map(|record| (!token.is_cancelled()).then(|| self.predict_one(record, model)))
            .collect();
        let outcomes = outcomes
            .filter(|_| !token.is_cancelled())
            .ok_or(RiskError::Cancelled)?;
        Ok(self.assemble(records, outcomes))
    }

    fn predict_one(&self, record: &ClientRecord, model: &Arc<dyn RiskModel>) -> RecordOutcome {
        let result = match self.timeout {
            None => model.predict(record.features()),
            Some(limit) => {
                let started = Instant::now();
                match predict_within(model, record.features(), limit) {
                    Some(result) => result,
                    None => {
                        return RecordOutcome::Failed(WarningReason::TimedOut {
                            elapsed_ms: started.elapsed().as_millis() as u64,
                            limit_ms: limit.as_millis() as u64,
                        })
                    }
                }
            }
        };

        match result {
            Ok(p) if p.is_finite() && (0.0..=1.0).contains(&p) => RecordOutcome::Scored(p),
            Ok(p) => RecordOutcome::Failed(WarningReason::Failed {
                error: PredictionError::InvalidProbability(p),
            }),
            Err(error) => RecordOutcome::Failed(WarningReason::Failed { error }),
        }
    }

    fn assemble(&self, records: &[ClientRecord], outcomes: Vec<RecordOutcome>) -> ScoringOutcome {
        let mut clients = Vec::with_capacity(records.len());
        let mut warnings = Vec::new();

        for (row, (record, outcome)) in records.iter().zip(outcomes).enumerate() {
            match outcome {
                RecordOutcome::Scored(p) => {
                    clients.push(ScoredClient::scored(record.clone(), p, &self.thresholds));
                }
                RecordOutcome::Failed(reason) => {
                    warn!(row, client = %record.id(), %reason, "Could not score client");
                    warnings.push(ScoringWarning::new(row, record.id(), reason));
                    clients.push(ScoredClient::unscored(record.clone()));
                }
            }
        }

        info!(
            scored = clients.len() - warnings.len(),
            unknown = warnings.len(),
            "Scored client batch"
        );
        ScoringOutcome { clients, warnings }
    }
}

/// Runs one prediction on a worker thread and waits at most `limit` for it.
///
/// `None` means the deadline passed. The worker is detached, so a model that
/// never returns costs a thread but never blocks the batch.
fn predict_within(
    model: &Arc<dyn RiskModel>,
    features: &Features,
    limit: Duration,
) -> Option<Result<f64, PredictionError>> {
    let (tx, rx) = mpsc::channel();
    let model = Arc::clone(model);
    let features = features.clone();
    let spawned = thread::Builder::new()
        .name("risk-predict".to_string())
        .spawn(move || {
            // The receiver is gone if the deadline already passed.
            let _ = tx.send(model.predict(&features));
        });
    if let Err(e) = spawned {
        return Some(Err(PredictionError::Model(format!(
            "could not start prediction worker: {}",
            e
        ))));
    }

    match rx.recv_timeout(limit) {
        Ok(result) => Some(result),
        Err(RecvTimeoutError::Timeout) => None,
        Err(RecvTimeoutError::Disconnected) => Some(Err(PredictionError::Model(
            "prediction worker panicked".to_string(),
        ))),
    }
}
