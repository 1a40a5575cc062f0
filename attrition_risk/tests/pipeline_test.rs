use attrition_risk::{
    CancellationToken, FeatureValue, FeatureWeight, Features, LoadError, PredictionError,
    ReportType, RiskError, RiskModel, RiskPipelineBuilder, RiskTier, WarningReason,
};
use polars::prelude::*;
use std::collections::HashSet;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Returns the `signal` feature as the churn probability.
struct SignalModel;

fn signal(features: &Features) -> Result<f64, PredictionError> {
    features
        .get("signal")
        .and_then(FeatureValue::as_f64)
        .ok_or_else(|| PredictionError::MissingFeature("signal".to_string()))
}

impl RiskModel for SignalModel {
    fn predict(&self, features: &Features) -> Result<f64, PredictionError> {
        signal(features)
    }

    fn feature_importances(&self) -> Vec<FeatureWeight> {
        vec![FeatureWeight::new("signal", 1.0)]
    }
}

struct CountingModel {
    calls: AtomicUsize,
}

impl RiskModel for CountingModel {
    fn predict(&self, features: &Features) -> Result<f64, PredictionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        signal(features)
    }

    fn feature_importances(&self) -> Vec<FeatureWeight> {
        Vec::new()
    }
}

/// Cancels `token` as soon as it sees a signal above 0.95.
struct CancellingModel {
    token: CancellationToken,
}

impl RiskModel for CancellingModel {
    fn predict(&self, features: &Features) -> Result<f64, PredictionError> {
        let p = signal(features)?;
        if p > 0.95 {
            self.token.cancel();
        }
        Ok(p)
    }

    fn feature_importances(&self) -> Vec<FeatureWeight> {
        Vec::new()
    }
}

fn two_clients() -> DataFrame {
    df!(
        "id" => &["1", "2"],
        "name" => &["Acme", "Globex"],
        "revenue" => &[15000.0, 25000.0],
        "signal" => &[0.9, 0.1],
        "label" => &[true, false],
    )
    .unwrap()
}

#[test]
fn test_end_to_end_two_clients() -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = RiskPipelineBuilder::new(SignalModel)
        .tier_thresholds(0.33, 0.66)
        .build()?;

    let snapshot = pipeline.ingest(&two_clients())?;
    let tiers: Vec<RiskTier> = snapshot.clients().iter().map(|c| *c.risk_tier()).collect();
    assert_eq!(tiers, vec![RiskTier::High, RiskTier::Low]);
    assert!(snapshot.warnings().is_empty());

    let metrics = pipeline.evaluate()?;
    let matrix = metrics.confusion_matrix();
    assert_eq!(matrix.true_positive, 1);
    assert_eq!(matrix.false_positive, 0);
    assert_eq!(matrix.true_negative, 1);
    assert_eq!(matrix.false_negative, 0);
    assert_eq!(*metrics.accuracy(), 1.0);
    assert_eq!(*metrics.precision(), 1.0);
    assert_eq!(*metrics.recall(), 1.0);
    assert_eq!(*metrics.f1_score(), 1.0);
    assert_eq!(*metrics.auc(), Some(1.0));

    // The snapshot carries the same metrics for reports.
    assert_eq!(snapshot.metrics().as_ref(), Some(&metrics));

    let aggregate = snapshot.aggregate();
    assert_eq!(aggregate.high().count, 1);
    assert_eq!(aggregate.high().revenue, 15000.0);
    assert_eq!(aggregate.low().count, 1);
    assert_eq!(aggregate.medium().count, 0);
    Ok(())
}

#[test]
fn test_failed_prediction_is_isolated() -> Result<(), Box<dyn std::error::Error>> {
    let df = df!(
        "id" => &["a", "b", "c"],
        "name" => &["A", "B", "C"],
        "revenue" => &[100.0, 200.0, 300.0],
        "signal" => &[Some(0.8), None, Some(0.2)],
    )?;
    let pipeline = RiskPipelineBuilder::new(SignalModel).build()?;
    let snapshot = pipeline.ingest(&df)?;

    let clients = snapshot.clients();
    assert_eq!(clients.len(), 3);
    assert_eq!(*clients[0].risk_tier(), RiskTier::High);
    assert_eq!(*clients[1].risk_tier(), RiskTier::Unknown);
    assert_eq!(*clients[1].risk_probability(), None);
    assert_eq!(*clients[2].risk_tier(), RiskTier::Low);

    assert_eq!(snapshot.warnings().len(), 1);
    let warning = &snapshot.warnings()[0];
    assert_eq!(*warning.row(), 1);
    assert_eq!(warning.client_id(), "b");
    assert!(matches!(warning.reason(), WarningReason::Failed { .. }));

    assert_eq!(snapshot.aggregate().unscored().count, 1);
    assert_eq!(*snapshot.aggregate().total_clients(), 3);
    Ok(())
}

#[test]
fn test_unlabeled_data_still_reports() -> Result<(), Box<dyn std::error::Error>> {
    let df = df!(
        "id" => &["1", "2"],
        "name" => &["Acme", "Globex"],
        "revenue" => &[15000.0, 25000.0],
        "signal" => &[0.9, 0.1],
        "label" => &[Some(true), None],
    )?;
    let pipeline = RiskPipelineBuilder::new(SignalModel).build()?;
    let snapshot = pipeline.ingest(&df)?;
    assert!(snapshot.metrics().is_none());

    match pipeline.evaluate() {
        Err(RiskError::InsufficientLabels { labeled, total }) => {
            assert_eq!(labeled, 1);
            assert_eq!(total, 2);
        }
        other => panic!("Expected InsufficientLabels, got {:?}", other),
    }

    let report = pipeline.report(ReportType::Complete)?;
    assert_eq!(report.clients().len(), 2);
    assert!(report.metrics().is_none());
    Ok(())
}

#[test]
fn test_high_risk_report_is_subset_of_complete() -> Result<(), Box<dyn std::error::Error>> {
    let signals: Vec<f64> = (0..40).map(|i| (i as f64 * 0.137) % 1.0).collect();
    let ids: Vec<String> = (0..40).map(|i| format!("c{}", i)).collect();
    let names: Vec<String> = (0..40).map(|i| format!("Client {}", i)).collect();
    let revenue: Vec<f64> = (0..40).map(|i| 1000.0 * i as f64).collect();
    let df = df!(
        "id" => ids,
        "name" => names,
        "revenue" => revenue,
        "signal" => signals,
    )?;

    let pipeline = RiskPipelineBuilder::new(SignalModel).build()?;
    pipeline.ingest(&df)?;

    let complete = pipeline.report(ReportType::Complete)?;
    let high_risk = pipeline.report(ReportType::HighRiskOnly)?;
    let high_value = pipeline.report(ReportType::HighValueOnly)?;
    let executive = pipeline.report(ReportType::ExecutiveSummary)?;

    let all: HashSet<&str> = complete.clients().iter().map(|c| c.id()).collect();
    assert_eq!(all.len(), 40);
    assert!(!high_risk.clients().is_empty());
    for client in high_risk.clients() {
        assert!(all.contains(client.id()));
        assert_eq!(*client.risk_tier(), RiskTier::High);
    }
    for client in high_value.clients() {
        assert!(all.contains(client.id()));
        assert!(client.revenue() > 20000.0);
    }
    assert!(executive.clients().is_empty());
    assert_eq!(executive.aggregate(), complete.aggregate());
    Ok(())
}

#[test]
fn test_unchanged_dataset_is_not_rescored() -> Result<(), Box<dyn std::error::Error>> {
    let model = Arc::new(CountingModel {
        calls: AtomicUsize::new(0),
    });
    let shared: Arc<dyn RiskModel> = model.clone();
    let pipeline = RiskPipelineBuilder::from_shared(shared).build()?;

    let first = pipeline.ingest(&two_clients())?;
    assert_eq!(model.calls.load(Ordering::SeqCst), 2);

    let second = pipeline.ingest(&two_clients())?;
    assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    assert!(Arc::ptr_eq(&first, &second));

    let changed = df!(
        "id" => &["1", "2"],
        "name" => &["Acme", "Globex"],
        "revenue" => &[15000.0, 25000.0],
        "signal" => &[0.9, 0.3],
        "label" => &[true, false],
    )?;
    let third = pipeline.ingest(&changed)?;
    assert_eq!(model.calls.load(Ordering::SeqCst), 4);
    assert_ne!(first.fingerprint(), third.fingerprint());
    Ok(())
}

#[test]
fn test_cache_hit_takes_new_source() -> Result<(), Box<dyn std::error::Error>> {
    let model = Arc::new(CountingModel {
        calls: AtomicUsize::new(0),
    });
    let shared: Arc<dyn RiskModel> = model.clone();
    let pipeline = RiskPipelineBuilder::from_shared(shared).build()?;

    let first = pipeline.ingest(&two_clients())?;
    assert_eq!(*first.source(), None);

    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "id,name,revenue,signal,label")?;
    writeln!(file, "1,Acme,15000,0.9,true")?;
    writeln!(file, "2,Globex,25000,0.1,false")?;
    file.flush()?;

    let second = pipeline.ingest_csv(file.path())?;
    assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    assert_eq!(second.fingerprint(), first.fingerprint());
    assert_eq!(
        second.source().as_deref(),
        Some(file.path().display().to_string().as_str())
    );
    assert_eq!(second.clients(), first.clients());
    Ok(())
}

#[test]
fn test_same_records_with_other_columns_are_rescored() -> Result<(), Box<dyn std::error::Error>> {
    let model = Arc::new(CountingModel {
        calls: AtomicUsize::new(0),
    });
    let shared: Arc<dyn RiskModel> = model.clone();
    let pipeline = RiskPipelineBuilder::from_shared(shared).build()?;

    let narrow = df!(
        "id" => &["1"],
        "name" => &["Acme"],
        "revenue" => &[15000.0],
        "signal" => &[Some(0.9)],
    )?;
    let wide = df!(
        "id" => &["1"],
        "name" => &["Acme"],
        "revenue" => &[15000.0],
        "signal" => &[Some(0.9)],
        "plan" => &[None::<&str>],
    )?;
    let first = pipeline.ingest(&narrow)?;
    let second = pipeline.ingest(&wide)?;
    assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    assert_ne!(first.fingerprint(), second.fingerprint());
    assert_eq!(second.feature_columns().len(), 2);
    Ok(())
}

#[test]
fn test_cancelled_ingest_keeps_previous_snapshot() -> Result<(), Box<dyn std::error::Error>> {
    let token = CancellationToken::new();
    let pipeline = RiskPipelineBuilder::new(CancellingModel {
        token: token.clone(),
    })
    .build()?;

    let first = pipeline.ingest(&two_clients())?;

    let df = df!(
        "id" => &["x", "y", "z"],
        "name" => &["X", "Y", "Z"],
        "revenue" => &[1.0, 2.0, 3.0],
        "signal" => &[0.2, 0.99, 0.4],
    )?;
    let result = pipeline.ingest_with_cancellation(&df, &token);
    assert!(matches!(result, Err(RiskError::Cancelled)));

    let latest = pipeline.latest().unwrap();
    assert!(Arc::ptr_eq(&first, &latest));
    assert_eq!(latest.clients().len(), 2);
    Ok(())
}

#[test]
fn test_load_error_keeps_previous_snapshot() -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = RiskPipelineBuilder::new(SignalModel).build()?;
    let first = pipeline.ingest(&two_clients())?;

    let duplicate = df!(
        "id" => &["1", "1"],
        "name" => &["Acme", "Acme"],
        "revenue" => &[1.0, 2.0],
        "signal" => &[0.5, 0.5],
    )?;
    match pipeline.ingest(&duplicate) {
        Err(RiskError::Load(LoadError::DuplicateId { id })) => assert_eq!(id, "1"),
        other => panic!("Expected DuplicateId, got {:?}", other.map(|_| ())),
    }
    assert!(Arc::ptr_eq(&first, &pipeline.latest().unwrap()));
    Ok(())
}

#[test]
fn test_factor_prevalence_from_pipeline() -> Result<(), Box<dyn std::error::Error>> {
    let df = df!(
        "id" => &["1", "2", "3", "4"],
        "name" => &["A", "B", "C", "D"],
        "revenue" => &[1.0, 1.0, 1.0, 1.0],
        "signal" => &[0.9, 0.8, 0.2, 0.1],
        "support_calls" => &[9.0, 7.0, 1.0, 6.0],
    )?;
    // No importances reported: every configured factor is kept.
    let model = Arc::new(CountingModel {
        calls: AtomicUsize::new(0),
    });
    let pipeline = RiskPipelineBuilder::from_shared(model).build()?;
    let snapshot = pipeline.ingest(&df)?;

    let factors = snapshot.aggregate().factors();
    assert_eq!(factors.len(), 4);
    assert_eq!(factors[0].name(), "Support Issues");
    assert_eq!(*factors[0].prevalence_percent(), 75.0);
    assert!(factors[1..].iter().all(|f| *f.prevalence_percent() == 0.0));
    Ok(())
}
