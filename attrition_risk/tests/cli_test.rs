use assert_cmd::prelude::*;
use predicates::prelude::*;
use serde_json::Value;
use std::process::Command;
use tempfile::tempdir;

#[test]
fn test_score_complete_report() {
    let mut cmd = Command::cargo_bin("attrition-cli").unwrap();
    cmd.arg("score")
        .arg("--data")
        .arg("tests/data/clients.csv")
        .arg("--model")
        .arg("tests/data/model.json");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Complete Client Risk Report"))
        .stdout(predicate::str::contains("Risk Distribution"))
        .stdout(predicate::str::contains("Model Performance"))
        .stdout(predicate::str::contains("Support Issues"))
        .stdout(predicate::str::contains("Top 8 At-Risk Clients"));
}

#[test]
fn test_score_exports() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let json_path = dir.path().join("report.json");
    let csv_path = dir.path().join("clients.csv");
    let md_path = dir.path().join("report.md");
    let html_path = dir.path().join("report.html");

    let mut cmd = Command::cargo_bin("attrition-cli")?;
    cmd.arg("score")
        .arg("--data")
        .arg("tests/data/clients.csv")
        .arg("--model")
        .arg("tests/data/model.json")
        .arg("--config")
        .arg("tests/data/config.json")
        .arg("--report")
        .arg("high-risk")
        .arg("--output-json")
        .arg(&json_path)
        .arg("--output-csv")
        .arg(&csv_path)
        .arg("--output-markdown")
        .arg(&md_path)
        .arg("--output-html")
        .arg(&html_path);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("High Risk Client Report"));

    let json: Value = serde_json::from_str(&std::fs::read_to_string(&json_path)?)?;
    assert_eq!(json["report_type"], "high_risk_only");
    let clients = json["clients"].as_array().unwrap();
    assert!(!clients.is_empty());
    assert!(clients.iter().all(|c| c["risk_tier"] == "High"));
    assert!(json["top_at_risk"].as_array().unwrap().len() <= 5);

    let csv = std::fs::read_to_string(&csv_path)?;
    let header = csv.lines().next().unwrap();
    assert!(header.contains("risk_probability"));
    assert_eq!(csv.lines().count(), clients.len() + 1);

    assert!(std::fs::read_to_string(&md_path)?.starts_with("### High Risk Client Report"));
    let html = std::fs::read_to_string(&html_path)?;
    assert!(html.contains("<title>High Risk Client Report</title>"));
    assert!(html.contains(&format!("<tr><td>High</td><td>{}</td>", clients.len())));
    assert!(!html.contains("<!-- tier_rows -->"));
    assert!(!html.contains("{{"));
    Ok(())
}

#[test]
fn test_score_unlabeled_with_unscorable_row() {
    let mut cmd = Command::cargo_bin("attrition-cli").unwrap();
    cmd.arg("score")
        .arg("--data")
        .arg("tests/data/unlabeled.csv")
        .arg("--model")
        .arg("tests/data/model.json")
        .arg("--report")
        .arg("executive");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Executive Summary"))
        .stdout(predicate::str::contains("Unscored:  1"))
        .stdout(predicate::str::contains("Model Performance").not())
        .stderr(predicate::str::contains("Warning: row 2 (client 13)"));
}

#[test]
fn test_evaluate() {
    let mut cmd = Command::cargo_bin("attrition-cli").unwrap();
    cmd.arg("evaluate")
        .arg("--data")
        .arg("tests/data/clients.csv")
        .arg("--model")
        .arg("tests/data/model.json")
        .arg("--decision-threshold")
        .arg("0.5");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Model Performance (threshold 0.5)"))
        .stdout(predicate::str::contains("Accuracy"))
        .stdout(predicate::str::contains("AUC"))
        .stdout(predicate::str::contains("Confusion Matrix"));
}

#[test]
fn test_evaluate_without_labels_fails() {
    let mut cmd = Command::cargo_bin("attrition-cli").unwrap();
    cmd.arg("evaluate")
        .arg("--data")
        .arg("tests/data/unlabeled.csv")
        .arg("--model")
        .arg("tests/data/model.json");

    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Error: Evaluation needs a label"));
}

#[test]
fn test_train_writes_model() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let model_path = dir.path().join("model.json");

    let mut cmd = Command::cargo_bin("attrition-cli")?;
    cmd.arg("train")
        .arg("--data")
        .arg("tests/data/clients.csv")
        .arg("--predictors")
        .arg("support_calls,tenure")
        .arg("--categorical")
        .arg("plan")
        .arg("--output")
        .arg(&model_path);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Logistic Risk Model (8 rows)"))
        .stdout(predicate::str::contains("plan=premium"))
        .stdout(predicate::str::contains("Model saved to"));

    let model: Value = serde_json::from_str(&std::fs::read_to_string(&model_path)?)?;
    assert!(model["intercept"].is_number());
    assert_eq!(model["terms"].as_array().unwrap().len(), 4);

    // The freshly trained model scores the same table.
    let mut score = Command::cargo_bin("attrition-cli")?;
    score
        .arg("score")
        .arg("--data")
        .arg("tests/data/clients.csv")
        .arg("--model")
        .arg(&model_path);
    score.assert().success();
    Ok(())
}

#[test]
fn test_diagnose() {
    let mut cmd = Command::cargo_bin("attrition-cli").unwrap();
    cmd.arg("diagnose").arg("--data").arg("tests/data/unlabeled.csv");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Dataset Diagnostics (4 rows)"))
        .stdout(predicate::str::contains("Missing %"))
        .stdout(predicate::str::contains("25.00"))
        .stdout(predicate::str::contains("Numeric Columns"));
}

#[test]
fn test_unknown_report_type() {
    let mut cmd = Command::cargo_bin("attrition-cli").unwrap();
    cmd.arg("score")
        .arg("--data")
        .arg("tests/data/clients.csv")
        .arg("--model")
        .arg("tests/data/model.json")
        .arg("--report")
        .arg("everything");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Unknown report type"));
}

#[test]
fn test_missing_data_file() {
    let mut cmd = Command::cargo_bin("attrition-cli").unwrap();
    cmd.arg("score")
        .arg("--data")
        .arg("tests/data/does_not_exist.csv")
        .arg("--model")
        .arg("tests/data/model.json");

    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Error:"));
}
