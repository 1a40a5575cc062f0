//! Report assembly and export.
use crate::aggregate::PopulationAggregate;
use crate::config::RiskConfig;
use crate::error::RiskError;
use crate::metrics::PerformanceMetrics;
use crate::types::{RiskTier, ScoredClient, ScoringWarning};
use chrono::{DateTime, Utc};
use comfy_table::{Cell, Table};
use getset::Getters;
use polars::prelude::*;
use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Which clients a report lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    Complete,
    HighRiskOnly,
    HighValueOnly,
    /// Aggregate figures only, no client rows.
    ExecutiveSummary,
}

impl ReportType {
    fn includes(&self, client: &ScoredClient, high_value_threshold: f64) -> bool {
        match self {
            ReportType::Complete => true,
            ReportType::HighRiskOnly => *client.risk_tier() == RiskTier::High,
            ReportType::HighValueOnly => client.revenue() > high_value_threshold,
            ReportType::ExecutiveSummary => false,
        }
    }

    fn title(&self) -> &'static str {
        match self {
            ReportType::Complete => "Complete Client Risk Report",
            ReportType::HighRiskOnly => "High Risk Client Report",
            ReportType::HighValueOnly => "High Value Client Report",
            ReportType::ExecutiveSummary => "Executive Summary",
        }
    }
}

impl FromStr for ReportType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "complete" => Ok(ReportType::Complete),
            "high-risk" | "high_risk" => Ok(ReportType::HighRiskOnly),
            "high-value" | "high_value" => Ok(ReportType::HighValueOnly),
            "executive" | "executive-summary" | "executive_summary" => {
                Ok(ReportType::ExecutiveSummary)
            }
            other => Err(format!(
                "Unknown report type {:?} (expected complete, high-risk, high-value or executive)",
                other
            )),
        }
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.title())
    }
}

/// One entry of the ranked at-risk list.
#[derive(Debug, Clone, PartialEq, Getters, Serialize)]
#[getset(get = "pub")]
pub struct AtRiskClient {
    id: String,
    name: String,
    risk_probability: f64,
    predicted_churn: bool,
    /// Annualized revenue lost if a predicted churner leaves; zero otherwise.
    annual_revenue_loss: f64,
}

/// A finished report. Built from already computed results; assembling one
/// never rescores clients or recomputes metrics.
#[derive(Debug, Clone, PartialEq, Getters, Serialize)]
#[getset(get = "pub")]
pub struct Report {
    report_type: ReportType,
    generated_at: DateTime<Utc>,
    decision_threshold: f64,
    clients: Vec<ScoredClient>,
    /// Ids of every client the model could not score, whatever the filter.
    /// Empty for an executive summary, which only carries `flagged_count`.
    flagged_clients: Vec<String>,
    flagged_count: usize,
    top_at_risk: Vec<AtRiskClient>,
    metrics: Option<PerformanceMetrics>,
    aggregate: PopulationAggregate,
    /// Empty for an executive summary, which only carries `warning_count`.
    warnings: Vec<ScoringWarning>,
    warning_count: usize,
}

/// Assembles a report stamped with the current time.
pub fn assemble(
    report_type: ReportType,
    clients: &[ScoredClient],
    warnings: &[ScoringWarning],
    metrics: Option<&PerformanceMetrics>,
    aggregate: &PopulationAggregate,
    config: &RiskConfig,
) -> Report {
    assemble_at(
        report_type,
        clients,
        warnings,
        metrics,
        aggregate,
        config,
        Utc::now(),
    )
}

/// Like [`assemble`] with an explicit timestamp; the output is then fully
/// determined by the inputs.
pub fn assemble_at(
    report_type: ReportType,
    clients: &[ScoredClient],
    warnings: &[ScoringWarning],
    metrics: Option<&PerformanceMetrics>,
    aggregate: &PopulationAggregate,
    config: &RiskConfig,
    generated_at: DateTime<Utc>,
) -> Report {
    let rows: Vec<ScoredClient> = clients
        .iter()
        .filter(|c| report_type.includes(c, config.high_value_threshold))
        .cloned()
        .collect();
    let top_at_risk = rank_at_risk(&rows, config);
    let flagged_clients: Vec<String> = clients
        .iter()
        .filter(|c| !c.is_scored())
        .map(|c| c.id().to_string())
        .collect();
    let flagged_count = flagged_clients.len();
    let warning_count = warnings.len();
    let (flagged_clients, warnings) = if report_type == ReportType::ExecutiveSummary {
        (Vec::new(), Vec::new())
    } else {
        (flagged_clients, warnings.to_vec())
    };

    info!(
        report = %report_type,
        rows = rows.len(),
        top_at_risk = top_at_risk.len(),
        "Assembled report"
    );
    Report {
        report_type,
        generated_at,
        decision_threshold: config.decision_threshold,
        clients: rows,
        flagged_clients,
        flagged_count,
        top_at_risk,
        metrics: metrics.cloned(),
        aggregate: aggregate.clone(),
        warnings,
        warning_count,
    }
}

/// Scored clients by descending probability, ties in input order.
fn rank_at_risk(clients: &[ScoredClient], config: &RiskConfig) -> Vec<AtRiskClient> {
    let mut ranked: Vec<(&ScoredClient, f64)> = clients
        .iter()
        .filter_map(|c| (*c.risk_probability()).map(|p| (c, p)))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked
        .into_iter()
        .take(config.top_at_risk_limit)
        .map(|(client, p)| {
            let predicted_churn = p >= config.decision_threshold;
            AtRiskClient {
                id: client.id().to_string(),
                name: client.record().name().clone(),
                risk_probability: p,
                predicted_churn,
                annual_revenue_loss: if predicted_churn {
                    client.revenue() * config.revenue_periods_per_year
                } else {
                    0.0
                },
            }
        })
        .collect()
}

impl Report {
    /// Prints the report as console tables.
    pub fn summary(&self) {
        println!("{}", self.report_type.title());
        println!("========================================");
        println!("Generated: {}", self.generated_at.to_rfc3339());
        println!("Clients:   {}", self.aggregate.total_clients());
        if self.warning_count > 0 {
            println!("Unscored:  {} (see warnings)", self.warning_count);
        }
        println!();

        let mut tier_table = Table::new();
        tier_table.set_header(vec!["Risk Tier", "Clients", "Revenue"]);
        for tier in [RiskTier::High, RiskTier::Medium, RiskTier::Low, RiskTier::Unknown] {
            let bucket = self.aggregate.bucket(tier);
            tier_table.add_row(vec![
                Cell::new(tier),
                Cell::new(bucket.count),
                Cell::new(format!("{:.2}", bucket.revenue)),
            ]);
        }
        println!("Risk Distribution");
        println!("{}", tier_table);

        if let Some(metrics) = &self.metrics {
            let mut metrics_table = Table::new();
            metrics_table.set_header(vec!["Metric", "Value"]);
            for (name, value) in metric_rows(metrics) {
                metrics_table.add_row(vec![Cell::new(name), Cell::new(value)]);
            }
            println!("\nModel Performance");
            println!("{}", metrics_table);
        }

        if !self.aggregate.factors().is_empty() {
            let mut factor_table = Table::new();
            factor_table.set_header(vec!["Factor", "Feature", "Prevalence", "Importance"]);
            for factor in self.aggregate.factors() {
                factor_table.add_row(vec![
                    Cell::new(factor.name()),
                    Cell::new(factor.feature()),
                    Cell::new(format!("{:.1}%", factor.prevalence_percent())),
                    Cell::new(format_importance(*factor.importance())),
                ]);
            }
            println!("\nAttrition Factors");
            println!("{}", factor_table);
        }

        if !self.top_at_risk.is_empty() {
            let mut risk_table = Table::new();
            risk_table.set_header(vec![
                "Client ID",
                "Name",
                "Risk Probability",
                "Predicted Churn",
                "Annual Revenue Loss",
            ]);
            for client in &self.top_at_risk {
                risk_table.add_row(vec![
                    Cell::new(&client.id),
                    Cell::new(&client.name),
                    Cell::new(format!("{:.4}", client.risk_probability)),
                    Cell::new(if client.predicted_churn { "yes" } else { "no" }),
                    Cell::new(format!("{:.2}", client.annual_revenue_loss)),
                ]);
            }
            println!("\nTop {} At-Risk Clients", self.top_at_risk.len());
            println!("{}", risk_table);
        }
    }

    /// Exports the report to Markdown.
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        md.push_str(&format!("### {}\n\n", self.report_type.title()));
        md.push_str(&format!(
            "Generated {} for {} clients.\n\n",
            self.generated_at.to_rfc3339(),
            self.aggregate.total_clients()
        ));

        md.push_str("| Risk Tier | Clients | Revenue |\n");
        md.push_str("|---|---|---|\n");
        for tier in [RiskTier::High, RiskTier::Medium, RiskTier::Low, RiskTier::Unknown] {
            let bucket = self.aggregate.bucket(tier);
            md.push_str(&format!(
                "| {} | {} | {:.2} |\n",
                tier, bucket.count, bucket.revenue
            ));
        }

        if let Some(metrics) = &self.metrics {
            md.push_str("\n| Metric | Value |\n|---|---|\n");
            for (name, value) in metric_rows(metrics) {
                md.push_str(&format!("| {} | {} |\n", name, value));
            }
        }

        if !self.aggregate.factors().is_empty() {
            md.push_str("\n| Factor | Prevalence | Importance |\n|---|---|---|\n");
            for factor in self.aggregate.factors() {
                md.push_str(&format!(
                    "| {} | {:.1}% | {} |\n",
                    factor.name(),
                    factor.prevalence_percent(),
                    format_importance(*factor.importance())
                ));
            }
        }

        if !self.top_at_risk.is_empty() {
            md.push_str("\n| Client ID | Risk Probability | Predicted Churn | Annual Revenue Loss |\n");
            md.push_str("|---|---|---|---|\n");
            for client in &self.top_at_risk {
                md.push_str(&format!(
                    "| {} | {:.4} | {} | {:.2} |\n",
                    client.id,
                    client.risk_probability,
                    if client.predicted_churn { "yes" } else { "no" },
                    client.annual_revenue_loss
                ));
            }
        }

        if self.warning_count > 0 && self.warnings.is_empty() {
            md.push_str(&format!("\n**Scoring warnings:** {}\n", self.warning_count));
        }
        if !self.warnings.is_empty() {
            md.push_str("\n**Scoring warnings**\n\n");
            for warning in &self.warnings {
                md.push_str(&format!("- {}\n", warning));
            }
        }
        md
    }

    /// Exports the report to a JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// One row per listed client: id, name, revenue, probability, tier and
    /// predicted churn. Unscored clients have null probability and churn.
    pub fn to_dataframe(&self) -> Result<DataFrame, RiskError> {
        let ids: Vec<&str> = self.clients.iter().map(|c| c.id()).collect();
        let names: Vec<&str> = self
            .clients
            .iter()
            .map(|c| c.record().name().as_str())
            .collect();
        let revenues: Vec<f64> = self.clients.iter().map(|c| c.revenue()).collect();
        let probabilities: Vec<Option<f64>> =
            self.clients.iter().map(|c| *c.risk_probability()).collect();
        let tiers: Vec<String> = self
            .clients
            .iter()
            .map(|c| c.risk_tier().to_string())
            .collect();
        let churn: Vec<Option<bool>> = self
            .clients
            .iter()
            .map(|c| c.predicted_churn(self.decision_threshold))
            .collect();

        let df = df!(
            "id" => ids,
            "name" => names,
            "revenue" => revenues,
            "risk_probability" => probabilities,
            "risk_tier" => tiers,
            "predicted_churn" => churn,
        )?;
        Ok(df)
    }

    /// Writes [`Report::to_dataframe`] as CSV with a header row.
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), RiskError> {
        let mut df = self.to_dataframe()?;
        let mut file = File::create(path)?;
        CsvWriter::new(&mut file)
            .include_header(true)
            .finish(&mut df)?;
        Ok(())
    }
}

/// Display name and formatted value of each headline metric.
pub fn metric_rows(metrics: &PerformanceMetrics) -> Vec<(&'static str, String)> {
    let matrix = metrics.confusion_matrix();
    vec![
        ("Accuracy", format!("{:.4}", metrics.accuracy())),
        ("Precision", format!("{:.4}", metrics.precision())),
        ("Recall", format!("{:.4}", metrics.recall())),
        ("F1 Score", format!("{:.4}", metrics.f1_score())),
        (
            "AUC",
            metrics
                .auc()
                .map(|auc| format!("{:.4}", auc))
                .unwrap_or_else(|| "n/a".to_string()),
        ),
        (
            "Confusion Matrix",
            format!(
                "TP {} / FP {} / TN {} / FN {}",
                matrix.true_positive,
                matrix.false_positive,
                matrix.true_negative,
                matrix.false_negative
            ),
        ),
        ("Evaluated", metrics.evaluated().to_string()),
    ]
}

pub fn format_importance(importance: Option<f64>) -> String {
    importance
        .map(|w| format!("{:.4}", w))
        .unwrap_or_else(|| "-".to_string())
}
