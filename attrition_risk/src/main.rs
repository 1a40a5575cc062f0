use anyhow::{Context, Result};
use attrition_risk::report::{format_importance, metric_rows};
use attrition_risk::{
    diagnostics, loader, FitOptions, LogisticRiskModel, Report, ReportType, RiskConfig,
    RiskError, RiskPipelineBuilder, RiskTier,
};
use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table};
use std::path::{Path, PathBuf};
use tracing::info;

/// Pre-formatted values for the HTML report template.
struct ReportData {
    title: String,
    generated_at: String,
    total_clients: String,
    revenue_at_risk: String,
    tiers: Vec<[String; 3]>,
    metrics: Vec<[String; 2]>,
    factors: Vec<[String; 3]>,
    clients: Vec<[String; 5]>,
}

impl ReportData {
    fn from_report(report: &Report) -> Self {
        let aggregate = report.aggregate();
        let tiers = [RiskTier::High, RiskTier::Medium, RiskTier::Low, RiskTier::Unknown]
            .into_iter()
            .map(|tier| {
                let bucket = aggregate.bucket(tier);
                [
                    tier.to_string(),
                    bucket.count.to_string(),
                    format!("{:.2}", bucket.revenue),
                ]
            })
            .collect();
        let metrics = report
            .metrics()
            .as_ref()
            .map(|m| {
                metric_rows(m)
                    .into_iter()
                    .map(|(name, value)| [name.to_string(), value])
                    .collect()
            })
            .unwrap_or_default();
        let factors = aggregate
            .factors()
            .iter()
            .map(|f| {
                [
                    f.name().clone(),
                    format!("{:.1}%", f.prevalence_percent()),
                    format_importance(*f.importance()),
                ]
            })
            .collect();
        let clients = report
            .top_at_risk()
            .iter()
            .map(|c| {
                [
                    c.id().clone(),
                    c.name().clone(),
                    format!("{:.4}", c.risk_probability()),
                    if *c.predicted_churn() { "yes" } else { "no" }.to_string(),
                    format!("{:.2}", c.annual_revenue_loss()),
                ]
            })
            .collect();

        Self {
            title: report.report_type().to_string(),
            generated_at: report.generated_at().to_rfc3339(),
            total_clients: aggregate.total_clients().to_string(),
            revenue_at_risk: format!("{:.2}", aggregate.revenue_at_risk()),
            tiers,
            metrics,
            factors,
            clients,
        }
    }

    fn render(&self) -> String {
        let template = include_str!("../templates/report.html");
        template
            .replace("{{ title }}", &escape_html(&self.title))
            .replace("{{ generated_at }}", &self.generated_at)
            .replace("{{ total_clients }}", &self.total_clients)
            .replace("{{ revenue_at_risk }}", &self.revenue_at_risk)
            .replace("<!-- tier_rows -->", &table_rows(&self.tiers))
            .replace("<!-- metric_rows -->", &table_rows(&self.metrics))
            .replace("<!-- factor_rows -->", &table_rows(&self.factors))
            .replace("<!-- client_rows -->", &table_rows(&self.clients))
    }
}

fn table_rows<const N: usize>(rows: &[[String; N]]) -> String {
    let mut html = String::new();
    for row in rows {
        html.push_str("<tr>");
        for cell in row {
            html.push_str(&format!("<td>{}</td>", escape_html(cell)));
        }
        html.push_str("</tr>");
    }
    html
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Client attrition risk scoring", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Score a client table and print or export a report
    Score(ScoreArgs),
    /// Score a labeled client table and print model performance
    Evaluate(EvaluateArgs),
    /// Fit a logistic risk model on a labeled client table
    Train(TrainArgs),
    /// Print missing-value and summary statistics for a table
    Diagnose(DiagnoseArgs),
}

#[derive(Parser, Debug)]
struct ScoreArgs {
    /// Path to the input CSV data file
    #[arg(short, long)]
    data: PathBuf,

    /// Path to a model JSON file written by `train`
    #[arg(short, long)]
    model: PathBuf,

    /// Path to a JSON configuration file (thresholds, factors, column names)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Report type [choices: complete, high-risk, high-value, executive]
    #[arg(long, default_value = "complete")]
    report: ReportType,

    /// Path to export the report as JSON
    #[arg(long)]
    output_json: Option<PathBuf>,

    /// Path to export the report as Markdown
    #[arg(long)]
    output_markdown: Option<PathBuf>,

    /// Path to export the report as HTML
    #[arg(long)]
    output_html: Option<PathBuf>,

    /// Path to export the listed clients as CSV
    #[arg(long)]
    output_csv: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct EvaluateArgs {
    /// Path to the input CSV data file; every row needs a label
    #[arg(short, long)]
    data: PathBuf,

    /// Path to a model JSON file written by `train`
    #[arg(short, long)]
    model: PathBuf,

    /// Path to a JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Probability at or above which a client is predicted to churn
    #[arg(long)]
    decision_threshold: Option<f64>,

    /// Path to export the metrics as JSON
    #[arg(long)]
    output_json: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct TrainArgs {
    /// Path to the labeled training CSV file
    #[arg(short, long)]
    data: PathBuf,

    /// A comma-separated string of numeric predictor columns
    #[arg(long, value_delimiter = ',')]
    predictors: Vec<String>,

    /// A comma-separated string of categorical predictor columns
    #[arg(long, value_delimiter = ',')]
    categorical: Option<Vec<String>>,

    /// Path to a JSON configuration file (column names)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to write the fitted model JSON
    #[arg(short, long)]
    output: PathBuf,

    /// Maximum Newton-Raphson iterations
    #[arg(long, default_value_t = 100)]
    max_iter: usize,

    /// Convergence tolerance on the coefficient update
    #[arg(long, default_value_t = 1e-6)]
    tol: f64,

    /// L2 penalty on slope coefficients
    #[arg(long, default_value_t = 1.0)]
    l2_penalty: f64,
}

#[derive(Parser, Debug)]
struct DiagnoseArgs {
    /// Path to the input CSV data file
    #[arg(short, long)]
    data: PathBuf,

    /// Path to export the diagnostics as JSON
    #[arg(long)]
    output_json: Option<PathBuf>,
}

fn load_config(path: Option<&Path>) -> Result<RiskConfig> {
    match path {
        Some(path) => RiskConfig::from_path(path)
            .with_context(|| format!("Invalid configuration {}", path.display())),
        None => Ok(RiskConfig::default()),
    }
}

fn load_model(path: &Path) -> Result<LogisticRiskModel> {
    LogisticRiskModel::from_path(path)
        .with_context(|| format!("Failed to load model {}", path.display()))
}

fn run_score(args: ScoreArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let model = load_model(&args.model)?;
    let pipeline = RiskPipelineBuilder::new(model).config(config).build()?;

    let snapshot = pipeline.ingest_csv(&args.data)?;
    for warning in snapshot.warnings() {
        eprintln!("Warning: {}", warning);
    }

    let report = pipeline.report(args.report)?;
    report.summary();
    if let Some(path) = args.output_json {
        std::fs::write(&path, report.to_json()?)?;
        info!(path = %path.display(), "Wrote JSON report");
    }
    if let Some(path) = args.output_markdown {
        std::fs::write(&path, report.to_markdown())?;
        info!(path = %path.display(), "Wrote Markdown report");
    }
    if let Some(path) = args.output_html {
        std::fs::write(&path, ReportData::from_report(&report).render())?;
        info!(path = %path.display(), "Wrote HTML report");
    }
    if let Some(path) = args.output_csv {
        report.write_csv(&path)?;
        info!(path = %path.display(), "Wrote client CSV");
    }
    Ok(())
}

fn run_evaluate(args: EvaluateArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(threshold) = args.decision_threshold {
        config.decision_threshold = threshold;
    }
    let model = load_model(&args.model)?;
    let pipeline = RiskPipelineBuilder::new(model).config(config).build()?;

    pipeline.ingest_csv(&args.data)?;
    let metrics = match pipeline.evaluate() {
        Err(RiskError::InsufficientLabels { labeled, total }) => {
            anyhow::bail!(
                "Evaluation needs a label on every scored row ({} of {} labeled); use `score` for unlabeled data",
                labeled,
                total
            );
        }
        other => other?,
    };

    let matrix = metrics.confusion_matrix();
    let mut table = Table::new();
    table.set_header(vec!["Metric", "Value"]);
    table.add_row(vec![Cell::new("Accuracy"), Cell::new(format!("{:.4}", metrics.accuracy()))]);
    table.add_row(vec![Cell::new("Precision"), Cell::new(format!("{:.4}", metrics.precision()))]);
    table.add_row(vec![Cell::new("Recall"), Cell::new(format!("{:.4}", metrics.recall()))]);
    table.add_row(vec![Cell::new("F1 Score"), Cell::new(format!("{:.4}", metrics.f1_score()))]);
    table.add_row(vec![
        Cell::new("AUC"),
        Cell::new(
            metrics
                .auc()
                .map(|auc| format!("{:.4}", auc))
                .unwrap_or_else(|| "n/a".to_string()),
        ),
    ]);
    println!("Model Performance (threshold {})", metrics.decision_threshold());
    println!("{}", table);

    let mut confusion = Table::new();
    confusion.set_header(vec!["", "Actual churn", "Actual stay"]);
    confusion.add_row(vec![
        Cell::new("Predicted churn"),
        Cell::new(matrix.true_positive),
        Cell::new(matrix.false_positive),
    ]);
    confusion.add_row(vec![
        Cell::new("Predicted stay"),
        Cell::new(matrix.false_negative),
        Cell::new(matrix.true_negative),
    ]);
    println!("\nConfusion Matrix");
    println!("{}", confusion);

    if let Some(path) = args.output_json {
        std::fs::write(&path, serde_json::to_string_pretty(&metrics)?)?;
    }
    Ok(())
}

fn run_train(args: TrainArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let dataset = loader::load_csv(&args.data, &config.columns)?;

    let predictors: Vec<&str> = args.predictors.iter().map(AsRef::as_ref).collect();
    let categorical_predictors: Vec<&str> = args
        .categorical
        .as_ref()
        .map(|v| v.iter().map(AsRef::as_ref).collect())
        .unwrap_or_else(Vec::new);
    if predictors.is_empty() && categorical_predictors.is_empty() {
        anyhow::bail!("At least one predictor is required");
    }

    let options = FitOptions {
        max_iter: args.max_iter,
        tol: args.tol,
        l2_penalty: args.l2_penalty,
    };
    let model = LogisticRiskModel::fit(&dataset, &predictors, &categorical_predictors, options)?;
    model.save(&args.output)?;

    let mut table = Table::new();
    table.set_header(vec!["Term", "Coefficient"]);
    table.add_row(vec![
        Cell::new("(intercept)"),
        Cell::new(format!("{:.4}", model.intercept)),
    ]);
    for term in &model.terms {
        let name = match &term.category {
            Some(category) => format!("{}={}", term.feature, category),
            None => term.feature.clone(),
        };
        table.add_row(vec![
            Cell::new(name),
            Cell::new(format!("{:.4}", term.coefficient)),
        ]);
    }
    println!("Logistic Risk Model ({} rows)", dataset.len());
    println!("{}", table);
    println!("Model saved to: {}", args.output.display());
    Ok(())
}

fn run_diagnose(args: DiagnoseArgs) -> Result<()> {
    let df = loader::read_csv(&args.data)?;
    let report = diagnostics::diagnose(&df)?;
    report.summary();
    if let Some(path) = args.output_json {
        std::fs::write(path, report.to_json()?)?;
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Score(args) => run_score(args),
        Commands::Evaluate(args) => run_evaluate(args),
        Commands::Train(args) => run_train(args),
        Commands::Diagnose(args) => run_diagnose(args),
    };
    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
