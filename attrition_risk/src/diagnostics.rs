//! Data quality checks on an uploaded table, run before scoring.
use comfy_table::{Cell, Table};
use getset::Getters;
use polars::prelude::*;
use serde::Serialize;

/// Share of null cells in one column.
#[derive(Debug, Clone, PartialEq, Getters, Serialize)]
#[getset(get = "pub")]
pub struct MissingValues {
    column: String,
    missing: usize,
    /// Percentage of rows, rounded to two decimals.
    missing_percent: f64,
}

/// Summary statistics of one numeric column. Nulls are ignored; statistics
/// are `None` for a column with no values.
#[derive(Debug, Clone, PartialEq, Getters, Serialize)]
#[getset(get = "pub")]
pub struct ColumnSummary {
    column: String,
    mean: Option<f64>,
    median: Option<f64>,
    /// Sample standard deviation (n - 1 denominator).
    std_dev: Option<f64>,
}

/// Full diagnostics report for a table.
#[derive(Debug, Clone, PartialEq, Getters, Serialize)]
#[getset(get = "pub")]
pub struct DatasetDiagnostics {
    rows: usize,
    missing: Vec<MissingValues>,
    numeric: Vec<ColumnSummary>,
}

/// Null counts for every column, in table order.
pub fn missing_summary(df: &DataFrame) -> Vec<MissingValues> {
    let rows = df.height();
    df.get_columns()
        .iter()
        .map(|column| {
            let missing = column.null_count();
            let percent = if rows == 0 {
                0.0
            } else {
                100.0 * missing as f64 / rows as f64
            };
            MissingValues {
                column: column.name().to_string(),
                missing,
                missing_percent: (percent * 100.0).round() / 100.0,
            }
        })
        .collect()
}

/// Mean, median and standard deviation of every numeric column.
pub fn column_summary(df: &DataFrame) -> PolarsResult<Vec<ColumnSummary>> {
    let mut summaries = Vec::new();
    for column in df.get_columns() {
        if !is_numeric(column.dtype()) {
            continue;
        }
        let values = column
            .as_materialized_series()
            .cast(&DataType::Float64)?;
        let values = values.f64()?;
        summaries.push(ColumnSummary {
            column: column.name().to_string(),
            mean: values.mean(),
            median: values.median(),
            std_dev: values.std(1),
        });
    }
    Ok(summaries)
}

/// Runs every check on `df`.
pub fn diagnose(df: &DataFrame) -> PolarsResult<DatasetDiagnostics> {
    Ok(DatasetDiagnostics {
        rows: df.height(),
        missing: missing_summary(df),
        numeric: column_summary(df)?,
    })
}

fn is_numeric(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

fn format_stat(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.4}", v))
        .unwrap_or_else(|| "-".to_string())
}

impl DatasetDiagnostics {
    /// Prints the diagnostics as console tables.
    pub fn summary(&self) {
        println!("Dataset Diagnostics ({} rows)", self.rows);
        println!("========================================");

        let mut missing_table = Table::new();
        missing_table.set_header(vec!["Column", "Missing", "Missing %"]);
        for entry in &self.missing {
            missing_table.add_row(vec![
                Cell::new(&entry.column),
                Cell::new(entry.missing),
                Cell::new(format!("{:.2}", entry.missing_percent)),
            ]);
        }
        println!("{}", missing_table);

        let mut stats_table = Table::new();
        stats_table.set_header(vec!["Column", "Mean", "Median", "Std. Dev."]);
        for entry in &self.numeric {
            stats_table.add_row(vec![
                Cell::new(&entry.column),
                Cell::new(format_stat(entry.mean)),
                Cell::new(format_stat(entry.median)),
                Cell::new(format_stat(entry.std_dev)),
            ]);
        }
        println!("\nNumeric Columns");
        println!("{}", stats_table);
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
