//! Dataset loading: turns an uploaded table into validated [`ClientRecord`]s.
use crate::config::ColumnMapping;
use crate::error::LoadError;
use crate::types::{ClientRecord, Dataset, FeatureValue, Features};
use polars::prelude::*;
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

/// Reads a CSV file with a header row into a `DataFrame`.
pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<DataFrame, LoadError> {
    let df = LazyCsvReader::new(path.as_ref())
        .with_has_header(true)
        .finish()?
        .collect()?;
    Ok(df)
}

/// Reads a CSV file with every column as text, so ids like `007` and codes
/// like `02134` keep their exact spelling.
pub fn read_csv_as_text<P: AsRef<Path>>(path: P) -> Result<DataFrame, LoadError> {
    let df = LazyCsvReader::new(path.as_ref())
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .finish()?
        .collect()?;
    Ok(df)
}

/// Reads and validates a CSV file in one step. Feature cells are typed by
/// [`FeatureValue::parse`], not by polars' schema inference.
pub fn load_csv<P: AsRef<Path>>(path: P, columns: &ColumnMapping) -> Result<Dataset, LoadError> {
    let df = read_csv_as_text(path)?;
    load(&df, columns)
}

/// Parses and validates every row of `df`.
///
/// Rows keep their input order. Columns other than id, name, revenue and label
/// are kept as features, whatever their names. An empty table yields an empty
/// dataset.
///
/// # Errors
///
/// * `MissingColumn` if id, name or revenue is absent.
/// * `NoFeatureColumns` if nothing is left to score on.
/// * `DuplicateId` on the first repeated id.
/// * `MalformedField` for an empty id, a revenue that is not a non-negative
///   number, or an unrecognised label. Row indices are zero-based.
pub fn load(df: &DataFrame, columns: &ColumnMapping) -> Result<Dataset, LoadError> {
    for required in [&columns.id, &columns.name, &columns.revenue] {
        if df.column(required).is_err() {
            return Err(LoadError::MissingColumn(required.clone()));
        }
    }

    let feature_columns: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .filter(|name| !columns.is_structural(name))
        .collect();
    if feature_columns.is_empty() {
        return Err(LoadError::NoFeatureColumns);
    }

    let ids = string_cells(df, &columns.id)?;
    let names = string_cells(df, &columns.name)?;
    let revenues = string_cells(df, &columns.revenue)?;
    let labels = if df.column(&columns.label).is_ok() {
        Some(string_cells(df, &columns.label)?)
    } else {
        None
    };
    let feature_cells = feature_columns
        .iter()
        .map(|name| string_cells(df, name))
        .collect::<Result<Vec<_>, _>>()?;

    let mut seen = HashSet::with_capacity(df.height());
    let mut records = Vec::with_capacity(df.height());

    for row in 0..df.height() {
        let id = ids[row]
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| malformed(row, &columns.id, ids[row].as_deref()))?;
        if !seen.insert(id.to_string()) {
            return Err(LoadError::DuplicateId { id: id.to_string() });
        }

        let name = names[row].as_deref().unwrap_or_default();
        let revenue = parse_revenue(revenues[row].as_deref(), row, &columns.revenue)?;
        let label = match &labels {
            Some(cells) => parse_label(cells[row].as_deref(), row, &columns.label)?,
            None => None,
        };

        let mut features = Features::new();
        for (column, cells) in feature_columns.iter().zip(&feature_cells) {
            if let Some(raw) = cells[row].as_deref() {
                if !raw.trim().is_empty() {
                    features.insert(column.clone(), FeatureValue::parse(raw));
                }
            }
        }

        records.push(ClientRecord::new(id, name, revenue, features, label));
    }

    info!(
        rows = records.len(),
        features = feature_columns.len(),
        labeled = labels.is_some(),
        "Loaded client dataset"
    );
    Ok(Dataset::new(feature_columns, records))
}

/// Every cell of `column` rendered as text; nulls stay `None`.
fn string_cells(df: &DataFrame, column: &str) -> Result<Vec<Option<String>>, LoadError> {
    let series = df
        .column(column)?
        .as_materialized_series()
        .cast(&DataType::String)?;
    let cells = series
        .str()?
        .into_iter()
        .map(|opt| opt.map(str::to_string))
        .collect();
    Ok(cells)
}

fn malformed(row: usize, column: &str, value: Option<&str>) -> LoadError {
    LoadError::MalformedField {
        row,
        column: column.to_string(),
        value: value.unwrap_or_default().to_string(),
    }
}

fn parse_revenue(raw: Option<&str>, row: usize, column: &str) -> Result<f64, LoadError> {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
        .ok_or_else(|| malformed(row, column, raw))
}

fn parse_label(raw: Option<&str>, row: usize, column: &str) -> Result<Option<bool>, LoadError> {
    let Some(text) = raw else {
        return Ok(None);
    };
    match text.trim().to_ascii_lowercase().as_str() {
        "" => Ok(None),
        "true" | "yes" | "1" | "1.0" => Ok(Some(true)),
        "false" | "no" | "0" | "0.0" => Ok(Some(false)),
        _ => Err(malformed(row, column, raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn columns() -> ColumnMapping {
        ColumnMapping::default()
    }

    #[test]
    fn test_load_preserves_order_and_features() {
        let df = df!(
            "id" => &[3, 1, 2],
            "name" => &["Carol", "Alice", "Bob"],
            "revenue" => &[1200.0, 15000.0, 800.5],
            "support_calls" => &[4, 0, 9],
            "plan" => &["basic", "premium", "basic"],
        )
        .unwrap();

        let dataset = load(&df, &columns()).unwrap();
        let ids: Vec<&str> = dataset.records().iter().map(|r| r.id().as_str()).collect();
        assert_eq!(ids, vec!["3", "1", "2"]);
        assert_eq!(
            dataset.feature_columns(),
            &vec!["support_calls".to_string(), "plan".to_string()]
        );

        let carol = &dataset.records()[0];
        assert_eq!(*carol.revenue(), 1200.0);
        assert_eq!(
            carol.feature("support_calls"),
            Some(&FeatureValue::Numeric(4.0))
        );
        assert_eq!(
            carol.feature("plan"),
            Some(&FeatureValue::Categorical("basic".to_string()))
        );
        assert_eq!(*carol.ground_truth_label(), None);
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        let df = df!(
            "id" => &["a", "b", "a"],
            "name" => &["A", "B", "A again"],
            "revenue" => &[1.0, 2.0, 3.0],
            "tenure" => &[1.0, 2.0, 3.0],
        )
        .unwrap();

        match load(&df, &columns()) {
            Err(LoadError::DuplicateId { id }) => assert_eq!(id, "a"),
            other => panic!("Expected DuplicateId, got {:?}", other),
        }
    }

    #[test]
    fn test_negative_revenue_is_malformed() {
        let df = df!(
            "id" => &["a", "b"],
            "name" => &["A", "B"],
            "revenue" => &[10.0, -5.0],
            "tenure" => &[1.0, 2.0],
        )
        .unwrap();

        match load(&df, &columns()) {
            Err(LoadError::MalformedField { row, column, .. }) => {
                assert_eq!(row, 1);
                assert_eq!(column, "revenue");
            }
            other => panic!("Expected MalformedField, got {:?}", other),
        }
    }

    #[test]
    fn test_text_revenue_is_malformed() {
        let df = df!(
            "id" => &["a"],
            "name" => &["A"],
            "revenue" => &["lots"],
            "tenure" => &[1.0],
        )
        .unwrap();

        let err = load(&df, &columns()).unwrap_err();
        assert!(matches!(err, LoadError::MalformedField { row: 0, .. }));
        assert!(err.to_string().contains("lots"));
    }

    #[test]
    fn test_missing_required_column() {
        let df = df!(
            "id" => &["a"],
            "name" => &["A"],
            "tenure" => &[1.0],
        )
        .unwrap();

        match load(&df, &columns()) {
            Err(LoadError::MissingColumn(c)) => assert_eq!(c, "revenue"),
            other => panic!("Expected MissingColumn, got {:?}", other),
        }
    }

    #[test]
    fn test_no_feature_columns() {
        let df = df!(
            "id" => &["a"],
            "name" => &["A"],
            "revenue" => &[1.0],
        )
        .unwrap();

        assert!(matches!(
            load(&df, &columns()),
            Err(LoadError::NoFeatureColumns)
        ));
    }

    #[test]
    fn test_empty_table_is_valid() {
        let df = df!(
            "id" => Vec::<String>::new(),
            "name" => Vec::<String>::new(),
            "revenue" => Vec::<f64>::new(),
            "tenure" => Vec::<f64>::new(),
        )
        .unwrap();

        let dataset = load(&df, &columns()).unwrap();
        assert!(dataset.is_empty());
    }

    #[test]
    fn test_labels_and_nulls() {
        let df = df!(
            "id" => &["a", "b", "c"],
            "name" => &["A", "B", "C"],
            "revenue" => &[1.0, 2.0, 3.0],
            "tenure" => &[Some(4.0), None, Some(6.0)],
            "label" => &[Some(true), Some(false), None],
        )
        .unwrap();

        let dataset = load(&df, &columns()).unwrap();
        let records = dataset.records();
        assert_eq!(*records[0].ground_truth_label(), Some(true));
        assert_eq!(*records[1].ground_truth_label(), Some(false));
        assert_eq!(*records[2].ground_truth_label(), None);
        assert!(records[1].feature("tenure").is_none());
        assert!(records[0].feature("label").is_none());
        assert_eq!(dataset.labeled_count(), 2);
    }

    #[test]
    fn test_unrecognised_label_is_malformed() {
        let df = df!(
            "id" => &["a"],
            "name" => &["A"],
            "revenue" => &[1.0],
            "tenure" => &[1.0],
            "label" => &["maybe"],
        )
        .unwrap();

        assert!(matches!(
            load(&df, &columns()),
            Err(LoadError::MalformedField { .. })
        ));
    }

    #[test]
    fn test_custom_column_mapping() {
        let df = df!(
            "Client_ID" => &["c-1"],
            "Client_Name" => &["Acme"],
            "Monthly_Spend" => &[250.0],
            "Attrition_Risk" => &[1],
            "tenure" => &[3.0],
        )
        .unwrap();
        let mapping = ColumnMapping {
            id: "Client_ID".to_string(),
            name: "Client_Name".to_string(),
            revenue: "Monthly_Spend".to_string(),
            label: "Attrition_Risk".to_string(),
        };

        let dataset = load(&df, &mapping).unwrap();
        assert_eq!(dataset.feature_columns(), &vec!["tenure".to_string()]);
        assert_eq!(*dataset.records()[0].ground_truth_label(), Some(true));
    }

    #[test]
    fn test_csv_ids_and_codes_keep_their_text() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "id,name,revenue,location_code,tenure").unwrap();
        writeln!(file, "007,Bond,1000,02134,12").unwrap();
        writeln!(file, "7,Seven,2000,10001,3.5").unwrap();
        writeln!(file, "0012,Twelve,300,00501,").unwrap();
        file.flush().unwrap();

        let dataset = load_csv(file.path(), &columns()).unwrap();
        let ids: Vec<&str> = dataset.records().iter().map(|r| r.id().as_str()).collect();
        assert_eq!(ids, vec!["007", "7", "0012"]);

        let bond = &dataset.records()[0];
        assert_eq!(
            bond.feature("location_code"),
            Some(&FeatureValue::Categorical("02134".to_string()))
        );
        assert_eq!(bond.feature("tenure"), Some(&FeatureValue::Numeric(12.0)));
        assert_eq!(
            dataset.records()[1].feature("location_code"),
            Some(&FeatureValue::Numeric(10001.0))
        );
        assert!(dataset.records()[2].feature("tenure").is_none());
        assert_eq!(*dataset.records()[2].revenue(), 300.0);
    }
}
