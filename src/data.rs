//! Customer record tables: CSV load/save and typed column access on Polars
//! DataFrames

use crate::error::{ChurnError, Result};
use polars::prelude::*;
use std::fs::File;
use std::path::Path;
use tracing::{error, info};

/// Whether a column holds text values awaiting coercion or encoding
pub fn is_text(series: &Series) -> bool {
    matches!(series.dtype(), DataType::String)
}

/// Bring every column to `Float64` (NaN becomes null) or `String`
///
/// The cleaning and encoding steps only deal with these two kinds of column.
pub fn normalize_columns(df: &DataFrame) -> Result<DataFrame> {
    let columns = df
        .get_columns()
        .iter()
        .map(|series| {
            if series.dtype().is_numeric() {
                let values = series.cast(&DataType::Float64)?;
                let without_nan: Float64Chunked = values
                    .f64()?
                    .into_iter()
                    .map(|v| v.filter(|x| !x.is_nan()))
                    .collect();
                Ok(without_nan.with_name(series.name()).into_series())
            } else if is_text(series) {
                Ok(series.clone())
            } else {
                Ok(series.cast(&DataType::String)?)
            }
        })
        .collect::<Result<Vec<Series>>>()?;
    Ok(DataFrame::new(columns)?)
}

/// Values of a numeric column as `f64`, `None` when absent or textual
pub fn numeric_values(df: &DataFrame, name: &str) -> Option<Vec<Option<f64>>> {
    let series = df.column(name).ok().filter(|s| s.dtype().is_numeric())?;
    let values = series.cast(&DataType::Float64).ok()?;
    let values = values.f64().ok()?.into_iter().collect();
    Some(values)
}

/// Values of a text column, `None` when absent or numeric
pub fn text_values(df: &DataFrame, name: &str) -> Option<Vec<Option<String>>> {
    let series = df.column(name).ok().filter(|s| is_text(s))?;
    let values = series
        .str()
        .ok()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect();
    Some(values)
}

pub(crate) fn row_indices(rows: &[usize]) -> IdxCa {
    IdxCa::from_vec("rows", rows.iter().map(|&r| r as IdxSize).collect())
}

/// New frame holding only `rows`, in that order
pub fn take_rows(df: &DataFrame, rows: &[usize]) -> Result<DataFrame> {
    Ok(df.take(&row_indices(rows))?)
}

/// Missing value count for one column
#[derive(Debug, Clone, PartialEq)]
pub struct MissingReport {
    pub column: String,
    pub missing: usize,
    pub percentage: f64,
}

/// Columns with missing values, most missing first
pub fn check_missing_values(df: &DataFrame) -> Vec<MissingReport> {
    let height = df.height().max(1) as f64;
    let mut reports: Vec<MissingReport> = df
        .get_columns()
        .iter()
        .filter(|s| s.null_count() > 0)
        .map(|s| MissingReport {
            column: s.name().to_string(),
            missing: s.null_count(),
            percentage: 100.0 * s.null_count() as f64 / height,
        })
        .collect();
    reports.sort_by(|a, b| b.missing.cmp(&a.missing));

    if reports.is_empty() {
        info!("No missing values found");
    }
    reports
}

/// Load a CSV file into a normalized DataFrame
///
/// Numeric columns inferred by Polars become `Float64`, everything else is
/// kept as text for the cleaning step to coerce.
pub fn load_dataframe(file_path: impl AsRef<Path>) -> Result<DataFrame> {
    let path = file_path.as_ref();
    let result = read_csv(path);
    match &result {
        Ok(df) => info!(
            path = %path.display(),
            rows = df.height(),
            columns = df.width(),
            "Loaded data"
        ),
        Err(e) => error!(path = %path.display(), error = %e, "Error loading data"),
    }
    result
}

fn read_csv(path: &Path) -> Result<DataFrame> {
    if !path.exists() {
        return Err(ChurnError::MissingFile(path.to_path_buf()));
    }
    let file = File::open(path)?;
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(1000))
        .into_reader_with_file_handle(file)
        .finish()
        .map_err(|e| match e {
            PolarsError::NoData(msg) => ChurnError::EmptyDataset(msg.to_string()),
            other => other.into(),
        })?;

    if df.height() == 0 {
        return Err(ChurnError::EmptyDataset(format!(
            "{} has no data rows",
            path.display()
        )));
    }
    normalize_columns(&df)
}

pub(crate) fn write_polars_csv(df: &mut DataFrame, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file).include_header(true).finish(df)?;
    Ok(())
}

/// Save a frame to CSV, logging the outcome
///
/// Returns `false` instead of an error so a caller can carry on with other
/// exports.
pub fn save_dataframe(df: &DataFrame, file_path: impl AsRef<Path>, description: &str) -> bool {
    let path = file_path.as_ref();
    let mut df = df.clone();
    match write_polars_csv(&mut df, path) {
        Ok(()) => {
            info!(path = %path.display(), "{} saved", description);
            true
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "Error saving {}", description);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    fn create_test_csv() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "customerID,tenure,MonthlyCharges,TotalCharges,Contract,Churn").unwrap();
        writeln!(file, "0001-A,1,29.85,29.85,Month-to-month,No").unwrap();
        writeln!(file, "0002-B,34,56.95,1889.5,One year,No").unwrap();
        writeln!(file, "0003-C,2,53.85, ,Month-to-month,Yes").unwrap();
        file
    }

    #[test]
    fn test_load_dataframe() {
        let file = create_test_csv();
        let df = load_dataframe(file.path()).unwrap();

        assert_eq!(df.shape(), (3, 6));
        assert_eq!(df.column("tenure").unwrap().dtype(), &DataType::Float64);
        // blank TotalCharges keeps the column textual until cleaning
        assert!(is_text(df.column("TotalCharges").unwrap()));
        assert_eq!(text_values(&df, "Churn").unwrap()[2].as_deref(), Some("Yes"));
        assert!(numeric_values(&df, "Churn").is_none());
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_dataframe("/definitely/not/here.csv").unwrap_err();
        assert!(matches!(err, ChurnError::MissingFile(_)));
        assert!(err.is_input_error());
    }

    #[test]
    fn test_load_empty_dataset() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "a,b").unwrap();
        let err = load_dataframe(file.path()).unwrap_err();
        assert!(matches!(err, ChurnError::EmptyDataset(_)));
    }

    #[test]
    fn test_save_and_reload() {
        let df = df!(
            "tenure" => &[1.0, 12.0],
            "Contract" => &["Month-to-month", "Two year"]
        )
        .unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("clean.csv");
        assert!(save_dataframe(&df, &path, "Cleaned dataset"));

        let reloaded = load_dataframe(&path).unwrap();
        assert_eq!(reloaded.shape(), (2, 2));
        assert_eq!(numeric_values(&reloaded, "tenure").unwrap(), vec![Some(1.0), Some(12.0)]);
    }

    #[test]
    fn test_save_reports_failure() {
        let df = df!("x" => &[1.0]).unwrap();
        let dir = tempdir().unwrap();
        // a directory cannot be opened as a file
        assert!(!save_dataframe(&df, dir.path(), "Broken"));
    }

    #[test]
    fn test_ragged_columns_name_the_column() {
        let err = DataFrame::new(vec![
            Series::new("a", &[1.0, 2.0]),
            Series::new("short", &[1.0]),
        ])
        .map_err(ChurnError::from)
        .unwrap_err();
        assert!(err.to_string().contains("\"short\""));
    }

    #[test]
    fn test_normalize_and_take_rows() {
        let df = df!(
            "count" => &[3i64, 1, 2],
            "ratio" => &[Some(0.5), Some(f64::NAN), None],
            "active" => &[true, false, true]
        )
        .unwrap();
        let df = normalize_columns(&df).unwrap();

        assert_eq!(df.column("count").unwrap().dtype(), &DataType::Float64);
        assert!(is_text(df.column("active").unwrap()));
        // NaN is carried as missing
        assert_eq!(df.column("ratio").unwrap().null_count(), 2);

        let taken = take_rows(&df, &[2, 0]).unwrap();
        assert_eq!(numeric_values(&taken, "count").unwrap(), vec![Some(2.0), Some(3.0)]);
    }

    #[test]
    fn test_check_missing_values() {
        let df = df!(
            "a" => &[Some(1.0), None, None, Some(4.0)],
            "b" => &[None, Some("x"), Some("y"), Some("z")],
            "c" => &[1.0, 2.0, 3.0, 4.0]
        )
        .unwrap();

        let report = check_missing_values(&df);
        assert_eq!(report.len(), 2);
        assert_eq!(report[0].column, "a");
        assert_eq!(report[0].missing, 2);
        assert!((report[0].percentage - 50.0).abs() < 1e-9);
        assert_eq!(report[1].column, "b");
    }
}
