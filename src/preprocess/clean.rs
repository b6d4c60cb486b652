//! Row deduplication, numeric coercion, imputation and target label mapping

use crate::config::{CleaningConfig, ColumnNames};
use crate::data::is_text;
use crate::error::Result;
use polars::prelude::*;
use std::collections::HashMap;
use tracing::{debug, info, warn};

const ROW_INDEX: &str = "__row_index";

/// Output of [`Cleaner::clean`]
#[derive(Debug, Clone)]
pub struct Cleaned {
    pub frame: DataFrame,
    /// Positions (in the input) of the rows that survived deduplication
    pub kept_rows: Vec<usize>,
    /// Text columns converted to numeric
    pub coerced: Vec<String>,
}

/// Cleaning step of the preprocessor
#[derive(Debug, Clone, Default)]
pub struct Cleaner {
    columns: ColumnNames,
    config: CleaningConfig,
}

impl Cleaner {
    pub fn new(columns: ColumnNames, config: CleaningConfig) -> Self {
        Self { columns, config }
    }

    /// Deduplicate, coerce numeric-looking text, impute, map the target and
    /// drop the identifier column.
    ///
    /// Target labels outside the positive/negative dictionary are left
    /// missing here; the pipeline decides what to do with them.
    pub fn clean(&self, frame: &DataFrame, target: Option<&str>) -> Result<Cleaned> {
        self.clean_with_numeric(frame, target, &[])
    }

    /// [`Cleaner::clean`], additionally forcing `numeric` columns to numbers
    /// whatever share of their values parses
    pub fn clean_with_numeric(
        &self,
        frame: &DataFrame,
        target: Option<&str>,
        numeric: &[String],
    ) -> Result<Cleaned> {
        info!("Starting data cleaning");
        let rows_before = frame.height();
        let (mut frame, kept_rows) = drop_duplicates(frame)?;
        info!(
            rows_before,
            rows_after = frame.height(),
            "Removed {} duplicate rows",
            rows_before - frame.height()
        );

        let target = target.filter(|t| frame.column(t).is_ok());
        let skip: Vec<&str> = target.into_iter().chain([self.columns.id.as_str()]).collect();

        let known: Vec<&str> = self
            .columns
            .known_numeric()
            .into_iter()
            .chain(numeric.iter().map(String::as_str))
            .collect();
        let coerced = coerce_numeric_columns(&mut frame, self.config.numeric_threshold, &known, &skip)?;
        if !coerced.is_empty() {
            debug!(columns = ?coerced, "Coerced text columns to numeric");
        }
        impute_missing(&mut frame, &skip)?;

        if let Some(target) = target {
            self.map_target_column(&mut frame, target)?;
        }

        if frame.drop_in_place(&self.columns.id).is_ok() {
            debug!(column = %self.columns.id, "Dropped identifier column");
        }

        info!(
            rows = frame.height(),
            columns = frame.width(),
            "Data cleaning completed"
        );
        Ok(Cleaned {
            frame,
            kept_rows,
            coerced,
        })
    }

    fn map_target_column(&self, frame: &mut DataFrame, target: &str) -> Result<()> {
        let column = frame.column(target)?;
        if !is_text(column) {
            return Ok(());
        }
        let labels = column.str()?;
        let mapped = map_target_labels(
            labels,
            &self.config.positive_label,
            &self.config.negative_label,
        );
        let unmapped = mapped.null_count() - labels.null_count();
        if unmapped > 0 {
            warn!(column = target, unmapped, "Target labels left unmapped");
        }
        frame.with_column(mapped.into_series())?;
        Ok(())
    }

    pub fn config(&self) -> &CleaningConfig {
        &self.config
    }
}

/// Keep the first occurrence of every distinct row.
///
/// Returns the deduplicated frame and the input positions that were kept, so
/// values held outside the frame can be realigned.
pub fn drop_duplicates(frame: &DataFrame) -> Result<(DataFrame, Vec<usize>)> {
    if frame.width() == 0 {
        return Ok((frame.clone(), (0..frame.height()).collect()));
    }
    let subset: Vec<String> = frame
        .get_column_names()
        .into_iter()
        .map(str::to_string)
        .collect();
    let mut deduped = frame.with_row_index(ROW_INDEX, None)?.unique_stable(
        Some(&subset),
        UniqueKeepStrategy::First,
        None,
    )?;
    let kept: Vec<usize> = deduped
        .drop_in_place(ROW_INDEX)?
        .idx()?
        .into_no_null_iter()
        .map(|row| row as usize)
        .collect();
    Ok((deduped, kept))
}

/// Map textual labels through the exact `{positive: 1, negative: 0}` dictionary
pub fn map_target_labels(labels: &StringChunked, positive: &str, negative: &str) -> Float64Chunked {
    let mapped: Float64Chunked = labels
        .into_iter()
        .map(|label| match label {
            Some(l) if l == positive => Some(1.0),
            Some(l) if l == negative => Some(0.0),
            _ => None,
        })
        .collect();
    mapped.with_name(labels.name())
}

/// Convert text columns to `Float64`; failed parses become null.
///
/// `known` columns are always converted when textual, other text columns only
/// when at least `threshold` of their non-blank values parse. Returns the
/// converted column names.
pub fn coerce_numeric_columns(
    frame: &mut DataFrame,
    threshold: f64,
    known: &[&str],
    skip: &[&str],
) -> Result<Vec<String>> {
    let mut converted = Vec::new();
    for series in frame.get_columns() {
        let name = series.name();
        if skip.contains(&name) || !is_text(series) {
            continue;
        }
        let parsed = series.cast(&DataType::Float64)?;
        if known.contains(&name) || parses_enough(series.str()?, &parsed, threshold) {
            converted.push(parsed);
        }
    }

    let mut coerced = Vec::with_capacity(converted.len());
    for parsed in converted {
        coerced.push(parsed.name().to_string());
        frame.with_column(parsed)?;
    }
    Ok(coerced)
}

/// Share of non-blank text values that survived the numeric cast
fn parses_enough(raw: &StringChunked, parsed: &Series, threshold: f64) -> bool {
    let non_blank = raw.into_iter().flatten().filter(|v| !v.trim().is_empty()).count();
    if non_blank == 0 {
        return false;
    }
    let numbers = parsed.len() - parsed.null_count();
    numbers as f64 / non_blank as f64 >= threshold
}

/// Fill missing numeric values with the column median and missing text with
/// the column mode. Returns `(column, filled)` pairs.
pub fn impute_missing(frame: &mut DataFrame, skip: &[&str]) -> Result<Vec<(String, usize)>> {
    let mut fills: Vec<(Series, usize)> = Vec::new();
    for series in frame.get_columns() {
        let name = series.name();
        let missing = series.null_count();
        if skip.contains(&name) || missing == 0 {
            continue;
        }
        if series.dtype().is_numeric() {
            let Some(fill) = series.median() else {
                continue;
            };
            debug!(column = name, fill, "Filled missing values with median");
            let filled = series
                .cast(&DataType::Float64)?
                .f64()?
                .fill_null_with_values(fill)?
                .into_series();
            fills.push((filled, missing));
        } else if is_text(series) {
            let values = series.str()?;
            let Some(fill) = mode(values) else {
                continue;
            };
            debug!(column = name, fill = %fill, "Filled missing values with mode");
            let filled: StringChunked = values
                .into_iter()
                .map(|v| Some(v.unwrap_or(fill.as_str())))
                .collect();
            fills.push((filled.with_name(name).into_series(), missing));
        }
    }

    let mut report = Vec::with_capacity(fills.len());
    for (filled, missing) in fills {
        report.push((filled.name().to_string(), missing));
        frame.with_column(filled)?;
    }
    Ok(report)
}

/// Most frequent non-missing value; ties go to the smallest value
pub fn mode(values: &StringChunked) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for v in values.into_iter().flatten() {
        *counts.entry(v).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by(|(a_val, a_n), (b_val, b_n)| a_n.cmp(b_n).then_with(|| b_val.cmp(a_val)))
        .map(|(value, _)| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::numeric_values;

    fn raw_frame() -> DataFrame {
        df!(
            "customerID" => &["a", "b", "b", "c"],
            "tenure" => &[1.0, 5.0, 5.0, 30.0],
            "TotalCharges" => &["29.5", " ", " ", "100"],
            "Partner" => &[Some("Yes"), None, None, Some("Yes")],
            "Churn" => &["No", "Yes", "Yes", "Maybe"]
        )
        .unwrap()
    }

    #[test]
    fn test_drop_duplicates_is_idempotent() {
        let (once, kept) = drop_duplicates(&raw_frame()).unwrap();
        assert_eq!(once.height(), 3);
        assert_eq!(kept, vec![0, 1, 3]);
        assert_eq!(once.width(), 5);

        let (twice, kept_again) = drop_duplicates(&once).unwrap();
        assert_eq!(twice.height(), once.height());
        assert_eq!(kept_again, vec![0, 1, 2]);
    }

    #[test]
    fn test_missing_cells_compare_equal() {
        let frame = df!("x" => &[None, None, Some(1.0)]).unwrap();
        let (deduped, _) = drop_duplicates(&frame).unwrap();
        assert_eq!(deduped.height(), 2);
    }

    #[test]
    fn test_clean_pipeline() {
        let cleaner = Cleaner::default();
        let cleaned = cleaner.clean(&raw_frame(), Some("Churn")).unwrap();
        let frame = cleaned.frame;

        assert_eq!(frame.height(), 3);
        assert!(frame.column("customerID").is_err());
        assert_eq!(cleaned.coerced, vec!["TotalCharges".to_string()]);

        // blank TotalCharges coerced to missing then filled with the median of 29.5 and 100
        assert_eq!(
            numeric_values(&frame, "TotalCharges").unwrap(),
            vec![Some(29.5), Some(64.75), Some(100.0)]
        );

        let partner: Vec<Option<&str>> = frame.column("Partner").unwrap().str().unwrap().into_iter().collect();
        assert_eq!(partner, vec![Some("Yes"), Some("Yes"), Some("Yes")]);

        // "Maybe" is outside the label dictionary and stays missing
        assert_eq!(
            numeric_values(&frame, "Churn").unwrap(),
            vec![Some(0.0), Some(1.0), None]
        );
    }

    #[test]
    fn test_numeric_looking_columns_are_coerced() {
        let mut frame = df!(
            "score" => &["1", "2.5", "x3"],
            "amount" => &["10", "20", "30"],
            "plan" => &["basic", "pro", "pro"]
        )
        .unwrap();

        let coerced = coerce_numeric_columns(&mut frame, 0.95, &[], &[]).unwrap();
        assert_eq!(coerced, vec!["amount".to_string()]);
        assert_eq!(frame.column("amount").unwrap().dtype(), &DataType::Float64);
        assert!(is_text(frame.column("score").unwrap()));
        assert!(is_text(frame.column("plan").unwrap()));
    }

    #[test]
    fn test_forced_numeric_column_keeps_blanks_missing() {
        let frame = df!("amount" => &["15", "n/a"]).unwrap();
        let cleaned = Cleaner::default()
            .clean_with_numeric(&frame, None, &["amount".to_string()])
            .unwrap();
        assert_eq!(cleaned.coerced, vec!["amount".to_string()]);
        // the unparsable value is imputed from the parsed one
        assert_eq!(
            numeric_values(&cleaned.frame, "amount").unwrap(),
            vec![Some(15.0), Some(15.0)]
        );
    }

    #[test]
    fn test_median_and_mode_imputation() {
        let mut frame = df!(
            "x" => &[Some(3.0), None, Some(1.0), Some(2.0)],
            "y" => &[Some("b"), Some("a"), None, Some("c")]
        )
        .unwrap();
        let filled = impute_missing(&mut frame, &[]).unwrap();
        assert_eq!(filled, vec![("x".to_string(), 1), ("y".to_string(), 1)]);
        assert_eq!(numeric_values(&frame, "x").unwrap()[1], Some(2.0));
        // every value occurs once, so the smallest wins
        assert_eq!(frame.column("y").unwrap().str().unwrap().get(2), Some("a"));

        let empty = Series::new("z", &[None::<&str>, None]);
        assert_eq!(mode(empty.str().unwrap()), None);
    }

    #[test]
    fn test_map_target_labels_exact_match() {
        let labels = Series::new("Churn", &[Some("Yes"), Some("No"), Some("yes"), None]);
        let mapped: Vec<Option<f64>> = map_target_labels(labels.str().unwrap(), "Yes", "No")
            .into_iter()
            .collect();
        assert_eq!(mapped, vec![Some(1.0), Some(0.0), None, None]);
    }
}
