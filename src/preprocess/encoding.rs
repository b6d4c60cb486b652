//! Categorical encoders with fit/transform semantics

use crate::data::is_text;
use crate::error::Result;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Code assigned to a category that was not seen during fit
pub const UNKNOWN_CODE: i64 = -1;

/// Encoding chosen from the column cardinality at fit time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncodingPolicy {
    /// At most two categories: a single integer column
    Label,
    /// More than two: one indicator per category except the first
    OneHot,
}

/// Fitted encoder for one categorical column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalEncoder {
    column: String,
    /// Sorted distinct categories seen during fit; position is the code
    categories: Vec<String>,
    policy: EncodingPolicy,
}

impl CategoricalEncoder {
    pub fn fit(column: &str, values: &StringChunked) -> Self {
        let categories: Vec<String> = values
            .into_iter()
            .flatten()
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let policy = if categories.len() <= 2 {
            EncodingPolicy::Label
        } else {
            EncodingPolicy::OneHot
        };
        Self {
            column: column.to_string(),
            categories,
            policy,
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn policy(&self) -> EncodingPolicy {
        self.policy
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    /// Integer code of a category, [`UNKNOWN_CODE`] when unseen or missing
    pub fn code(&self, value: Option<&str>) -> i64 {
        value
            .and_then(|v| self.categories.binary_search_by(|c| c.as_str().cmp(v)).ok())
            .map(|idx| idx as i64)
            .unwrap_or(UNKNOWN_CODE)
    }

    /// Names of the columns produced by [`CategoricalEncoder::transform`]
    pub fn output_names(&self) -> Vec<String> {
        match self.policy {
            EncodingPolicy::Label => vec![self.column.clone()],
            EncodingPolicy::OneHot => self.categories[1..]
                .iter()
                .map(|category| format!("{}_{}", self.column, category))
                .collect(),
        }
    }

    /// Encode values into `Float64` columns. The reference category and unseen
    /// categories both produce all-zero indicators under one-hot encoding.
    pub fn transform(&self, values: &StringChunked) -> Vec<Series> {
        let codes: Vec<i64> = values.into_iter().map(|v| self.code(v)).collect();
        match self.policy {
            EncodingPolicy::Label => {
                let encoded: Vec<f64> = codes.iter().map(|&c| c as f64).collect();
                vec![Series::new(&self.column, encoded)]
            }
            EncodingPolicy::OneHot => self
                .output_names()
                .into_iter()
                .enumerate()
                .map(|(i, name)| {
                    let target = (i + 1) as i64;
                    let indicator: Vec<f64> = codes
                        .iter()
                        .map(|&c| if c == target { 1.0 } else { 0.0 })
                        .collect();
                    Series::new(&name, indicator)
                })
                .collect(),
        }
    }
}

/// Encoders for every categorical column of a training frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncoderSet {
    encoders: Vec<CategoricalEncoder>,
}

impl EncoderSet {
    /// Fit an encoder per text column, skipping `exclude`
    pub fn fit(frame: &DataFrame, exclude: &[&str]) -> Result<Self> {
        let mut encoders = Vec::new();
        for series in frame.get_columns() {
            if exclude.contains(&series.name()) || !is_text(series) {
                continue;
            }
            let encoder = CategoricalEncoder::fit(series.name(), series.str()?);
            debug!(
                column = encoder.column(),
                categories = encoder.categories().len(),
                policy = ?encoder.policy(),
                "Fitted encoder"
            );
            encoders.push(encoder);
        }
        info!("Encoded {} categorical columns", encoders.len());
        Ok(Self { encoders })
    }

    pub fn is_empty(&self) -> bool {
        self.encoders.is_empty()
    }

    pub fn len(&self) -> usize {
        self.encoders.len()
    }

    pub fn get(&self, column: &str) -> Option<&CategoricalEncoder> {
        self.encoders.iter().find(|e| e.column == column)
    }

    /// Total number of columns the fitted encoders produce
    pub fn output_width(&self) -> usize {
        self.encoders.iter().map(|e| e.output_names().len()).sum()
    }

    /// Replace every fitted column by its encoded columns, in place.
    ///
    /// Columns without a fitted encoder pass through unchanged.
    pub fn transform(&self, frame: &DataFrame) -> Result<DataFrame> {
        let mut columns = Vec::with_capacity(frame.width());
        for series in frame.get_columns() {
            let Some(encoder) = self.get(series.name()) else {
                if is_text(series) {
                    warn!(column = series.name(), "No encoder fitted for text column");
                }
                columns.push(series.clone());
                continue;
            };
            let text = if is_text(series) {
                series.clone()
            } else {
                warn!(column = series.name(), "Encoding numeric values as categories");
                series.cast(&DataType::String)?
            };
            let values = text.str()?;
            let unknown = values
                .into_iter()
                .filter(|v| encoder.code(*v) == UNKNOWN_CODE)
                .count();
            if unknown > 0 {
                debug!(column = series.name(), unknown, "Unseen categories mapped to unknown");
            }
            columns.extend(encoder.transform(values));
        }
        Ok(DataFrame::new(columns)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::numeric_values;

    fn text(name: &str, values: &[&str]) -> Series {
        Series::new(name, values)
    }

    #[test]
    fn test_binary_column_uses_label_encoding() {
        let values = text("Partner", &["No", "Yes", "No"]);
        let encoder = CategoricalEncoder::fit("Partner", values.str().unwrap());

        assert_eq!(encoder.policy(), EncodingPolicy::Label);
        assert_eq!(encoder.code(Some("No")), 0);
        assert_eq!(encoder.code(Some("Yes")), 1);
        // repeated transforms give the same codes
        assert_eq!(encoder.code(Some("Yes")), encoder.code(Some("Yes")));
        assert_eq!(encoder.code(Some("Maybe")), UNKNOWN_CODE);
        assert_eq!(encoder.code(None), UNKNOWN_CODE);
    }

    #[test]
    fn test_unseen_category_maps_to_sentinel() {
        let train = text("segment", &["A", "B", "C"]);
        let encoder = CategoricalEncoder::fit("segment", train.str().unwrap());
        assert_eq!(encoder.policy(), EncodingPolicy::OneHot);
        assert_eq!(encoder.output_names(), vec!["segment_B", "segment_C"]);

        assert_eq!(encoder.code(Some("D")), UNKNOWN_CODE);
        let test = text("segment", &["D", "C"]);
        let encoded = DataFrame::new(encoder.transform(test.str().unwrap())).unwrap();
        assert_eq!(encoded.width(), 2);
        assert_eq!(numeric_values(&encoded, "segment_B").unwrap(), vec![Some(0.0), Some(0.0)]);
        assert_eq!(numeric_values(&encoded, "segment_C").unwrap(), vec![Some(0.0), Some(1.0)]);
    }

    #[test]
    fn test_encoder_set_keeps_column_positions() {
        let frame = df!(
            "tenure" => &[1.0, 2.0, 3.0],
            "Contract" => &["Month-to-month", "One year", "Two year"],
            "Partner" => &["Yes", "No", "Yes"],
            "Churn" => &["Yes", "No", "No"]
        )
        .unwrap();

        let encoders = EncoderSet::fit(&frame, &["Churn"]).unwrap();
        assert_eq!(encoders.len(), 2);
        assert_eq!(encoders.output_width(), 3);
        assert!(encoders.get("Churn").is_none());

        let encoded = encoders.transform(&frame).unwrap();
        assert_eq!(
            encoded.get_column_names(),
            vec!["tenure", "Contract_One year", "Contract_Two year", "Partner", "Churn"]
        );
        assert_eq!(
            numeric_values(&encoded, "Partner").unwrap(),
            vec![Some(1.0), Some(0.0), Some(1.0)]
        );
    }

    #[test]
    fn test_transform_reuses_fitted_categories() {
        let train = df!("plan" => &["basic", "pro", "max"]).unwrap();
        let test = df!("plan" => &["pro", "enterprise"]).unwrap();

        let encoders = EncoderSet::fit(&train, &[]).unwrap();
        let encoded = encoders.transform(&test).unwrap();
        assert_eq!(encoded.get_column_names(), vec!["plan_max", "plan_pro"]);
        assert_eq!(numeric_values(&encoded, "plan_pro").unwrap(), vec![Some(1.0), Some(0.0)]);
        assert_eq!(numeric_values(&encoded, "plan_max").unwrap(), vec![Some(0.0), Some(0.0)]);
    }

    #[test]
    fn test_duplicate_output_name_is_an_error() {
        // one-hot output "plan_pro" collides with an existing column
        let train = df!("plan" => &["basic", "pro", "max"]).unwrap();
        let encoders = EncoderSet::fit(&train, &[]).unwrap();
        let test = df!(
            "plan" => &["pro", "basic"],
            "plan_pro" => &[1.0, 0.0]
        )
        .unwrap();
        assert!(encoders.transform(&test).is_err());
    }
}
