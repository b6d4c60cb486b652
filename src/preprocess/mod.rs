//! Preprocessing: cleaning, categorical encoding, scaling and the fit/transform
//! pipeline that keeps features and target aligned.
//!
//! Fitted statistics live in a [`PreprocessState`] value returned by
//! [`Preprocessor::fit_transform`] and handed back to [`Preprocessor::transform`].

pub mod clean;
pub mod encoding;
pub mod scaling;

pub use clean::{drop_duplicates, map_target_labels, Cleaned, Cleaner};
pub use encoding::{CategoricalEncoder, EncoderSet, EncodingPolicy, UNKNOWN_CODE};
pub use scaling::{scale_matrix, ScalerState};

use crate::config::{PipelineConfig, UnmappedTargetPolicy};
use crate::data::{is_text, row_indices};
use crate::error::{ChurnError, Result};
use ndarray::{Array1, Array2};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Statistics learned by a fit pass and reused, read-only, by transform passes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreprocessState {
    encoders: Option<EncoderSet>,
    scaler: Option<ScalerState>,
    /// Final feature columns, in matrix order
    feature_names: Vec<String>,
    /// Columns that were numeric after cleaning at fit time
    #[serde(default)]
    numeric_columns: Vec<String>,
}

impl PreprocessState {
    pub fn is_fitted(&self) -> bool {
        self.encoders.is_some() && self.scaler.is_some()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn numeric_columns(&self) -> &[String] {
        &self.numeric_columns
    }

    pub fn encoders(&self) -> Option<&EncoderSet> {
        self.encoders.as_ref()
    }

    pub fn scaler(&self) -> Option<&ScalerState> {
        self.scaler.as_ref()
    }
}

/// Numeric feature matrix with its aligned target
#[derive(Debug, Clone)]
pub struct Prepared {
    pub features: Array2<f64>,
    pub feature_names: Vec<String>,
    /// Width of the table after categorical encoding
    pub encoded_width: usize,
    /// Binary labels, present when the target column was in the input
    pub target: Option<Array1<usize>>,
}

impl Prepared {
    pub fn n_samples(&self) -> usize {
        self.features.nrows()
    }
}

/// Runs cleaning, encoding and scaling over a record table
#[derive(Debug, Clone, Default)]
pub struct Preprocessor {
    cleaner: Cleaner,
    unmapped_target: UnmappedTargetPolicy,
}

impl Preprocessor {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            cleaner: Cleaner::new(config.columns.clone(), config.cleaning.clone()),
            unmapped_target: config.cleaning.unmapped_target,
        }
    }

    /// Clean a raw table (see [`Cleaner::clean`])
    pub fn clean_data(&self, frame: &DataFrame, target: Option<&str>) -> Result<Cleaned> {
        self.cleaner.clean(frame, target)
    }

    /// Learn encoders and scaler from `frame` and return the prepared matrix
    pub fn fit_transform(&self, frame: &DataFrame, target_col: &str) -> Result<(Prepared, PreprocessState)> {
        info!("Running preprocessing pipeline (fit)");
        let (features, target) = self.split_and_clean(frame, target_col, &[])?;
        let numeric_columns: Vec<String> = features
            .get_columns()
            .iter()
            .filter(|s| s.dtype().is_numeric())
            .map(|s| s.name().to_string())
            .collect();

        let encoders = EncoderSet::fit(&features, &[target_col])?;
        let encoded = encoders.transform(&features)?;
        let feature_names: Vec<String> = encoded
            .get_columns()
            .iter()
            .filter(|s| s.dtype().is_numeric())
            .map(|s| s.name().to_string())
            .collect();

        let matrix = frame_to_matrix(&encoded, &feature_names)?;
        let (scaled, scaler) = ScalerState::fit_transform(&matrix)?;

        let state = PreprocessState {
            encoders: Some(encoders),
            scaler: Some(scaler),
            feature_names: feature_names.clone(),
            numeric_columns,
        };
        info!(
            rows = scaled.nrows(),
            features = scaled.ncols(),
            "Preprocessing pipeline completed"
        );
        Ok((
            Prepared {
                features: scaled,
                feature_names,
                encoded_width: encoded.width(),
                target,
            },
            state,
        ))
    }

    /// Apply a previously fitted state to new data
    ///
    /// Columns that were numeric at fit time are parsed as numbers whatever
    /// their share of unparsable values in this batch.
    pub fn transform(&self, frame: &DataFrame, target_col: &str, state: &PreprocessState) -> Result<Prepared> {
        let (Some(encoders), Some(scaler)) = (state.encoders(), state.scaler()) else {
            return Err(ChurnError::NotFitted("Preprocessor"));
        };
        info!("Running preprocessing pipeline (transform)");
        let (features, target) = self.split_and_clean(frame, target_col, state.numeric_columns())?;

        let encoded = encoders.transform(&features)?;
        let extras: Vec<&str> = encoded
            .get_column_names()
            .into_iter()
            .filter(|name| !state.feature_names.iter().any(|f| f == name))
            .collect();
        if !extras.is_empty() {
            warn!(columns = ?extras, "Ignoring columns not seen during fit");
        }

        let matrix = frame_to_matrix(&encoded, &state.feature_names)?;
        let scaled = scaler.transform(&matrix)?;
        Ok(Prepared {
            features: scaled,
            feature_names: state.feature_names.clone(),
            encoded_width: encoded.width(),
            target,
        })
    }

    /// Pull the target out before any row-altering step, clean the features,
    /// then realign the target to the surviving rows.
    fn split_and_clean(
        &self,
        frame: &DataFrame,
        target_col: &str,
        numeric: &[String],
    ) -> Result<(DataFrame, Option<Array1<usize>>)> {
        if frame.height() == 0 {
            return Err(ChurnError::EmptyDataset("input table has no rows".to_string()));
        }
        let mut features = frame.clone();
        let raw_target = features.drop_in_place(target_col).ok();

        let cleaned = self.cleaner.clean_with_numeric(&features, None, numeric)?;
        let target = match raw_target {
            Some(series) => {
                let aligned = series.take(&row_indices(&cleaned.kept_rows))?;
                Some(self.prepare_target(&aligned)?)
            }
            None => None,
        };
        Ok((cleaned.frame, target))
    }

    /// Map the target to {0, 1} and fill gaps with the majority class
    fn prepare_target(&self, series: &Series) -> Result<Array1<usize>> {
        let config = self.cleaner.config();
        let (codes, raw): (Vec<Option<usize>>, Vec<Option<String>>) = if series.dtype().is_numeric() {
            let values = series.cast(&DataType::Float64)?;
            let values = values.f64()?;
            (
                values
                    .into_iter()
                    .map(|v| match v {
                        Some(x) if x == 0.0 => Some(0),
                        Some(x) if x == 1.0 => Some(1),
                        _ => None,
                    })
                    .collect(),
                values.into_iter().map(|v| v.map(|x| x.to_string())).collect(),
            )
        } else {
            let labels = if is_text(series) {
                series.clone()
            } else {
                series.cast(&DataType::String)?
            };
            let labels = labels.str()?;
            let mapped = map_target_labels(labels, &config.positive_label, &config.negative_label);
            (
                mapped.into_iter().map(|v| v.map(|x| x as usize)).collect(),
                labels.into_iter().map(|v| v.map(str::to_string)).collect(),
            )
        };

        let unmapped: Vec<String> = raw
            .iter()
            .zip(&codes)
            .filter(|(r, c)| r.is_some() && c.is_none())
            .filter_map(|(r, _)| r.clone())
            .collect();
        if !unmapped.is_empty() {
            if self.unmapped_target == UnmappedTargetPolicy::Reject {
                let mut examples = unmapped.clone();
                examples.sort();
                examples.dedup();
                examples.truncate(5);
                return Err(ChurnError::UnmappedTarget {
                    column: series.name().to_string(),
                    count: unmapped.len(),
                    examples,
                });
            }
            warn!(
                column = series.name(),
                count = unmapped.len(),
                "Unmapped target labels filled with the majority class"
            );
        }

        let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
        for code in codes.iter().flatten() {
            *counts.entry(*code).or_insert(0) += 1;
        }
        // ties go to the lower class, an all-missing target falls back to 0
        let majority = counts
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(class, _)| *class)
            .unwrap_or(0);
        let target: Array1<usize> = codes.iter().map(|c| c.unwrap_or(majority)).collect();

        let positives = target.iter().filter(|&&y| y == 1).count();
        info!(
            negatives = target.len() - positives,
            positives,
            "Target distribution"
        );
        Ok(target)
    }
}

/// Assemble the named numeric columns into a row-major matrix; null is NaN
pub fn frame_to_matrix(frame: &DataFrame, names: &[String]) -> Result<Array2<f64>> {
    let columns: Vec<Vec<f64>> = names
        .iter()
        .map(|name| {
            let series = frame.column(name).map_err(|_| {
                ChurnError::FeatureMismatch(format!("feature '{}' missing from input", name))
            })?;
            if !series.dtype().is_numeric() {
                return Err(ChurnError::FeatureMismatch(format!(
                    "feature '{}' is not numeric",
                    name
                )));
            }
            let values = series.cast(&DataType::Float64)?;
            Ok(values
                .f64()?
                .into_iter()
                .map(|v| v.unwrap_or(f64::NAN))
                .collect())
        })
        .collect::<Result<_>>()?;

    Ok(Array2::from_shape_fn((frame.height(), names.len()), |(r, c)| {
        columns[c][r]
    }))
}
