//! Pipeline configuration: column names, cleaning policy, training and output layout

use crate::error::Result;
use crate::model::{GradientBoostingParams, LogisticParams, RandomForestParams};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Full pipeline configuration, loadable from TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub columns: ColumnNames,
    pub cleaning: CleaningConfig,
    pub training: TrainingConfig,
    pub output: OutputConfig,
}

impl PipelineConfig {
    /// Read a TOML file; keys that are absent keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

/// Names of the columns that trigger special handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ColumnNames {
    /// Row identifier, dropped before modeling
    pub id: String,
    /// Binary churn target
    pub target: String,
    pub tenure: String,
    pub monthly_charges: String,
    pub total_charges: String,
    pub contract: String,
    pub paperless_billing: String,
    pub partner: String,
    pub dependents: String,
    pub senior_citizen: String,
    /// Subscription flags counted into `num_services`
    pub services: Vec<String>,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            id: "customerID".to_string(),
            target: "Churn".to_string(),
            tenure: "tenure".to_string(),
            monthly_charges: "MonthlyCharges".to_string(),
            total_charges: "TotalCharges".to_string(),
            contract: "Contract".to_string(),
            paperless_billing: "PaperlessBilling".to_string(),
            partner: "Partner".to_string(),
            dependents: "Dependents".to_string(),
            senior_citizen: "SeniorCitizen".to_string(),
            services: [
                "PhoneService",
                "InternetService",
                "OnlineSecurity",
                "OnlineBackup",
                "DeviceProtection",
                "TechSupport",
                "StreamingTV",
                "StreamingMovies",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl ColumnNames {
    /// Columns that must be numeric whenever they are present
    pub fn known_numeric(&self) -> [&str; 3] {
        [&self.total_charges, &self.monthly_charges, &self.tenure]
    }
}

/// What to do with target labels outside the positive/negative dictionary
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnmappedTargetPolicy {
    /// Warn and fill with the majority class
    #[default]
    Impute,
    /// Abort with `ChurnError::UnmappedTarget`
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CleaningConfig {
    /// Share of non-blank values that must parse as numbers before a text
    /// column is coerced to numeric
    pub numeric_threshold: f64,
    pub positive_label: String,
    pub negative_label: String,
    pub unmapped_target: UnmappedTargetPolicy,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            numeric_threshold: 0.95,
            positive_label: "Yes".to_string(),
            negative_label: "No".to_string(),
            unmapped_target: UnmappedTargetPolicy::Impute,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrainingConfig {
    /// Held-out fraction for the stratified split
    pub test_size: f64,
    pub seed: u64,
    pub cv_folds: usize,
    /// Apply SMOTE to the training partition
    pub balance: bool,
    pub smote_k: usize,
    pub random_forest: RandomForestParams,
    pub logistic: LogisticParams,
    pub gradient_boosting: GradientBoostingParams,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            test_size: 0.2,
            seed: 42,
            cv_folds: 5,
            balance: true,
            smote_k: 5,
            random_forest: RandomForestParams::default(),
            logistic: LogisticParams::default(),
            gradient_boosting: GradientBoostingParams::default(),
        }
    }
}

/// Output directory layout, relative to the run's base directory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    pub processed_dir: PathBuf,
    pub metrics_dir: PathBuf,
    pub figures_dir: PathBuf,
    pub models_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            processed_dir: PathBuf::from("data/processed"),
            metrics_dir: PathBuf::from("reports/metrics"),
            figures_dir: PathBuf::from("reports/figures"),
            models_dir: PathBuf::from("models"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_telco_schema() {
        let config = PipelineConfig::default();
        assert_eq!(config.columns.target, "Churn");
        assert_eq!(config.columns.services.len(), 8);
        assert_eq!(config.training.test_size, 0.2);
        assert_eq!(config.training.cv_folds, 5);
        assert_eq!(config.cleaning.unmapped_target, UnmappedTargetPolicy::Impute);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [columns]
            target = "Exited"

            [cleaning]
            unmapped_target = "reject"

            [training]
            cv_folds = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.columns.target, "Exited");
        assert_eq!(config.columns.id, "customerID");
        assert_eq!(config.cleaning.unmapped_target, UnmappedTargetPolicy::Reject);
        assert_eq!(config.training.cv_folds, 3);
        assert_eq!(config.training.seed, 42);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = PipelineConfig::from_toml_str("training = 5").unwrap_err();
        assert!(matches!(err, crate::error::ChurnError::Config(_)));
    }
}
