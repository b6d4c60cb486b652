//! Error types shared across the churn pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, ChurnError>;

/// Errors raised by loading, preprocessing, training and reporting
#[derive(Error, Debug)]
pub enum ChurnError {
    #[error("File not found: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("Dataset is empty: {0}")]
    EmptyDataset(String),

    #[error("Length mismatch: {features} feature rows but {labels} labels")]
    LengthMismatch { features: usize, labels: usize },

    #[error("Column not found: {0}")]
    MissingColumn(String),

    #[error("Feature set mismatch: {0}")]
    FeatureMismatch(String),

    #[error("Target column '{column}' has {count} unmapped values (e.g. {examples:?})")]
    UnmappedTarget {
        column: String,
        count: usize,
        examples: Vec<String>,
    },

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("{0} used before fit")]
    NotFitted(&'static str),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Sampling error: {0}")]
    Sampling(String),

    #[error("Chart error: {0}")]
    Chart(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Data error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid shape: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

impl ChurnError {
    /// Errors caused by the caller's data or arguments; the operation aborts
    /// before writing anything.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            ChurnError::MissingFile(_)
                | ChurnError::EmptyDataset(_)
                | ChurnError::LengthMismatch { .. }
                | ChurnError::MissingColumn(_)
                | ChurnError::FeatureMismatch(_)
                | ChurnError::UnmappedTarget { .. }
                | ChurnError::InvalidParameter { .. }
        )
    }

    /// Transform requested on state that was never fitted
    pub fn is_state_error(&self) -> bool {
        matches!(self, ChurnError::NotFitted(_))
    }

    pub(crate) fn invalid(name: &str, value: impl ToString, reason: &str) -> Self {
        ChurnError::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<toml::de::Error> for ChurnError {
    fn from(err: toml::de::Error) -> Self {
        ChurnError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ChurnError::LengthMismatch { features: 3, labels: 2 };
        assert_eq!(err.to_string(), "Length mismatch: 3 feature rows but 2 labels");

        let err = ChurnError::NotFitted("Scaler");
        assert_eq!(err.to_string(), "Scaler used before fit");
    }

    #[test]
    fn test_error_classes_are_distinct() {
        let state = ChurnError::NotFitted("Preprocessor");
        assert!(state.is_state_error());
        assert!(!state.is_input_error());

        let input = ChurnError::EmptyDataset("no rows".to_string());
        assert!(input.is_input_error());
        assert!(!input.is_state_error());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ChurnError = io_err.into();
        assert!(matches!(err, ChurnError::Io(_)));
    }
}
