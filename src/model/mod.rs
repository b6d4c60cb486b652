//! Churn classifiers and the serializable model wrapper

pub mod boosting;
pub mod forest;
pub mod logistic;

pub use boosting::{GradientBoosting, GradientBoostingParams};
pub use forest::{RandomForest, RandomForestParams};
pub use logistic::{LogisticParams, LogisticRegression};

use crate::error::{ChurnError, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Probability at or above which a customer is predicted to churn
pub const DECISION_THRESHOLD: f64 = 0.5;

/// Binary classifier over a dense feature matrix and 0/1 labels
pub trait Classifier {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<usize>) -> Result<()>;

    /// Probability of the positive class per row
    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>>;

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<usize>> {
        Ok(self
            .predict_proba(x)?
            .mapv(|p| usize::from(p >= DECISION_THRESHOLD)))
    }

    fn is_fitted(&self) -> bool;
}

pub(crate) fn check_fit_input(x: &Array2<f64>, y: &Array1<usize>) -> Result<()> {
    if x.nrows() == 0 || x.ncols() == 0 {
        return Err(ChurnError::EmptyDataset(format!(
            "cannot fit on a {}x{} matrix",
            x.nrows(),
            x.ncols()
        )));
    }
    if x.nrows() != y.len() {
        return Err(ChurnError::LengthMismatch {
            features: x.nrows(),
            labels: y.len(),
        });
    }
    if let Some(bad) = y.iter().find(|&&label| label > 1) {
        return Err(ChurnError::invalid("label", bad, "labels must be 0 or 1"));
    }
    Ok(())
}

pub(crate) fn check_predict_input(x: &Array2<f64>, n_features: usize) -> Result<()> {
    if x.ncols() != n_features {
        return Err(ChurnError::FeatureMismatch(format!(
            "model fitted on {} features, got {}",
            n_features,
            x.ncols()
        )));
    }
    Ok(())
}

/// The classifier families trained by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelKind {
    RandomForest,
    LogisticRegression,
    GradientBoosting,
}

impl ModelKind {
    pub const ALL: [ModelKind; 3] = [
        ModelKind::RandomForest,
        ModelKind::LogisticRegression,
        ModelKind::GradientBoosting,
    ];

    /// Display name, also the key models are stored under
    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::RandomForest => "Random Forest",
            ModelKind::LogisticRegression => "Logistic Regression",
            ModelKind::GradientBoosting => "Gradient Boosting",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Any of the pipeline's classifiers, fitted or not
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TrainedModel {
    RandomForest(RandomForest),
    LogisticRegression(LogisticRegression),
    GradientBoosting(GradientBoosting),
}

impl TrainedModel {
    pub fn kind(&self) -> ModelKind {
        match self {
            TrainedModel::RandomForest(_) => ModelKind::RandomForest,
            TrainedModel::LogisticRegression(_) => ModelKind::LogisticRegression,
            TrainedModel::GradientBoosting(_) => ModelKind::GradientBoosting,
        }
    }

    /// Type tag recorded in saved artifacts
    pub fn type_name(&self) -> &'static str {
        match self {
            TrainedModel::RandomForest(_) => "RandomForestClassifier",
            TrainedModel::LogisticRegression(_) => "LogisticRegression",
            TrainedModel::GradientBoosting(_) => "GradientBoostingClassifier",
        }
    }

    /// Unfitted model with the same hyperparameters and seed
    pub fn unfitted(&self) -> TrainedModel {
        match self {
            TrainedModel::RandomForest(m) => {
                TrainedModel::RandomForest(RandomForest::new(m.params().clone(), m.seed()))
            }
            TrainedModel::LogisticRegression(m) => {
                TrainedModel::LogisticRegression(LogisticRegression::new(m.params().clone()))
            }
            TrainedModel::GradientBoosting(m) => {
                TrainedModel::GradientBoosting(GradientBoosting::new(m.params().clone(), m.seed()))
            }
        }
    }

    fn inner(&self) -> &dyn Classifier {
        match self {
            TrainedModel::RandomForest(m) => m,
            TrainedModel::LogisticRegression(m) => m,
            TrainedModel::GradientBoosting(m) => m,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Classifier {
        match self {
            TrainedModel::RandomForest(m) => m,
            TrainedModel::LogisticRegression(m) => m,
            TrainedModel::GradientBoosting(m) => m,
        }
    }
}

impl Classifier for TrainedModel {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<usize>) -> Result<()> {
        self.inner_mut().fit(x, y)
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.inner().predict_proba(x)
    }

    fn is_fitted(&self) -> bool {
        self.inner().is_fitted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_kind_names_round_trip() {
        for kind in ModelKind::ALL {
            assert_eq!(ModelKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ModelKind::from_name("SVM"), None);
        assert_eq!(ModelKind::GradientBoosting.to_string(), "Gradient Boosting");
    }

    #[test]
    fn test_unfitted_copy_keeps_params() {
        let params = LogisticParams {
            max_iter: 50,
            ..LogisticParams::default()
        };
        let mut model = TrainedModel::LogisticRegression(LogisticRegression::new(params.clone()));
        model
            .fit(&array![[0.0], [1.0], [2.0], [3.0]], &array![0, 0, 1, 1])
            .unwrap();
        assert!(model.is_fitted());

        let fresh = model.unfitted();
        assert!(!fresh.is_fitted());
        assert_eq!(fresh.kind(), ModelKind::LogisticRegression);
        match fresh {
            TrainedModel::LogisticRegression(m) => assert_eq!(m.params(), &params),
            other => panic!("unexpected model {:?}", other.kind()),
        }
    }

    #[test]
    fn test_fit_input_validation() {
        let err = check_fit_input(&Array2::zeros((0, 3)), &Array1::zeros(0)).unwrap_err();
        assert!(matches!(err, ChurnError::EmptyDataset(_)));

        let err = check_fit_input(&array![[1.0], [2.0]], &array![0, 2]).unwrap_err();
        assert!(matches!(err, ChurnError::InvalidParameter { .. }));
    }
}
