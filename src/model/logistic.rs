//! L2-regularized logistic regression on `linfa-logistic`

use super::{check_fit_input, check_predict_input, Classifier};
use crate::error::{ChurnError, Result};
use linfa::prelude::*;
use linfa_logistic::{FittedLogisticRegression, LogisticRegression as LinfaLogistic};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogisticParams {
    pub max_iter: usize,
    /// L2 penalty strength
    pub alpha: f64,
    /// Stop when the gradient norm drops below this
    pub tol: f64,
}

impl Default for LogisticParams {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            alpha: 0.01,
            tol: 1e-6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    params: LogisticParams,
    model: Option<FittedLogisticRegression<f64, usize>>,
}

impl LogisticRegression {
    pub fn new(params: LogisticParams) -> Self {
        Self { params, model: None }
    }

    pub fn params(&self) -> &LogisticParams {
        &self.params
    }

    pub fn coefficients(&self) -> Option<&Array1<f64>> {
        self.model.as_ref().map(|m| m.params())
    }

    pub fn intercept(&self) -> Option<f64> {
        self.model.as_ref().map(|m| m.intercept())
    }
}

impl Classifier for LogisticRegression {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<usize>) -> Result<()> {
        check_fit_input(x, y)?;
        if self.params.alpha < 0.0 {
            return Err(ChurnError::invalid("alpha", self.params.alpha, "must not be negative"));
        }

        let dataset = Dataset::new(x.clone(), y.clone());
        let model = LinfaLogistic::default()
            .alpha(self.params.alpha)
            .max_iterations(self.params.max_iter as u64)
            .gradient_tolerance(self.params.tol)
            .fit(&dataset)
            .map_err(|e| ChurnError::Training(format!("logistic regression: {e}")))?;
        debug!(intercept = model.intercept(), "Logistic regression fitted");

        self.model = Some(model);
        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let model = self
            .model
            .as_ref()
            .ok_or(ChurnError::NotFitted("LogisticRegression"))?;
        check_predict_input(x, model.params().len())?;
        Ok(model.predict_probabilities(x))
    }

    fn is_fitted(&self) -> bool {
        self.model.is_some()
    }
}
