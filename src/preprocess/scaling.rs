//! Standardization (zero mean, unit variance) with fit/transform semantics

use crate::error::{ChurnError, Result};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Per-column mean and standard deviation learned from fit data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerState {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl ScalerState {
    /// Fit on `x`, filling NaN with the column mean first
    pub fn fit(x: &Array2<f64>) -> Result<Self> {
        if x.nrows() == 0 {
            return Err(ChurnError::EmptyDataset("cannot fit scaler on zero rows".to_string()));
        }
        let mut filled = x.clone();
        let means = nan_column_means(&filled);
        fill_nan(&mut filled, &means);

        let mean = filled
            .mean_axis(Axis(0))
            .ok_or_else(|| ChurnError::EmptyDataset("no rows to scale".to_string()))?;
        // population deviation; constant columns keep their values centred
        let scale = filled
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > f64::EPSILON { s } else { 1.0 });
        Ok(Self { mean, scale })
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn scale(&self) -> &Array1<f64> {
        &self.scale
    }

    /// Standardize `x` with the fitted statistics; NaN becomes the fitted mean
    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.n_features() {
            return Err(ChurnError::FeatureMismatch(format!(
                "scaler fitted on {} features, got {}",
                self.n_features(),
                x.ncols()
            )));
        }
        let mut out = x.clone();
        fill_nan(&mut out, &self.mean);
        out -= &self.mean;
        out /= &self.scale;
        Ok(out)
    }

    pub fn fit_transform(x: &Array2<f64>) -> Result<(Array2<f64>, Self)> {
        let state = Self::fit(x)?;
        let scaled = state.transform(x)?;
        Ok((scaled, state))
    }
}

/// Scale a bare matrix: NaN is replaced by zero, then the matrix is either
/// fitted (`state == None`) or transformed with an existing state.
pub fn scale_matrix(x: &Array2<f64>, state: Option<&ScalerState>) -> Result<(Array2<f64>, ScalerState)> {
    let zeroed = x.mapv(|v| if v.is_nan() { 0.0 } else { v });
    match state {
        Some(state) => Ok((state.transform(&zeroed)?, state.clone())),
        None => ScalerState::fit_transform(&zeroed),
    }
}

/// Column means over non-NaN entries; columns with no values get zero
pub(crate) fn nan_column_means(x: &Array2<f64>) -> Array1<f64> {
    x.axis_iter(Axis(1))
        .map(|col| {
            let (sum, n) = col
                .iter()
                .filter(|v| !v.is_nan())
                .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
            if n == 0 {
                0.0
            } else {
                sum / n as f64
            }
        })
        .collect()
}

fn fill_nan(x: &mut Array2<f64>, fill: &Array1<f64>) {
    for mut row in x.axis_iter_mut(Axis(0)) {
        for (v, &f) in row.iter_mut().zip(fill.iter()) {
            if v.is_nan() {
                *v = f;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_fit_transform_standardizes() {
        let x = array![[1.0, 10.0], [2.0, 10.0], [3.0, 10.0]];
        let (scaled, state) = ScalerState::fit_transform(&x).unwrap();

        let means = scaled.mean_axis(Axis(0)).unwrap();
        assert!(means.iter().all(|m| m.abs() < 1e-12));
        let stds = scaled.std_axis(Axis(0), 0.0);
        assert!((stds[0] - 1.0).abs() < 1e-12);
        // constant column: centred, not divided by zero
        assert_eq!(stds[1], 0.0);
        assert_eq!(state.scale()[1], 1.0);
    }

    #[test]
    fn test_transform_reuses_fit_statistics() {
        let train = array![[0.0], [2.0]];
        let state = ScalerState::fit(&train).unwrap();

        let test = array![[4.0], [f64::NAN]];
        let scaled = state.transform(&test).unwrap();
        assert!((scaled[[0, 0]] - 3.0).abs() < 1e-12);
        // missing value becomes the fitted mean, i.e. zero after scaling
        assert_eq!(scaled[[1, 0]], 0.0);
    }

    #[test]
    fn test_fit_fills_missing_with_mean() {
        let x = array![[1.0], [f64::NAN], [3.0]];
        let state = ScalerState::fit(&x).unwrap();
        assert_eq!(state.mean()[0], 2.0);
        let scaled = state.transform(&x).unwrap();
        assert!(scaled.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_transform_rejects_wrong_width() {
        let state = ScalerState::fit(&array![[1.0, 2.0], [3.0, 4.0]]).unwrap();
        let err = state.transform(&array![[1.0]]).unwrap_err();
        assert!(matches!(err, ChurnError::FeatureMismatch(_)));
    }

    #[test]
    fn test_scale_matrix_zero_fills() {
        let x = array![[f64::NAN], [2.0]];
        let (scaled, state) = scale_matrix(&x, None).unwrap();
        assert_eq!(state.mean()[0], 1.0);
        assert!((scaled[[0, 0]] + 1.0).abs() < 1e-12);
    }
}
