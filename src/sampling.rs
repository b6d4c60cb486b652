//! SMOTE oversampling of the minority class

use crate::error::{ChurnError, Result};
use linfa_nn::distance::L2Dist;
use linfa_nn::{CommonNearestNeighbour, NearestNeighbour};
use ndarray::{concatenate, Array1, Array2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

/// Synthetic minority oversampling: new minority rows are interpolated
/// between a minority sample and one of its k nearest minority neighbours
/// until both classes have the same count.
#[derive(Debug, Clone)]
pub struct Smote {
    k_neighbors: usize,
    seed: u64,
}

impl Default for Smote {
    fn default() -> Self {
        Self::new(5, 42)
    }
}

impl Smote {
    pub fn new(k_neighbors: usize, seed: u64) -> Self {
        Self {
            k_neighbors: k_neighbors.max(1),
            seed,
        }
    }

    /// Original rows followed by the synthetic minority rows
    pub fn fit_resample(&self, x: &Array2<f64>, y: &Array1<usize>) -> Result<(Array2<f64>, Array1<usize>)> {
        if x.nrows() != y.len() {
            return Err(ChurnError::LengthMismatch {
                features: x.nrows(),
                labels: y.len(),
            });
        }
        let positives = y.iter().filter(|&&label| label == 1).count();
        let negatives = y.len() - positives;
        if positives == 0 || negatives == 0 {
            return Err(ChurnError::Sampling("need samples from both classes".to_string()));
        }
        let (minority_label, n_minority, n_majority) = if positives < negatives {
            (1, positives, negatives)
        } else {
            (0, negatives, positives)
        };
        let n_synthetic = n_majority - n_minority;
        if n_synthetic == 0 {
            return Ok((x.clone(), y.clone()));
        }
        if n_minority < 2 {
            return Err(ChurnError::Sampling(format!(
                "minority class has {n_minority} sample, need at least 2"
            )));
        }

        let minority_rows: Vec<usize> = (0..y.len()).filter(|&i| y[i] == minority_label).collect();
        let minority = x.select(Axis(0), &minority_rows);
        let k = self.k_neighbors.min(n_minority - 1);

        let index = CommonNearestNeighbour::KdTree
            .from_batch(&minority, L2Dist)
            .map_err(|e| ChurnError::Sampling(format!("neighbour index: {e}")))?;

        // neighbours per minority row, self excluded
        let mut neighbours = Vec::with_capacity(n_minority);
        for (i, row) in minority.outer_iter().enumerate() {
            let found = index
                .k_nearest(row, k + 1)
                .map_err(|e| ChurnError::Sampling(format!("neighbour query: {e}")))?;
            let ids: Vec<usize> = found
                .into_iter()
                .map(|(_, id)| id)
                .filter(|&id| id != i)
                .take(k)
                .collect();
            neighbours.push(ids);
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut synthetic = Array2::<f64>::zeros((n_synthetic, x.ncols()));
        for mut out in synthetic.outer_iter_mut() {
            let base = rng.gen_range(0..n_minority);
            let candidates = &neighbours[base];
            // a row whose neighbours are all itself can only duplicate
            let other = if candidates.is_empty() {
                base
            } else {
                candidates[rng.gen_range(0..candidates.len())]
            };
            let gap: f64 = rng.gen();
            let a = minority.row(base);
            let b = minority.row(other);
            out.assign(&(&a + &((&b - &a) * gap)));
        }
        debug!(
            minority = n_minority,
            majority = n_majority,
            synthetic = n_synthetic,
            k,
            "Generated SMOTE samples"
        );

        let x_out = concatenate(Axis(0), &[x.view(), synthetic.view()])?;
        let y_out = y
            .iter()
            .copied()
            .chain(std::iter::repeat(minority_label).take(n_synthetic))
            .collect();
        Ok((x_out, y_out))
    }
}
