//! Random forest built from bagged `linfa-trees` decision trees

use super::{check_fit_input, check_predict_input, Classifier};
use crate::error::{ChurnError, Result};
use linfa::prelude::*;
use linfa_trees::DecisionTree;
use ndarray::{Array1, Array2, Axis};
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RandomForestParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
}

impl Default for RandomForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 10,
            min_samples_split: 5,
        }
    }
}

/// One bagged tree and the feature columns it was grown on
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ForestTree {
    features: Vec<usize>,
    tree: DecisionTree<f64, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    params: RandomForestParams,
    seed: u64,
    n_features: usize,
    trees: Vec<ForestTree>,
}

impl RandomForest {
    pub fn new(params: RandomForestParams, seed: u64) -> Self {
        Self {
            params,
            seed,
            n_features: 0,
            trees: Vec::new(),
        }
    }

    pub fn params(&self) -> &RandomForestParams {
        &self.params
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

/// Features tried per tree: the rounded square root of the width, at least one
fn features_per_tree(n_features: usize) -> usize {
    ((n_features as f64).sqrt().round() as usize).clamp(1, n_features.max(1))
}

impl Classifier for RandomForest {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<usize>) -> Result<()> {
        check_fit_input(x, y)?;
        if self.params.n_estimators == 0 {
            return Err(ChurnError::invalid("n_estimators", 0, "must be at least 1"));
        }
        let (n_rows, n_features) = x.dim();
        let per_tree = features_per_tree(n_features);
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);

        let params = DecisionTree::params()
            .max_depth(Some(self.params.max_depth))
            .min_weight_split(self.params.min_samples_split as f32);

        let mut trees = Vec::with_capacity(self.params.n_estimators);
        for _ in 0..self.params.n_estimators {
            let rows: Vec<usize> = (0..n_rows).map(|_| rng.gen_range(0..n_rows)).collect();
            let mut features = sample(&mut rng, n_features, per_tree).into_vec();
            features.sort_unstable();

            let records = x.select(Axis(0), &rows).select(Axis(1), &features);
            let targets = y.select(Axis(0), &rows);
            let dataset = DatasetBase::new(records, targets);
            let tree = params
                .fit(&dataset)
                .map_err(|e| ChurnError::Training(format!("decision tree: {e}")))?;
            trees.push(ForestTree { features, tree });
        }
        debug!(trees = trees.len(), features_per_tree = per_tree, "Grew random forest");

        self.n_features = n_features;
        self.trees = trees;
        Ok(())
    }

    /// Share of trees voting for the positive class
    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if !self.is_fitted() {
            return Err(ChurnError::NotFitted("RandomForest"));
        }
        check_predict_input(x, self.n_features)?;

        let mut votes = Array1::<f64>::zeros(x.nrows());
        for member in &self.trees {
            let predictions = member.tree.predict(&x.select(Axis(1), &member.features));
            for (vote, &label) in votes.iter_mut().zip(predictions.iter()) {
                if label == 1 {
                    *vote += 1.0;
                }
            }
        }
        Ok(votes / self.trees.len() as f64)
    }

    fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn separable() -> (Array2<f64>, Array1<usize>) {
        let x = array![
            [0.1, 1.0],
            [0.2, 0.9],
            [0.3, 1.1],
            [0.2, 1.0],
            [0.1, 0.8],
            [5.1, 0.1],
            [5.3, 0.2],
            [5.2, 0.0],
            [5.0, 0.1],
            [5.4, 0.3]
        ];
        let y = array![0, 0, 0, 0, 0, 1, 1, 1, 1, 1];
        (x, y)
    }

    #[test]
    fn test_vote_share_is_a_probability() {
        let (x, y) = separable();
        let mut forest = RandomForest::new(
            RandomForestParams {
                n_estimators: 20,
                max_depth: 3,
                min_samples_split: 2,
            },
            42,
        );
        forest.fit(&x, &y).unwrap();
        assert_eq!(forest.n_trees(), 20);

        let proba = forest.predict_proba(&x).unwrap();
        assert!(proba.iter().all(|p| (0.0..=1.0).contains(p)));
        assert!(proba[0] < proba[5]);
    }

    #[test]
    fn test_same_seed_same_forest() {
        let (x, y) = separable();
        let params = RandomForestParams {
            n_estimators: 10,
            ..RandomForestParams::default()
        };
        let mut first = RandomForest::new(params.clone(), 7);
        let mut second = RandomForest::new(params, 7);
        first.fit(&x, &y).unwrap();
        second.fit(&x, &y).unwrap();
        assert_eq!(first.predict_proba(&x).unwrap(), second.predict_proba(&x).unwrap());
    }

    #[test]
    fn test_features_per_tree() {
        assert_eq!(features_per_tree(1), 1);
        assert_eq!(features_per_tree(9), 3);
        assert_eq!(features_per_tree(40), 6);
    }

    #[test]
    fn test_predict_before_fit_fails() {
        let forest = RandomForest::new(RandomForestParams::default(), 42);
        assert!(forest.predict_proba(&array![[1.0, 2.0]]).unwrap_err().is_state_error());
    }
}
